// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use strobe_core::init_tracing;
use strobe_platform::WindowHost;
use strobe_render::{FrameStatus, FramebufferSource, Renderer};
use strobe_render_vk::VkRenderer;
use tracing::{debug, error, info};

mod assets;
mod config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config; a missing file means defaults
    #[arg(long, default_value = "strobe.toml")]
    config: PathBuf,
    /// Exit after presenting this many frames
    #[arg(long)]
    frames: Option<u64>,
    /// Skip the Khronos validation layer even in debug builds
    #[arg(long)]
    no_validation: bool,
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let cfg = config::load_cfg(&args.config);

    let mut settings = cfg.render_settings();
    if args.no_validation {
        settings.validation = false;
    }
    let scene = assets::default_scene(&cfg.shader, &cfg.texture)?;

    let mut host = WindowHost::open(cfg.window_config())?;
    while host.framebuffer_size().is_degenerate() && !host.exit_requested() {
        host.wait_events();
    }
    if host.exit_requested() {
        return Ok(());
    }

    let window = host.window().context("window vanished before renderer init")?;
    let mut renderer =
        VkRenderer::initialize(window, window, host.framebuffer_size(), &settings, scene)?;

    let mut presented: u64 = 0;
    let mut fps_frames: u32 = 0;
    let mut fps_since = Instant::now();
    loop {
        host.pump(Some(Duration::ZERO));
        if host.take_resized() {
            renderer.notify_resized();
        }
        if host.exit_requested() {
            break;
        }

        match renderer.render_one_frame(&mut host)? {
            FrameStatus::Presented { swapchain_rebuilt } => {
                if swapchain_rebuilt {
                    debug!("swapchain rebuilt after frame {presented}");
                }
                presented += 1;
                fps_frames += 1;
            }
            FrameStatus::Skipped => {}
        }

        let dt = fps_since.elapsed();
        if dt >= Duration::from_secs(1) {
            info!("fps: {:.1}", fps_frames as f64 / dt.as_secs_f64());
            fps_frames = 0;
            fps_since = Instant::now();
        }
        if args.frames.is_some_and(|n| presented >= n) {
            info!("presented {presented} frames; exiting");
            break;
        }
    }

    // The surface must go before the window it was created from.
    renderer.shutdown()?;
    host.close_window();
    Ok(())
}
