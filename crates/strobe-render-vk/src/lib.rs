// SPDX-License-Identifier: CEPL-1.0
//! Vulkan 1.3 backend: device negotiation, staging uploads, layout transitions, the
//! swapchain state machine and a two-slot frame ring.

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use strobe_render::{
    FrameStatus, FramebufferSource, RenderSettings, RenderSize, Renderer, SceneAssets,
    ShaderBinary,
};
use tracing::info;

pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod recorder;
pub mod resources;
pub mod ring;
pub mod swapchain;
pub mod sync;
#[cfg(test)]
mod testing;
pub mod transfer;
pub mod transition;
pub mod uniforms;

pub use error::RenderError;

use frame::FrameEngine;
use ring::FrameRing;

const BUILTIN_VS: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/scene.vert.spv"));
const BUILTIN_FS: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/scene.frag.spv"));

/// Vertex/fragment modules compiled from this crate's GLSL at build time.
pub fn builtin_shaders() -> ShaderBinary {
    ShaderBinary::Split {
        vertex: BUILTIN_VS.to_vec(),
        fragment: BUILTIN_FS.to_vec(),
        entry: "main".to_owned(),
    }
}

pub struct VkRenderer {
    ring: FrameRing,
    engine: FrameEngine,
}

impl Renderer for VkRenderer {
    fn initialize(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: SceneAssets,
    ) -> Result<Self> {
        let engine = FrameEngine::new(window, display, size, settings, scene)
            .context("vulkan renderer initialization")?;
        Ok(Self {
            ring: FrameRing::new(),
            engine,
        })
    }

    fn notify_resized(&mut self) {
        self.ring.request_resize();
    }

    fn render_one_frame(&mut self, window: &mut dyn FramebufferSource) -> Result<FrameStatus> {
        // A rebuild abandoned earlier (window closed while minimized) is retried first.
        if !self.engine.swapchain_live() && !self.ring.rebuild(&mut self.engine, window)? {
            return Ok(FrameStatus::Skipped);
        }
        let status = self
            .ring
            .cycle(&mut self.engine, window)
            .context("frame cycle")?;
        Ok(status)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.engine.set_clear_color(rgba);
    }

    fn shutdown(self) -> Result<()> {
        self.engine
            .wait_idle()
            .context("draining the device before shutdown")?;
        drop(self);
        info!("vulkan renderer shut down");
        Ok(())
    }
}
