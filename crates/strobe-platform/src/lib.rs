// SPDX-License-Identifier: CEPL-1.0
//! winit window host driven cooperatively: the caller pumps events between frames
//! instead of handing control to `run_app`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use strobe_render::{FramebufferSource, RenderSize};
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowId};

pub use winit;

#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "strobe".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

struct HostState {
    config: WindowConfig,
    window: Option<Window>,
    size: RenderSize,
    resized: bool,
    close: bool,
    create_error: Option<String>,
}

impl ApplicationHandler for HostState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                self.size = render_size(window.inner_size());
                info!("window '{}' {}x{}", self.config.title, self.size.width, self.size.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window.as_ref().map(|w| w.id()) != Some(id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                debug!("close requested");
                self.close = true;
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                self.size = render_size(new_size);
                self.resized = true;
                debug!("resized to {}x{}", new_size.width, new_size.height);
            }
            _ => {}
        }
    }
}

pub struct WindowHost {
    event_loop: EventLoop<()>,
    state: HostState,
}

impl WindowHost {
    /// Creates the event loop and pumps it until the window exists.
    pub fn open(config: WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let mut host = Self {
            event_loop,
            state: HostState {
                config,
                window: None,
                size: RenderSize {
                    width: 0,
                    height: 0,
                },
                resized: false,
                close: false,
                create_error: None,
            },
        };
        while host.state.window.is_none() {
            host.pump(Some(Duration::from_millis(16)));
            if let Some(e) = host.state.create_error.take() {
                return Err(anyhow!("window creation failed: {e}"));
            }
            if host.state.close {
                return Err(anyhow!("event loop exited before the window was created"));
            }
        }
        Ok(host)
    }

    /// Dispatches pending events. `None` blocks until at least one arrives.
    pub fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            debug!("event loop exit ({code})");
            self.state.close = true;
        }
    }

    pub fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    /// Returns and clears the resized flag.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    pub fn exit_requested(&self) -> bool {
        self.state.close
    }

    /// Drops the window; the event loop stays alive until the host is dropped.
    pub fn close_window(&mut self) {
        self.state.window = None;
    }
}

impl FramebufferSource for WindowHost {
    fn framebuffer_size(&self) -> RenderSize {
        match &self.state.window {
            Some(w) => render_size(w.inner_size()),
            None => self.state.size,
        }
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn close_requested(&self) -> bool {
        self.state.close
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_size_maps_to_degenerate_render_size() {
        assert!(render_size(PhysicalSize::new(0, 0)).is_degenerate());
        assert_eq!(
            render_size(PhysicalSize::new(800, 600)),
            RenderSize {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn default_window_is_nonzero() {
        let cfg = WindowConfig::default();
        assert!(cfg.width > 0 && cfg.height > 0);
    }
}
