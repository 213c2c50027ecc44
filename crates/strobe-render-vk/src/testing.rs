// SPDX-License-Identifier: CEPL-1.0
//! Window stand-in shared by the unit tests.

use std::collections::VecDeque;

use strobe_render::{FramebufferSource, RenderSize};

/// Each `wait_events` moves to the next queued size; an empty queue means the user
/// closed the window.
pub struct FakeWindow {
    pub sizes: VecDeque<RenderSize>,
    pub current: RenderSize,
    pub waits: usize,
    pub closed: bool,
}

impl FakeWindow {
    pub fn visible() -> Self {
        Self::sized(800, 600)
    }

    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            sizes: VecDeque::new(),
            current: RenderSize { width, height },
            waits: 0,
            closed: false,
        }
    }
}

impl FramebufferSource for FakeWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.current
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        match self.sizes.pop_front() {
            Some(s) => self.current = s,
            None => self.closed = true,
        }
    }

    fn close_requested(&self) -> bool {
        self.closed
    }
}
