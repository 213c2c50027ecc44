// SPDX-License-Identifier: CEPL-1.0
//! The acquire → record → submit → present cycle over a ring of frame slots.
//!
//! Two indices advance independently:
//! - `current_frame` (mod [`MAX_FRAMES_IN_FLIGHT`]) picks the slot: command buffer,
//!   fence and uniform buffer.
//! - `semaphore_index` (mod swapchain image count) picks the acquire semaphore. The
//!   render-finished semaphore is picked by the acquired image index instead.
//!
//! The Vulkan calls live behind [`FrameDriver`] so the protocol can be exercised
//! without a device.

use strobe_render::{FrameStatus, FramebufferSource};
use tracing::debug;

use crate::error::Result;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// One step of the frame protocol each. Failures other than out-of-date and
/// suboptimal are errors.
pub trait FrameDriver {
    fn image_count(&self) -> usize;

    /// Blocks until the slot's fence is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    fn acquire(&mut self, semaphore: usize) -> Result<AcquireOutcome>;

    fn update_uniforms(&mut self, slot: usize) -> Result<()>;

    /// Resets the slot's fence and command buffer.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    fn submit(&mut self, slot: usize, image_index: u32, semaphore: usize) -> Result<()>;

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;

    fn invalidate(&mut self);

    /// Rebuilds the swapchain and everything sized by it. `false` if abandoned.
    fn recreate(&mut self, window: &mut dyn FramebufferSource) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct FrameRing {
    current_frame: usize,
    semaphore_index: usize,
    resize_requested: bool,
}

impl FrameRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumed at the next present.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn semaphore_index(&self) -> usize {
        self.semaphore_index
    }

    pub fn cycle(
        &mut self,
        driver: &mut dyn FrameDriver,
        window: &mut dyn FramebufferSource,
    ) -> Result<FrameStatus> {
        let slot = self.current_frame;
        driver.wait_for_slot(slot)?;

        let (image_index, acquire_suboptimal) = match driver.acquire(self.semaphore_index)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("acquire: out of date, rebuilding before any submission");
                driver.invalidate();
                self.rebuild(driver, window)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        driver.update_uniforms(slot)?;
        driver.reset_slot(slot)?;
        driver.record(slot, image_index)?;
        driver.submit(slot, image_index, self.semaphore_index)?;
        let presented = driver.present(image_index)?;

        self.current_frame = (slot + 1) % MAX_FRAMES_IN_FLIGHT;

        let resized = std::mem::take(&mut self.resize_requested);
        let rebuild = acquire_suboptimal || resized || presented != PresentOutcome::Presented;
        if rebuild {
            debug!(
                "present: {:?} (acquire suboptimal={}, resized={}), rebuilding",
                presented, acquire_suboptimal, resized
            );
            if presented == PresentOutcome::OutOfDate {
                driver.invalidate();
            }
            let rebuilt = self.rebuild(driver, window)?;
            return Ok(FrameStatus::Presented {
                swapchain_rebuilt: rebuilt,
            });
        }

        self.semaphore_index = (self.semaphore_index + 1) % driver.image_count().max(1);
        Ok(FrameStatus::Presented {
            swapchain_rebuilt: false,
        })
    }

    /// Rebuilds through the driver outside a cycle. `false` if abandoned.
    pub fn rebuild(
        &mut self,
        driver: &mut dyn FrameDriver,
        window: &mut dyn FramebufferSource,
    ) -> Result<bool> {
        let rebuilt = driver.recreate(window)?;
        if rebuilt {
            // Per-image semaphores were recreated along with the chain.
            self.semaphore_index = 0;
        }
        Ok(rebuilt)
    }
}
