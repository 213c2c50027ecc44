// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::Result;
use crate::ring::MAX_FRAMES_IN_FLIGHT;
use crate::transfer::CommandPool;

/// Per-slot recording state. The fence is created signaled so the first wait passes.
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub in_flight: vk::Fence,
}

/// One value per frame slot, built in slot order. Resources written by the GPU during
/// a frame (the depth attachment) live here so two frames in flight never share one.
pub struct PerSlot<T> {
    items: Vec<T>,
}

impl<T> PerSlot<T> {
    /// Stops at the first failure; values already built are dropped.
    pub fn try_new<E>(make: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let items = (0..MAX_FRAMES_IN_FLIGHT)
            .map(make)
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self { items })
    }

    pub fn get(&self, slot: usize) -> &T {
        &self.items[slot]
    }
}

/// Calls `adopt` on each item in order. If one fails, that item and every later one
/// go to `release_rest`, since nothing owns them yet.
fn adopt_each<T: Copy, E>(
    items: &[T],
    mut adopt: impl FnMut(T) -> Result<(), E>,
    release_rest: impl FnOnce(&[T]),
) -> Result<(), E> {
    for (i, &item) in items.iter().enumerate() {
        if let Err(e) = adopt(item) {
            release_rest(&items[i..]);
            return Err(e);
        }
    }
    Ok(())
}

/// Semaphores keyed by swapchain image.
pub struct ImageSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

/// Fences, semaphores and command buffers for the frame ring. Rebuilt wholesale
/// whenever the swapchain is, since the per-image semaphore count follows it.
pub struct FrameSync {
    device: ash::Device,
    pool: vk::CommandPool,
    pub slots: Vec<FrameSlot>,
    pub images: Vec<ImageSync>,
}

impl FrameSync {
    pub fn new(device: &ash::Device, pool: &CommandPool, image_count: usize) -> Result<Self> {
        let mut sync = Self {
            device: device.clone(),
            pool: pool.handle(),
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            images: Vec::with_capacity(image_count),
        };

        // Anything pushed before a failure is released by Drop.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let buffers = pool.allocate(MAX_FRAMES_IN_FLIGHT as u32)?;
        let slots = &mut sync.slots;
        adopt_each(
            &buffers,
            |command_buffer| -> Result<()> {
                let in_flight = unsafe { device.create_fence(&fence_info, None)? };
                slots.push(FrameSlot {
                    command_buffer,
                    in_flight,
                });
                Ok(())
            },
            |rest| pool.free(rest),
        )?;

        let sem_info = vk::SemaphoreCreateInfo::default();
        for _ in 0..image_count {
            let image_available = unsafe { device.create_semaphore(&sem_info, None)? };
            let render_finished = match unsafe { device.create_semaphore(&sem_info, None) } {
                Ok(s) => s,
                Err(e) => {
                    unsafe { device.destroy_semaphore(image_available, None) };
                    return Err(e.into());
                }
            };
            sync.images.push(ImageSync {
                image_available,
                render_finished,
            });
        }

        debug!(
            "frame sync: {} slots, {} image semaphore pairs",
            sync.slots.len(),
            sync.images.len()
        );
        Ok(sync)
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    pub fn image(&self, index: usize) -> &ImageSync {
        &self.images[index]
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            for s in self.images.drain(..) {
                self.device.destroy_semaphore(s.image_available, None);
                self.device.destroy_semaphore(s.render_finished, None);
            }
            let cmds: Vec<_> = self.slots.iter().map(|s| s.command_buffer).collect();
            for s in self.slots.drain(..) {
                self.device.destroy_fence(s.in_flight, None);
            }
            if !cmds.is_empty() {
                self.device.free_command_buffers(self.pool, &cmds);
            }
        }
    }
}
