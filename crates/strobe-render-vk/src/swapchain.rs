// SPDX-License-Identifier: CEPL-1.0
//! The presentable image chain and its state machine.
//!
//! ```text
//!   Absent --create--> Live --invalidate--> Stale
//!     ^                  |                    |
//!     +----teardown------+--------------------+
//! ```
//!
//! `recreate` is always a full teardown followed by a fresh create, separated by a
//! device-idle wait. No old-swapchain handoff is attempted.

use ash::khr::{surface, swapchain};
use ash::vk;
use strobe_render::{FramebufferSource, PresentPreference, RenderSize};
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::Result;
use crate::instance::PresentTarget;
use crate::memory::create_image_view;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    Absent,
    Live,
    /// The presentation engine reported out-of-date; must be recreated before use.
    Stale,
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    assert!(!formats.is_empty(), "surface reports no formats");
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentPreference,
) -> vk::PresentModeKHR {
    assert!(
        modes.contains(&vk::PresentModeKHR::FIFO),
        "surface does not offer FIFO"
    );
    match preference {
        PresentPreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface dictates the extent unless it reports the `u32::MAX` sentinel, in which
/// case the framebuffer size is clamped into the supported range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Triple buffering when the surface allows it. `max_image_count == 0` means unbounded.
pub fn choose_min_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count.max(3);
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// Blocks on window events until the framebuffer has a non-zero extent.
/// `None` if the window was closed first.
pub fn wait_for_extent(window: &mut dyn FramebufferSource) -> Option<RenderSize> {
    loop {
        if window.close_requested() {
            return None;
        }
        let size = window.framebuffer_size();
        if !size.is_degenerate() {
            return Some(size);
        }
        window.wait_events();
    }
}

pub struct SwapchainManager {
    device: ash::Device,
    loader: swapchain::Device,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    preference: PresentPreference,

    state: SwapchainState,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl SwapchainManager {
    /// Starts `Absent`; call [`create`](Self::create) to build the first chain.
    pub fn new(ctx: &DeviceContext, target: &PresentTarget, preference: PresentPreference) -> Self {
        Self {
            device: ctx.device().clone(),
            loader: swapchain::Device::new(ctx.instance(), ctx.device()),
            surface_loader: target.loader().clone(),
            surface: target.handle(),
            phys: ctx.physical(),
            preference,
            state: SwapchainState::Absent,
            handle: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
        }
    }

    pub fn create(&mut self, desired: RenderSize) -> Result<()> {
        debug_assert_eq!(self.state, SwapchainState::Absent);
        let (caps, formats, modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_capabilities(self.phys, self.surface)?,
                self.surface_loader
                    .get_physical_device_surface_formats(self.phys, self.surface)?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(self.phys, self.surface)?,
            )
        };

        let format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes, self.preference);
        let extent = choose_extent(&caps, desired);
        let min_images = choose_min_image_count(&caps);

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(min_images)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe { self.loader.create_swapchain(&info, None)? };
        self.handle = handle;
        self.format = format;
        self.extent = extent;
        self.images = unsafe { self.loader.get_swapchain_images(handle)? };
        self.populate_views()?;
        self.state = SwapchainState::Live;

        info!(
            "swapchain: {:?}/{:?}, {:?}, {}x{}, {} images (min {})",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            self.images.len(),
            min_images
        );
        Ok(())
    }

    fn populate_views(&mut self) -> Result<()> {
        assert!(self.views.is_empty(), "swapchain views populated twice");
        for &image in &self.images {
            let view = create_image_view(
                &self.device,
                image,
                self.format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.views.push(view);
        }
        Ok(())
    }

    /// Destroys views and the chain. The caller ensures the device is idle.
    pub fn teardown(&mut self) {
        unsafe {
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
            }
        }
        self.handle = vk::SwapchainKHR::null();
        self.images.clear();
        self.state = SwapchainState::Absent;
    }

    pub fn invalidate(&mut self) {
        if self.state == SwapchainState::Live {
            debug!("swapchain marked stale");
            self.state = SwapchainState::Stale;
        }
    }

    /// Blocks on window events while the framebuffer is zero-sized, then rebuilds.
    ///
    /// Returns `false` (and leaves the chain stale) if the window closed while waiting.
    pub fn recreate(&mut self, ctx: &DeviceContext, window: &mut dyn FramebufferSource) -> Result<bool> {
        let Some(size) = wait_for_extent(window) else {
            self.invalidate();
            return Ok(false);
        };

        ctx.wait_idle()?;
        self.teardown();
        self.create(size)?;
        Ok(true)
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    pub fn view(&self, index: u32) -> vk::ImageView {
        self.views[index as usize]
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWindow;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 1000,
                height: 1000,
            },
            ..Default::default()
        }
    }

    fn size(width: u32, height: u32) -> RenderSize {
        RenderSize { width, height }
    }

    #[test]
    fn image_count_prefers_three_within_bounds() {
        assert_eq!(choose_min_image_count(&caps(1, 2)), 2);
        assert_eq!(choose_min_image_count(&caps(1, 0)), 3);
        assert_eq!(choose_min_image_count(&caps(4, 8)), 4);
        assert_eq!(choose_min_image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn present_mode_follows_availability() {
        let fifo = [vk::PresentModeKHR::FIFO];
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&fifo, PresentPreference::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&both, PresentPreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&both, PresentPreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    #[should_panic(expected = "FIFO")]
    fn missing_fifo_is_a_bug() {
        choose_present_mode(&[vk::PresentModeKHR::MAILBOX], PresentPreference::Mailbox);
    }

    #[test]
    fn sentinel_extent_clamps_framebuffer() {
        let c = caps(2, 3);
        assert_eq!(
            choose_extent(&c, size(400, 300)),
            vk::Extent2D {
                width: 400,
                height: 300
            }
        );
        assert_eq!(
            choose_extent(&c, size(50, 50)),
            vk::Extent2D {
                width: 100,
                height: 100
            }
        );
        assert_eq!(
            choose_extent(&c, size(4000, 20)),
            vk::Extent2D {
                width: 1000,
                height: 100
            }
        );
    }

    #[test]
    fn fixed_extent_wins_over_framebuffer() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        assert_eq!(choose_extent(&c, size(400, 300)), c.current_extent);
    }

    #[test]
    fn surface_format_prefers_srgb_bgra() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(
            choose_surface_format(&[unorm, srgb]).format,
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            choose_surface_format(&[unorm]).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    #[should_panic(expected = "no formats")]
    fn empty_format_list_is_a_bug() {
        choose_surface_format(&[]);
    }

    #[test]
    fn choices_are_stable_across_recreation() {
        let c = caps(2, 0);
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let first = (
            choose_min_image_count(&c),
            choose_surface_format(&formats).format,
            choose_extent(&c, size(800, 600)),
        );
        for _ in 0..3 {
            let again = (
                choose_min_image_count(&c),
                choose_surface_format(&formats).format,
                choose_extent(&c, size(800, 600)),
            );
            assert_eq!(again, first);
        }
    }

    #[test]
    fn visible_window_needs_no_wait() {
        let mut win = FakeWindow::sized(1024, 768);
        assert_eq!(wait_for_extent(&mut win), Some(size(1024, 768)));
        assert_eq!(win.waits, 0);
    }

    #[test]
    fn minimized_window_waits_until_restored() {
        let mut win = FakeWindow::sized(0, 0);
        win.sizes.extend([size(0, 0), size(640, 0), size(640, 480)]);
        assert_eq!(wait_for_extent(&mut win), Some(size(640, 480)));
        assert_eq!(win.waits, 3);
    }

    #[test]
    fn closing_while_minimized_gives_up() {
        let mut win = FakeWindow::sized(0, 0);
        win.sizes.push_back(size(0, 0));
        assert_eq!(wait_for_extent(&mut win), None);
        assert_eq!(win.waits, 2);
    }

    #[test]
    fn close_request_wins_over_a_valid_size() {
        let mut win = FakeWindow::visible();
        win.closed = true;
        assert_eq!(wait_for_extent(&mut win), None);
    }
}
