// SPDX-License-Identifier: CEPL-1.0
//! Everything the frame ring drives, and the Vulkan side of each ring step.

use std::time::Instant;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use strobe_render::{FramebufferSource, RenderSettings, RenderSize, SceneAssets, ShaderBinary};
use tracing::{debug, info};

use crate::descriptors::{Descriptors, SampledImage};
use crate::device::{DeviceContext, DeviceRequirements};
use crate::error::{RenderError, Result};
use crate::instance::{InstanceContext, PresentTarget};
use crate::pipeline::GraphicsPipeline;
use crate::recorder::{record_frame, DrawCall, FrameTarget};
use crate::resources::{DepthTarget, MeshBuffers, Texture};
use crate::ring::{AcquireOutcome, FrameDriver, PresentOutcome, MAX_FRAMES_IN_FLIGHT};
use crate::swapchain::{SwapchainManager, SwapchainState};
use crate::sync::{FrameSync, PerSlot};
use crate::transfer::CommandPool;
use crate::uniforms::{MatrixUniforms, UniformRing};

/// GPU state for one window. Fields drop top to bottom, so dependents come first.
pub struct FrameEngine {
    frame_sync: FrameSync,
    pipeline: GraphicsPipeline,
    descriptors: Descriptors,
    uniforms: UniformRing,
    _texture: Texture,
    mesh: MeshBuffers,
    depth: PerSlot<DepthTarget>,
    swapchain: SwapchainManager,
    command_pool: CommandPool,
    device: DeviceContext,
    _target: PresentTarget,
    _instance: InstanceContext,

    shader: ShaderBinary,
    clear: [f32; 4],
    started: Instant,
}

impl FrameEngine {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: SceneAssets,
    ) -> Result<Self> {
        let raw_display = display.display_handle()?.as_raw();
        let instance = InstanceContext::new(&settings.app_name, Some(raw_display), settings.validation)?;
        let target = PresentTarget::new(&instance, window, display)?;
        let device = DeviceContext::new(&instance, Some(&target), &DeviceRequirements::presentation())?;
        let command_pool = CommandPool::new(&device)?;

        let mut swapchain = SwapchainManager::new(&device, &target, settings.present);
        swapchain.create(size)?;
        let depth = depth_targets(&device, &command_pool, swapchain.extent())?;

        let mesh = MeshBuffers::new(&device, &command_pool, &scene.mesh)?;
        let texture = Texture::new(&device, &command_pool, &scene.texture)?;
        let uniforms = UniformRing::new(&device, MAX_FRAMES_IN_FLIGHT)?;
        let descriptors = Descriptors::new(
            device.device(),
            &uniforms.bindings(),
            SampledImage {
                view: texture.view(),
                sampler: texture.sampler(),
            },
        )?;
        let pipeline = GraphicsPipeline::new(
            device.device(),
            &scene.shader,
            descriptors.layout(),
            swapchain.format(),
            depth.get(0).format(),
        )?;
        let frame_sync = FrameSync::new(device.device(), &command_pool, swapchain.image_count())?;

        info!(
            "renderer up: {} vertices, {} frames in flight",
            mesh.vertex_count(),
            MAX_FRAMES_IN_FLIGHT
        );
        Ok(Self {
            frame_sync,
            pipeline,
            descriptors,
            uniforms,
            _texture: texture,
            mesh,
            depth,
            swapchain,
            command_pool,
            device,
            _target: target,
            _instance: instance,
            shader: scene.shader,
            clear: settings.clear_color,
            started: Instant::now(),
        })
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    pub fn swapchain_live(&self) -> bool {
        self.swapchain.state() == SwapchainState::Live
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    fn ash(&self) -> &ash::Device {
        self.device.device()
    }
}

fn depth_targets(
    device: &DeviceContext,
    pool: &CommandPool,
    extent: vk::Extent2D,
) -> Result<PerSlot<DepthTarget>> {
    PerSlot::try_new(|_| DepthTarget::new(device, pool, extent))
}

impl Drop for FrameEngine {
    fn drop(&mut self) {
        self.device.wait_idle().ok();
    }
}

impl FrameDriver for FrameEngine {
    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = [self.frame_sync.slot(slot).in_flight];
        loop {
            match unsafe { self.ash().wait_for_fences(&fence, true, u64::MAX) } {
                Ok(()) => return Ok(()),
                Err(vk::Result::TIMEOUT) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn acquire(&mut self, semaphore: usize) -> Result<AcquireOutcome> {
        let sem = self.frame_sync.image(semaphore).image_available;
        let acquired = unsafe {
            self.swapchain.loader().acquire_next_image(
                self.swapchain.handle(),
                u64::MAX,
                sem,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderError::Presentation(e)),
        }
    }

    fn update_uniforms(&mut self, slot: usize) -> Result<()> {
        let extent = self.swapchain.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let value = MatrixUniforms::spinning(self.started.elapsed().as_secs_f32(), aspect);
        self.uniforms.write(slot, &value);
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let s = self.frame_sync.slot(slot);
        unsafe {
            self.ash().reset_fences(&[s.in_flight])?;
            self.ash()
                .reset_command_buffer(s.command_buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let target = FrameTarget {
            image: self.swapchain.image(image_index),
            view: self.swapchain.view(image_index),
            format: self.swapchain.format(),
            extent: self.swapchain.extent(),
            depth_view: self.depth.get(slot).view(),
        };
        let draw = DrawCall {
            pipeline: self.pipeline.handle(),
            layout: self.pipeline.layout(),
            descriptor_set: self.descriptors.set(slot),
            vertex_buffer: self.mesh.vertex_buffer(),
            vertex_count: self.mesh.vertex_count(),
            index: self.mesh.index(),
        };
        let cmd = self.frame_sync.slot(slot).command_buffer;
        record_frame(self.ash(), cmd, &target, &draw, self.clear)
    }

    fn submit(&mut self, slot: usize, image_index: u32, semaphore: usize) -> Result<()> {
        let s = self.frame_sync.slot(slot);
        let wait = [self.frame_sync.image(semaphore).image_available];
        let signal = [self.frame_sync.image(image_index as usize).render_finished];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let cmds = [s.command_buffer];
        let submit = [vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal)];
        unsafe {
            self.ash()
                .queue_submit(self.device.queue(), &submit, s.in_flight)?
        };
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let wait = [self.frame_sync.image(image_index as usize).render_finished];
        let swapchains = [self.swapchain.handle()];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.swapchain.loader().queue_present(self.device.queue(), &info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RenderError::Presentation(e)),
        }
    }

    fn invalidate(&mut self) {
        self.swapchain.invalidate();
    }

    fn recreate(&mut self, window: &mut dyn FramebufferSource) -> Result<bool> {
        let old_format = self.swapchain.format();
        if !self.swapchain.recreate(&self.device, window)? {
            debug!("swapchain rebuild abandoned: window closed while minimized");
            return Ok(false);
        }

        // Device is idle here; everything sized by the chain is rebuilt.
        self.depth = depth_targets(&self.device, &self.command_pool, self.swapchain.extent())?;
        if self.swapchain.format() != old_format || self.pipeline.color_format() != self.swapchain.format() {
            info!(
                "swapchain format {:?} -> {:?}, rebuilding pipeline",
                old_format,
                self.swapchain.format()
            );
            self.pipeline = GraphicsPipeline::new(
                self.device.device(),
                &self.shader,
                self.descriptors.layout(),
                self.swapchain.format(),
                self.depth.get(0).format(),
            )?;
        }
        self.frame_sync = FrameSync::new(
            self.device.device(),
            &self.command_pool,
            self.swapchain.image_count(),
        )?;
        Ok(true)
    }
}
