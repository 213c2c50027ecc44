// SPDX-License-Identifier: CEPL-1.0
//! Command pool plus the blocking one-shot submissions used for uploads.

use ash::vk;
use bytemuck::Pod;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{RenderError, Result};
use crate::memory::{check_transfer, image_byte_len, GpuBuffer, GpuImage};
use crate::transition::record_transition;

/// Pool on the device's queue family. Buffers can be reset individually.
pub struct CommandPool {
    device: ash::Device,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.queue_family());
        let pool = unsafe { ctx.device().create_command_pool(&info, None)? };
        Ok(Self {
            device: ctx.device().clone(),
            pool,
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.allocate_command_buffers(&info)? })
    }

    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.pool, buffers) };
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// Records `record` into a fresh buffer, submits it and waits for the queue to drain.
pub fn submit_one_shot<F>(ctx: &DeviceContext, pool: &CommandPool, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let device = ctx.device();
    let cmds = pool.allocate(1)?;
    let cmd = cmds[0];

    let run = || -> Result<()> {
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin)? };
        record(cmd)?;
        unsafe { device.end_command_buffer(cmd)? };

        let submit = [vk::SubmitInfo::default().command_buffers(&cmds)];
        unsafe {
            device.queue_submit(ctx.queue(), &submit, vk::Fence::null())?;
            device.queue_wait_idle(ctx.queue())?;
        }
        Ok(())
    };
    let result = run();
    pool.free(&cmds);
    result
}

pub fn copy_buffer(
    ctx: &DeviceContext,
    pool: &CommandPool,
    src: &GpuBuffer,
    dst: &GpuBuffer,
    size: vk::DeviceSize,
) -> Result<()> {
    check_transfer(size, src.size().min(dst.size()))?;
    submit_one_shot(ctx, pool, |cmd| {
        let region = [vk::BufferCopy::default().size(size)];
        unsafe {
            ctx.device()
                .cmd_copy_buffer(cmd, src.handle(), dst.handle(), &region)
        };
        Ok(())
    })
}

fn staging(ctx: &DeviceContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<GpuBuffer> {
    GpuBuffer::new(
        ctx,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
}

/// Copies `bytes` into the start of `dst` through a transient host-visible staging
/// buffer. Blocks until the copy has completed; the staging buffer is released on return.
pub fn upload_via_staging(
    ctx: &DeviceContext,
    pool: &CommandPool,
    dst: &GpuBuffer,
    bytes: &[u8],
) -> Result<()> {
    let size = bytes.len() as vk::DeviceSize;
    check_transfer(size, dst.size())?;
    let stage = staging(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    stage.write(bytes)?;
    copy_buffer(ctx, pool, &stage, dst, size)?;
    debug!("staged {} bytes into {:?}", size, dst.handle());
    Ok(())
}

/// Device-local buffer holding `data`. `TRANSFER_DST` is added to `usage`.
pub fn create_device_local_buffer<T: Pod>(
    ctx: &DeviceContext,
    pool: &CommandPool,
    data: &[T],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let dst = GpuBuffer::new(
        ctx,
        bytes.len() as vk::DeviceSize,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    upload_via_staging(ctx, pool, &dst, bytes)?;
    Ok(dst)
}

/// Downloads the first `len` bytes of `src`. Requires `TRANSFER_SRC` on `src`.
pub fn read_back_via_staging(
    ctx: &DeviceContext,
    pool: &CommandPool,
    src: &GpuBuffer,
    len: usize,
) -> Result<Vec<u8>> {
    let size = len as vk::DeviceSize;
    check_transfer(size, src.size())?;
    let stage = staging(ctx, size, vk::BufferUsageFlags::TRANSFER_DST)?;
    copy_buffer(ctx, pool, src, &stage, size)?;
    stage.read(len)
}

/// Fills `image` (fresh, `UNDEFINED`) with tightly packed `pixels` and leaves it in
/// `SHADER_READ_ONLY_OPTIMAL`.
pub fn upload_image(
    ctx: &DeviceContext,
    pool: &CommandPool,
    image: &GpuImage,
    pixels: &[u8],
) -> Result<()> {
    let expected = image_byte_len(image.extent(), image.format())?;
    if pixels.len() as u64 != expected {
        return Err(RenderError::TransferSize {
            len: pixels.len() as u64,
            capacity: expected,
        });
    }
    let stage = staging(
        ctx,
        pixels.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    stage.write(pixels)?;

    let device = ctx.device();
    let extent = image.extent();
    submit_one_shot(ctx, pool, |cmd| {
        record_transition(
            device,
            cmd,
            image.handle(),
            image.format(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        let region = [vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })];
        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                stage.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &region,
            )
        };
        record_transition(
            device,
            cmd,
            image.handle(),
            image.format(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    })
}
