// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::Result;
use crate::transition::record_transition;

/// The swapchain image being drawn plus the frame slot's own depth attachment.
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub depth_view: vk::ImageView,
}

#[derive(Clone, Copy, Debug)]
pub struct DrawCall {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    /// `(buffer, count)` of u16 indices; `None` draws vertices in order.
    pub index: Option<(vk::Buffer, u32)>,
}

/// Records a whole frame into `cmd`, which must be reset and not pending.
///
/// The image enters as `UNDEFINED` (previous contents are discarded by the clear)
/// and leaves as `PRESENT_SRC_KHR`.
pub fn record_frame(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &FrameTarget,
    draw: &DrawCall,
    clear: [f32; 4],
) -> Result<()> {
    let begin = vk::CommandBufferBeginInfo::default();
    unsafe { device.begin_command_buffer(cmd, &begin)? };

    record_transition(
        device,
        cmd,
        target.image,
        target.format,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )?;

    let color = [vk::RenderingAttachmentInfo::default()
        .image_view(target.view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: clear },
        })];
    let depth = vk::RenderingAttachmentInfo::default()
        .image_view(target.depth_view)
        .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: target.extent,
    };
    let rendering = vk::RenderingInfo::default()
        .render_area(area)
        .layer_count(1)
        .color_attachments(&color)
        .depth_attachment(&depth);

    let viewport = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: target.extent.width as f32,
        height: target.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissor = [area];
    let sets = [draw.descriptor_set];
    let vertex_buffers = [draw.vertex_buffer];
    let offsets = [0_u64];

    unsafe {
        device.cmd_begin_rendering(cmd, &rendering);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
        device.cmd_set_viewport(cmd, 0, &viewport);
        device.cmd_set_scissor(cmd, 0, &scissor);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            draw.layout,
            0,
            &sets,
            &[],
        );
        device.cmd_bind_vertex_buffers(cmd, 0, &vertex_buffers, &offsets);
        match draw.index {
            Some((buffer, count)) => {
                device.cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT16);
                device.cmd_draw_indexed(cmd, count, 1, 0, 0, 0);
            }
            None => device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0),
        }
        device.cmd_end_rendering(cmd);
    }

    record_transition(
        device,
        cmd,
        target.image,
        target.format,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    )?;

    unsafe { device.end_command_buffer(cmd)? };
    Ok(())
}
