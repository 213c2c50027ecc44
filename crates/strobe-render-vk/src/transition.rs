// SPDX-License-Identifier: CEPL-1.0
//! The fixed table of image layout transitions the renderer uses.
//!
//! Each (old, new) pair maps to one access/stage policy. Pairs outside the table are
//! rejected rather than guessed at.

use ash::vk;

use crate::error::{RenderError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
}

pub fn policy_for(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionPolicy> {
    use vk::AccessFlags2 as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags2 as S;

    let p = |src_access, dst_access, src_stage, dst_stage| TransitionPolicy {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    };

    let policy = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            p(A::NONE, A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => p(
            A::TRANSFER_WRITE,
            A::SHADER_READ,
            S::TRANSFER,
            S::FRAGMENT_SHADER,
        ),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => p(
            A::NONE,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => p(
            A::NONE,
            A::COLOR_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => p(
            A::COLOR_ATTACHMENT_WRITE,
            A::NONE,
            S::COLOR_ATTACHMENT_OUTPUT,
            S::BOTTOM_OF_PIPE,
        ),
        _ => return Err(RenderError::UnsupportedTransition { old, new }),
    };
    Ok(policy)
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspect mask for the target layout. Depth targets include stencil when the format has it.
pub fn aspect_for(new: vk::ImageLayout, format: vk::Format) -> vk::ImageAspectFlags {
    if new == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Records one whole-image barrier from `old` to `new` into `cmd`.
///
/// `format` only matters for depth targets. Nothing is recorded on error.
pub fn record_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let policy = policy_for(old, new)?;
    let barrier = [vk::ImageMemoryBarrier2::default()
        .src_stage_mask(policy.src_stage)
        .src_access_mask(policy.src_access)
        .dst_stage_mask(policy.dst_stage)
        .dst_access_mask(policy.dst_access)
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect_for(new, format),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })];
    let dep = vk::DependencyInfo::default().image_memory_barriers(&barrier);
    unsafe { device.cmd_pipeline_barrier2(cmd, &dep) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::AccessFlags2 as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags2 as S;

    #[test]
    fn upload_pair_is_transfer_scoped() {
        let p = policy_for(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(p.src_access, A::NONE);
        assert_eq!(p.dst_access, A::TRANSFER_WRITE);
        assert_eq!(p.src_stage, S::TOP_OF_PIPE);
        assert_eq!(p.dst_stage, S::TRANSFER);

        let p = policy_for(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(p.src_access, A::TRANSFER_WRITE);
        assert_eq!(p.dst_access, A::SHADER_READ);
        assert_eq!(p.src_stage, S::TRANSFER);
        assert_eq!(p.dst_stage, S::FRAGMENT_SHADER);
    }

    #[test]
    fn depth_pair_waits_for_early_tests() {
        let p = policy_for(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(
            p.dst_access,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(p.dst_stage, S::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn frame_pairs_bracket_color_output() {
        let enter = policy_for(L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(enter.dst_access, A::COLOR_ATTACHMENT_WRITE);
        assert_eq!(enter.dst_stage, S::COLOR_ATTACHMENT_OUTPUT);

        let leave = policy_for(L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR).unwrap();
        assert_eq!(leave.src_access, A::COLOR_ATTACHMENT_WRITE);
        assert_eq!(leave.src_stage, S::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(leave.dst_access, A::NONE);
        assert_eq!(leave.dst_stage, S::BOTTOM_OF_PIPE);
    }

    #[test]
    fn pairs_outside_the_table_are_rejected() {
        for (old, new) in [
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
            (L::PRESENT_SRC_KHR, L::COLOR_ATTACHMENT_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR),
            (L::GENERAL, L::GENERAL),
            (L::UNDEFINED, L::UNDEFINED),
        ] {
            match policy_for(old, new) {
                Err(RenderError::UnsupportedTransition { old: o, new: n }) => {
                    assert_eq!((o, n), (old, new))
                }
                other => panic!("{old:?} -> {new:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn depth_aspect_tracks_stencil() {
        let depth = L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(
            aspect_for(depth, vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for(depth, vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for(L::TRANSFER_DST_OPTIMAL, vk::Format::R8G8B8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }
}
