// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no physical device satisfies the API version, queue, extension and feature requirements")]
    NoSuitableDevice,

    #[error("no queue family supports both graphics and presentation to the surface")]
    QueueUnavailable,

    #[error("no memory type in bits {type_bits:#034b} has properties {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("out of memory: {0}")]
    OutOfMemory(vk::Result),

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("swapchain presentation failed: {0}")]
    Presentation(vk::Result),

    #[error("shader binary rejected: {0}")]
    Shader(String),

    #[error("scene asset rejected: {0}")]
    InvalidAsset(String),

    #[error("transfer of {len} bytes rejected for a {capacity}-byte target")]
    TransferSize { len: u64, capacity: u64 },

    #[error("no depth format with optimal-tiling attachment support")]
    NoDepthFormat,

    #[error("window handle unavailable: {0}")]
    Surface(#[from] raw_window_handle::HandleError),

    #[error("vulkan call failed: {0}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for RenderError {
    fn from(r: vk::Result) -> Self {
        match r {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_MEMORY_MAP_FAILED => RenderError::OutOfMemory(r),
            other => RenderError::Vulkan(other),
        }
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_failures_classify_as_oom() {
        for r in [
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            vk::Result::ERROR_MEMORY_MAP_FAILED,
        ] {
            assert!(matches!(RenderError::from(r), RenderError::OutOfMemory(_)));
        }
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_DEVICE_LOST),
            RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST)
        ));
    }

    #[test]
    fn transition_error_names_both_layouts() {
        let e = RenderError::UnsupportedTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        let msg = e.to_string();
        assert!(msg.contains("GENERAL"));
        assert!(msg.contains("PRESENT_SRC_KHR"));
    }

    #[test]
    fn transfer_size_reports_both_lengths() {
        let msg = RenderError::TransferSize {
            len: 64,
            capacity: 16,
        }
        .to_string();
        assert!(msg.contains("64 bytes"));
        assert!(msg.contains("16-byte"));
    }
}
