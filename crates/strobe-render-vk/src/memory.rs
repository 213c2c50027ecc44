// SPDX-License-Identifier: CEPL-1.0
//! Buffers and images paired with their dedicated memory.
//!
//! Every allocation is a handle + memory pair owned by one value; dropping the value
//! destroys the handle and frees the memory. If any step after the handle is created
//! fails, whatever was created is released before the error is returned.

use ash::vk;
use tracing::trace;

use crate::device::DeviceContext;
use crate::error::{RenderError, Result};

/// Rejects empty transfers and transfers larger than the target.
pub fn check_transfer(len: u64, capacity: u64) -> Result<()> {
    if len == 0 || len > capacity {
        return Err(RenderError::TransferSize { len, capacity });
    }
    Ok(())
}

/// Bytes in a tightly packed copy of a whole image. Only 4-byte color formats are known.
pub fn image_byte_len(extent: vk::Extent2D, format: vk::Format) -> Result<u64> {
    let texel: u64 = match format {
        vk::Format::R8G8B8A8_SRGB
        | vk::Format::R8G8B8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM => 4,
        other => {
            return Err(RenderError::InvalidAsset(format!(
                "no texel size known for {other:?}"
            )))
        }
    };
    Ok(u64::from(extent.width) * u64::from(extent.height) * texel)
}

pub struct GpuBuffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Exclusive-sharing buffer bound to memory of the first compatible type.
    pub fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(RenderError::TransferSize {
                len: 0,
                capacity: 0,
            });
        }
        let device = ctx.device();
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&info, None)? };

        let memory = match unsafe { bind_buffer_memory(ctx, buffer, props) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        trace!("buffer {:?}: {} bytes, {:?}, {:?}", buffer, size, usage, props);

        Ok(Self {
            device: device.clone(),
            buffer,
            memory,
            size,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Maps the whole buffer. Only valid for host-visible memory.
    pub fn map(&self) -> Result<*mut u8> {
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?
        };
        Ok(ptr.cast())
    }

    pub fn unmap(&self) {
        unsafe { self.device.unmap_memory(self.memory) };
    }

    /// Map, copy `bytes` at offset 0, unmap. Host-coherent memory needs no flush.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        check_transfer(bytes.len() as u64, self.size)?;
        let dst = self.map()?;
        // SAFETY: the mapping covers `size` bytes and `bytes` was checked to fit.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        self.unmap();
        Ok(())
    }

    /// Map, copy `len` bytes out, unmap.
    pub fn read(&self, len: usize) -> Result<Vec<u8>> {
        check_transfer(len as u64, self.size)?;
        let src = self.map()?;
        let mut out = vec![0u8; len];
        // SAFETY: as in `write`.
        unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), len) };
        self.unmap();
        Ok(out)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

unsafe fn bind_buffer_memory(
    ctx: &DeviceContext,
    buffer: vk::Buffer,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let device = ctx.device();
    let req = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory = allocate(ctx, req, props)?;
    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe { device.free_memory(memory, None) };
        return Err(e.into());
    }
    Ok(memory)
}

fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let type_index = ctx.find_memory_type(req.memory_type_bits, props)?;
    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(req.size)
        .memory_type_index(type_index);
    Ok(unsafe { ctx.device().allocate_memory(&info, None)? })
}

/// Parameters for a single-mip, single-layer 2D image.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub props: vk::MemoryPropertyFlags,
}

pub struct GpuImage {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl GpuImage {
    /// Starts in `UNDEFINED` layout.
    pub fn new(ctx: &DeviceContext, desc: &ImageDesc) -> Result<Self> {
        let device = ctx.device();
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&info, None)? };

        let bound = (|| -> Result<vk::DeviceMemory> {
            let req = unsafe { device.get_image_memory_requirements(image) };
            let memory = allocate(ctx, req, desc.props)?;
            if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
                unsafe { device.free_memory(memory, None) };
                return Err(e.into());
            }
            Ok(memory)
        })();
        let memory = match bound {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        Ok(Self {
            device: device.clone(),
            image,
            memory,
            format: desc.format,
            extent: desc.extent,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// 2D view over the whole image.
pub fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    Ok(unsafe { device.create_image_view(&info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_must_be_nonempty_and_fit() {
        assert!(check_transfer(16, 16).is_ok());
        assert!(check_transfer(1, 16).is_ok());
        assert!(matches!(
            check_transfer(64, 16),
            Err(RenderError::TransferSize {
                len: 64,
                capacity: 16
            })
        ));
        assert!(matches!(
            check_transfer(0, 16),
            Err(RenderError::TransferSize { len: 0, .. })
        ));
    }

    #[test]
    fn rgba_image_len_is_four_bytes_per_texel() {
        let extent = vk::Extent2D {
            width: 3,
            height: 5,
        };
        assert_eq!(image_byte_len(extent, vk::Format::R8G8B8A8_SRGB).unwrap(), 60);
        assert!(matches!(
            image_byte_len(extent, vk::Format::D32_SFLOAT),
            Err(RenderError::InvalidAsset(_))
        ));
    }

    #[test]
    fn large_extent_does_not_overflow() {
        let extent = vk::Extent2D {
            width: 65_536,
            height: 65_536,
        };
        assert_eq!(
            image_byte_len(extent, vk::Format::B8G8R8A8_UNORM).unwrap(),
            1u64 << 34
        );
    }
}
