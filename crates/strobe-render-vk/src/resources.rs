// SPDX-License-Identifier: CEPL-1.0
//! Scene-level GPU objects: the sampled texture, the depth attachment, mesh buffers.

use ash::vk;
use strobe_render::{MeshData, TextureData};
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{RenderError, Result};
use crate::memory::{create_image_view, GpuBuffer, GpuImage, ImageDesc};
use crate::transfer::{create_device_local_buffer, submit_one_shot, upload_image, CommandPool};
use crate::transition::{aspect_for, record_transition};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal-tiling features include depth-stencil attachment.
pub fn choose_depth_format(
    candidates: &[vk::Format],
    mut optimal_features: impl FnMut(vk::Format) -> vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&f| {
            optimal_features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(RenderError::NoDepthFormat)
}

pub struct Texture {
    device: ash::Device,
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl Texture {
    /// Uploads RGBA8 pixels into a device-local sRGB image left in shader-read layout.
    pub fn new(ctx: &DeviceContext, pool: &CommandPool, data: &TextureData) -> Result<Self> {
        if data.width == 0 || data.height == 0 || data.pixels.len() != data.expected_len() {
            return Err(RenderError::InvalidAsset(format!(
                "texture {}x{} with {} bytes of pixels",
                data.width,
                data.height,
                data.pixels.len()
            )));
        }

        let image = GpuImage::new(
            ctx,
            &ImageDesc {
                extent: vk::Extent2D {
                    width: data.width,
                    height: data.height,
                },
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                props: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
        )?;
        upload_image(ctx, pool, &image, &data.pixels)?;

        let device = ctx.device();
        let view = create_image_view(
            device,
            image.handle(),
            TEXTURE_FORMAT,
            vk::ImageAspectFlags::COLOR,
        )?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(ctx.limits().max_sampler_anisotropy)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);
        let sampler = match unsafe { device.create_sampler(&sampler_info, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { device.destroy_image_view(view, None) };
                return Err(e.into());
            }
        };

        debug!("texture {}x{} uploaded", data.width, data.height);
        Ok(Self {
            device: device.clone(),
            image,
            view,
            sampler,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
        }
    }
}

/// Depth attachment sized to the swapchain. Rebuilt with it.
pub struct DepthTarget {
    device: ash::Device,
    image: GpuImage,
    view: vk::ImageView,
}

impl DepthTarget {
    pub fn new(ctx: &DeviceContext, pool: &CommandPool, extent: vk::Extent2D) -> Result<Self> {
        let format = choose_depth_format(&DEPTH_CANDIDATES, |f| {
            ctx.format_properties(f).optimal_tiling_features
        })?;
        let image = GpuImage::new(
            ctx,
            &ImageDesc {
                extent,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                props: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
        )?;

        let device = ctx.device();
        let attachment = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        let view = create_image_view(device, image.handle(), format, aspect_for(attachment, format))?;

        let transitioned = submit_one_shot(ctx, pool, |cmd| {
            record_transition(
                device,
                cmd,
                image.handle(),
                format,
                vk::ImageLayout::UNDEFINED,
                attachment,
            )
        });
        if let Err(e) = transitioned {
            unsafe { device.destroy_image_view(view, None) };
            return Err(e);
        }

        debug!(
            "depth target {:?} {}x{}",
            format, extent.width, extent.height
        );
        Ok(Self {
            device: device.clone(),
            image,
            view,
        })
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for DepthTarget {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image_view(self.view, None) };
    }
}

pub struct MeshBuffers {
    vertices: GpuBuffer,
    vertex_count: u32,
    indices: Option<(GpuBuffer, u32)>,
}

impl MeshBuffers {
    pub fn new(ctx: &DeviceContext, pool: &CommandPool, mesh: &MeshData) -> Result<Self> {
        if mesh.vertices.is_empty() {
            return Err(RenderError::InvalidAsset("mesh has no vertices".into()));
        }
        let vertices = create_device_local_buffer(
            ctx,
            pool,
            &mesh.vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let indices = match &mesh.indices {
            Some(idx) if !idx.is_empty() => {
                if let Some(bad) = idx.iter().find(|&&i| i as usize >= mesh.vertices.len()) {
                    return Err(RenderError::InvalidAsset(format!(
                        "index {bad} out of range for {} vertices",
                        mesh.vertices.len()
                    )));
                }
                let buf =
                    create_device_local_buffer(ctx, pool, idx, vk::BufferUsageFlags::INDEX_BUFFER)?;
                Some((buf, idx.len() as u32))
            }
            _ => None,
        };
        Ok(Self {
            vertices,
            vertex_count: mesh.vertices.len() as u32,
            indices,
        })
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.handle()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index(&self) -> Option<(vk::Buffer, u32)> {
        self.indices.as_ref().map(|(b, n)| (b.handle(), *n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_format_is_first_supported_candidate() {
        let only_packed = |f: vk::Format| {
            if f == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        };
        assert_eq!(
            choose_depth_format(&DEPTH_CANDIDATES, only_packed).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );

        let all = |_: vk::Format| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            choose_depth_format(&DEPTH_CANDIDATES, all).unwrap(),
            vk::Format::D32_SFLOAT
        );
    }

    #[test]
    fn no_depth_capable_format_is_an_error() {
        let none = |_: vk::Format| vk::FormatFeatureFlags::empty();
        assert!(matches!(
            choose_depth_format(&DEPTH_CANDIDATES, none),
            Err(RenderError::NoDepthFormat)
        ));
    }
}
