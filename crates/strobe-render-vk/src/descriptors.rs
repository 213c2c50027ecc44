// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::Result;

/// Set layout: binding 0 is the per-slot uniform buffer (vertex stage), binding 1 the
/// texture (fragment stage). One set per frame slot; nothing here depends on the
/// swapchain, so it survives recreation.
pub struct Descriptors {
    device: ash::Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

/// What binding 1 samples.
#[derive(Clone, Copy, Debug)]
pub struct SampledImage {
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Descriptors {
    pub fn new(
        device: &ash::Device,
        uniforms: &[(vk::Buffer, vk::DeviceSize)],
        texture: SampledImage,
    ) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };

        let mut out = Self {
            device: device.clone(),
            layout,
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
        };

        let count = uniforms.len() as u32;
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(count)
            .pool_sizes(&sizes);
        out.pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        let layouts = vec![layout; uniforms.len()];
        let alloc = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(out.pool)
            .set_layouts(&layouts);
        out.sets = unsafe { device.allocate_descriptor_sets(&alloc)? };

        for (&set, &(buffer, range)) in out.sets.iter().zip(uniforms) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            }];
            let image_info = [vk::DescriptorImageInfo {
                sampler: texture.sampler,
                image_view: texture.view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }];
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info),
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info),
            ];
            unsafe { device.update_descriptor_sets(&writes, &[]) };
        }

        Ok(out)
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.sets[slot]
    }
}

impl Drop for Descriptors {
    fn drop(&mut self) {
        unsafe {
            // Sets go with the pool.
            if self.pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.pool, None);
            }
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
