// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline for dynamic rendering, built from opaque SPIR-V.

use std::ffi::CString;
use std::io::Cursor;
use std::mem::{offset_of, size_of};

use ash::util::read_spv;
use ash::vk;
use strobe_render::{ShaderBinary, Vertex};
use tracing::debug;

use crate::error::{RenderError, Result};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decodes a SPIR-V blob into words, rejecting anything without the SPIR-V magic.
pub fn shader_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(RenderError::Shader("empty module".into()));
    }
    let words = read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RenderError::Shader(format!("unreadable module: {e}")))?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        _ => Err(RenderError::Shader("missing SPIR-V magic number".into())),
    }
}

fn entry_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| RenderError::Shader(format!("bad entry point name {name:?}")))
}

pub fn vertex_bindings() -> [vk::VertexInputBindingDescription; 1] {
    [vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }]
}

pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, uv) as u32,
        },
    ]
}

/// Shader modules for one build. Destroyed once the pipeline exists.
struct StageModules {
    device: ash::Device,
    modules: Vec<vk::ShaderModule>,
}

impl StageModules {
    fn load(&mut self, bytes: &[u8]) -> Result<vk::ShaderModule> {
        let words = shader_words(bytes)?;
        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { self.device.create_shader_module(&info, None)? };
        self.modules.push(module);
        Ok(module)
    }
}

impl Drop for StageModules {
    fn drop(&mut self) {
        for m in self.modules.drain(..) {
            unsafe { self.device.destroy_shader_module(m, None) };
        }
    }
}

pub struct GraphicsPipeline {
    device: ash::Device,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    color_format: vk::Format,
}

impl GraphicsPipeline {
    pub fn new(
        device: &ash::Device,
        shader: &ShaderBinary,
        set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let mut stage_modules = StageModules {
            device: device.clone(),
            modules: Vec::with_capacity(2),
        };
        let (vs, fs, vs_entry, fs_entry) = match shader {
            ShaderBinary::Combined {
                spirv,
                vertex_entry,
                fragment_entry,
            } => {
                let module = stage_modules.load(spirv)?;
                (module, module, entry_name(vertex_entry)?, entry_name(fragment_entry)?)
            }
            ShaderBinary::Split {
                vertex,
                fragment,
                entry,
            } => (
                stage_modules.load(vertex)?,
                stage_modules.load(fragment)?,
                entry_name(entry)?,
                entry_name(entry)?,
            ),
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vs)
                .name(&vs_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fs)
                .name(&fs_entry),
        ];

        let bindings = vertex_bindings();
        let attributes = vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dyn_states);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let raster = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(
                vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            )
            .blend_enable(false)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

        let color_formats = [color_format];
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .push_next(&mut rendering)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&raster)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout);

        let pipeline = match unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        } {
            Ok(p) => p[0],
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(err.into());
            }
        };
        debug!(
            "graphics pipeline built for {:?} + depth {:?}",
            color_format, depth_format
        );

        Ok(Self {
            device: device.clone(),
            layout,
            pipeline,
            color_format,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_well_formed_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0400, 0, 8, 0]);
        assert_eq!(shader_words(&bytes).unwrap().len(), 5);
    }

    #[test]
    fn rejects_empty_misaligned_and_foreign_blobs() {
        assert!(matches!(shader_words(&[]), Err(RenderError::Shader(_))));
        assert!(matches!(
            shader_words(&[0x03, 0x02, 0x23]),
            Err(RenderError::Shader(_))
        ));
        let not_spirv = words_to_bytes(&[0xDEAD_BEEF, 0, 0, 0, 0]);
        assert!(matches!(
            shader_words(&not_spirv),
            Err(RenderError::Shader(_))
        ));
    }

    #[test]
    fn interior_nul_in_entry_name_is_rejected() {
        assert!(entry_name("vertMain").is_ok());
        assert!(matches!(entry_name("vert\0Main"), Err(RenderError::Shader(_))));
    }

    #[test]
    fn attribute_offsets_follow_vertex_layout() {
        let attrs = vertex_attributes();
        let offsets: Vec<u32> = attrs.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(vertex_bindings()[0].stride, 32);
    }
}
