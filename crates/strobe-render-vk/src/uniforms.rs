// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::device::DeviceContext;
use crate::error::Result;
use crate::memory::GpuBuffer;

/// Layout of the vertex-stage uniform block at binding 0 (std140, column-major).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MatrixUniforms {
    pub world: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub wvp: [[f32; 4]; 4],
}

impl MatrixUniforms {
    /// The scene turns about Z at 90 degrees per second, seen from (2, 2, 2) with Z up.
    pub fn spinning(elapsed_secs: f32, aspect: f32) -> Self {
        let world = Mat4::from_rotation_z(elapsed_secs * 90f32.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down.
        proj.y_axis.y *= -1.0;
        let wvp = proj * view * world;
        Self {
            world: world.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            wvp: wvp.to_cols_array_2d(),
        }
    }
}

/// One host-coherent uniform buffer per frame slot, mapped for the buffers' lifetime.
pub struct UniformRing {
    buffers: Vec<GpuBuffer>,
    mapped: Vec<*mut u8>,
}

impl UniformRing {
    pub fn new(ctx: &DeviceContext, slots: usize) -> Result<Self> {
        let size = std::mem::size_of::<MatrixUniforms>() as vk::DeviceSize;
        let mut buffers = Vec::with_capacity(slots);
        let mut mapped = Vec::with_capacity(slots);
        for _ in 0..slots {
            let buf = GpuBuffer::new(
                ctx,
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            mapped.push(buf.map()?);
            buffers.push(buf);
        }
        Ok(Self { buffers, mapped })
    }

    /// `(buffer, range)` per slot, for descriptor writes.
    pub fn bindings(&self) -> Vec<(vk::Buffer, vk::DeviceSize)> {
        self.buffers.iter().map(|b| (b.handle(), b.size())).collect()
    }

    /// The caller guarantees the slot's previous submission has retired.
    pub fn write(&mut self, slot: usize, value: &MatrixUniforms) {
        let bytes = bytemuck::bytes_of(value);
        // SAFETY: the mapping is live and sized for one `MatrixUniforms`.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped[slot], bytes.len()) };
    }
}

impl Drop for UniformRing {
    fn drop(&mut self) {
        for b in &self.buffers {
            b.unmap();
        }
    }
}
