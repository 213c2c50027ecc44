// SPDX-License-Identifier: CEPL-1.0
//! Needs a Vulkan 1.3 device. Run with `cargo test -p strobe-render-vk -- --ignored`.

use ash::vk;
use strobe_render::Vertex;
use strobe_render_vk::device::{DeviceContext, DeviceRequirements};
use strobe_render_vk::instance::InstanceContext;
use strobe_render_vk::memory::GpuBuffer;
use strobe_render_vk::RenderError;
use strobe_render_vk::transfer::{
    create_device_local_buffer, read_back_via_staging, upload_via_staging, CommandPool,
};

fn headless() -> (InstanceContext, DeviceContext) {
    let instance = InstanceContext::new("strobe-tests", None, false).expect("instance");
    let device =
        DeviceContext::new(&instance, None, &DeviceRequirements::headless()).expect("device");
    (instance, device)
}

#[test]
#[ignore = "requires a Vulkan device"]
fn staged_bytes_read_back_unchanged() {
    let (_instance, ctx) = headless();
    let pool = CommandPool::new(&ctx).expect("pool");

    let payload: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
    let dst = GpuBuffer::new(
        &ctx,
        payload.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .expect("device-local buffer");

    upload_via_staging(&ctx, &pool, &dst, &payload).expect("upload");
    let back = read_back_via_staging(&ctx, &pool, &dst, payload.len()).expect("read back");
    assert_eq!(back, payload);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn vertex_upload_round_trips_through_device_memory() {
    let (_instance, ctx) = headless();
    let pool = CommandPool::new(&ctx).expect("pool");

    let verts = [
        Vertex {
            pos: [-0.5, -0.5, 0.0],
            color: [1.0, 0.0, 0.0],
            uv: [1.0, 0.0],
        },
        Vertex {
            pos: [0.5, 0.5, -0.5],
            color: [0.0, 0.0, 1.0],
            uv: [0.0, 1.0],
        },
    ];
    let buf = create_device_local_buffer(
        &ctx,
        &pool,
        &verts,
        vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
    )
    .expect("vertex buffer");

    let back = read_back_via_staging(&ctx, &pool, &buf, std::mem::size_of_val(&verts))
        .expect("read back");
    let expected: &[u8] = bytemuck::cast_slice(&verts);
    assert_eq!(back, expected);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn impossible_memory_request_is_reported() {
    let (_instance, ctx) = headless();
    let err = ctx
        .find_memory_type(0, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::NoMemoryType { type_bits: 0, .. }
    ));
}

#[test]
#[ignore = "requires a Vulkan device"]
fn oversized_and_empty_uploads_are_rejected() {
    let (_instance, ctx) = headless();
    let pool = CommandPool::new(&ctx).expect("pool");
    let dst = GpuBuffer::new(
        &ctx,
        16,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .expect("16-byte buffer");

    let err = upload_via_staging(&ctx, &pool, &dst, &[0u8; 64]).unwrap_err();
    assert!(matches!(
        err,
        RenderError::TransferSize {
            len: 64,
            capacity: 16
        }
    ));
    assert!(upload_via_staging(&ctx, &pool, &dst, &[]).is_err());
    assert!(read_back_via_staging(&ctx, &pool, &dst, 17).is_err());
    assert!(GpuBuffer::new(
        &ctx,
        0,
        vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL
    )
    .is_err());
}
