//! Blocking uploads into device-local memory.
//!
//! Each function fills a host-visible staging buffer, records the copy
//! through [`ImmediateSubmit`] and returns once the GPU has executed it. The
//! staging buffer is dropped directly since the submission has completed by
//! then.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_renderer::mesh::MeshData;
//! use ember_renderer::upload;
//! use ember_rhi::device::Device;
//! use ember_rhi::immediate::ImmediateSubmit;
//!
//! # fn example(device: Arc<Device>, immediate: &mut ImmediateSubmit) -> ember_rhi::RhiResult<()> {
//! let cube = MeshData::cube();
//! let buffers = upload::upload_mesh(&device, immediate, &cube.vertices, &cube.indices)?;
//! assert_eq!(buffers.index_count, 36);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytemuck::Pod;
use tracing::debug;

use ember_rhi::buffer::{AllocatedBuffer, BufferUsage};
use ember_rhi::command::CommandBuffer;
use ember_rhi::device::Device;
use ember_rhi::image::{AllocatedImage, ImageDesc};
use ember_rhi::immediate::ImmediateSubmit;
use ember_rhi::{RhiError, RhiResult, vk};

use crate::gpu_data::Vertex;
use crate::mesh::GpuMeshBuffers;

/// Creates a device-local buffer of `usage` holding `data`.
pub fn upload_buffer<T: Pod>(
    device: &Arc<Device>,
    immediate: &mut ImmediateSubmit,
    usage: BufferUsage,
    data: &[T],
) -> RhiResult<AllocatedBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let staging = AllocatedBuffer::with_data(device.clone(), BufferUsage::Staging, bytes)?;
    let buffer = AllocatedBuffer::new(device.clone(), usage, bytes.len() as vk::DeviceSize)?;

    immediate.submit(|cmd| {
        let region = vk::BufferCopy::default().size(staging.size());
        CommandBuffer::from_handle(device.clone(), cmd).copy_buffer(
            staging.handle(),
            buffer.handle(),
            &[region],
        );
        Ok(())
    })?;

    debug!("Uploaded {} bytes as {}", bytes.len(), usage.name());
    Ok(buffer)
}

/// Uploads a mesh through one staging buffer holding vertices then indices.
///
/// # Errors
///
/// Returns [`RhiError::InvalidHandle`] for an empty vertex or index list.
pub fn upload_mesh(
    device: &Arc<Device>,
    immediate: &mut ImmediateSubmit,
    vertices: &[Vertex],
    indices: &[u32],
) -> RhiResult<GpuMeshBuffers> {
    if vertices.is_empty() || indices.is_empty() {
        return Err(RhiError::InvalidHandle(
            "mesh needs at least one vertex and one index".to_string(),
        ));
    }

    let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(indices);
    let vertex_size = vertex_bytes.len() as vk::DeviceSize;
    let index_size = index_bytes.len() as vk::DeviceSize;

    let vertex_buffer = AllocatedBuffer::new(device.clone(), BufferUsage::Vertex, vertex_size)?;
    let index_buffer = AllocatedBuffer::new(device.clone(), BufferUsage::Index, index_size)?;

    let staging =
        AllocatedBuffer::new(device.clone(), BufferUsage::Staging, vertex_size + index_size)?;
    staging.write_bytes(0, vertex_bytes)?;
    staging.write_bytes(vertex_size, index_bytes)?;

    immediate.submit(|cmd| {
        let cmd = CommandBuffer::from_handle(device.clone(), cmd);
        cmd.copy_buffer(
            staging.handle(),
            vertex_buffer.handle(),
            &[vk::BufferCopy::default().size(vertex_size)],
        );
        cmd.copy_buffer(
            staging.handle(),
            index_buffer.handle(),
            &[vk::BufferCopy::default()
                .src_offset(vertex_size)
                .size(index_size)],
        );
        Ok(())
    })?;

    debug!(
        "Uploaded mesh: {} vertices, {} indices",
        vertices.len(),
        indices.len()
    );

    Ok(GpuMeshBuffers {
        vertex_address: vertex_buffer.device_address(),
        index_count: indices.len() as u32,
        index_buffer,
        vertex_buffer,
    })
}

/// Creates an image from tightly packed texels and leaves it in
/// `SHADER_READ_ONLY_OPTIMAL`. Only mip 0 is written.
///
/// # Errors
///
/// Returns [`RhiError::InvalidHandle`] for an unsupported format or when
/// `texels` does not match the extent.
pub fn upload_image(
    device: &Arc<Device>,
    immediate: &mut ImmediateSubmit,
    texels: &[u8],
    desc: &ImageDesc,
) -> RhiResult<AllocatedImage> {
    let texel = texel_size(desc.format).ok_or_else(|| {
        RhiError::InvalidHandle(format!("no upload path for format {:?}", desc.format))
    })?;
    let expected = expected_len(desc.extent, texel);
    if texels.len() != expected {
        return Err(RhiError::InvalidHandle(format!(
            "{}: expected {expected} bytes of texels, got {}",
            desc.name,
            texels.len()
        )));
    }

    let staging = AllocatedBuffer::with_data(device.clone(), BufferUsage::Staging, texels)?;
    let desc = ImageDesc {
        usage: desc.usage | vk::ImageUsageFlags::TRANSFER_DST,
        ..*desc
    };
    let mut image = AllocatedImage::new(device.clone(), &desc)?;

    immediate.submit(|cmd| {
        let cmd = CommandBuffer::from_handle(device.clone(), cmd);
        image.discard_to(&cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        cmd.copy_buffer_to_image(staging.handle(), image.handle(), desc.extent);
        image.transition_from(
            &cmd,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    })?;

    debug!(
        "Uploaded image {}: {}x{}",
        desc.name, desc.extent.width, desc.extent.height
    );
    Ok(image)
}

/// Bytes per texel for the formats [`upload_image`] accepts.
pub fn texel_size(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

fn expected_len(extent: vk::Extent3D, texel: usize) -> usize {
    extent.width as usize * extent.height as usize * extent.depth as usize * texel
}

/// Packs a color into one RGBA8 texel.
pub fn pack_rgba8(color: [f32; 4]) -> u32 {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
    channel(color[0])
        | channel(color[1]) << 8
        | channel(color[2]) << 16
        | channel(color[3]) << 24
}

/// 16x16 magenta and black checkerboard in RGBA8.
pub fn checkerboard() -> Vec<u32> {
    let magenta = pack_rgba8([1.0, 0.0, 1.0, 1.0]);
    let black = pack_rgba8([0.0, 0.0, 0.0, 1.0]);
    (0..16 * 16)
        .map(|i| if ((i % 16) ^ (i / 16)) & 1 == 1 { magenta } else { black })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(vk::Format::R8G8B8A8_UNORM, Some(4))]
    #[case(vk::Format::B8G8R8A8_SRGB, Some(4))]
    #[case(vk::Format::R16G16B16A16_SFLOAT, Some(8))]
    #[case(vk::Format::R32G32B32A32_SFLOAT, Some(16))]
    #[case(vk::Format::D32_SFLOAT, None)]
    #[case(vk::Format::BC7_UNORM_BLOCK, None)]
    fn test_texel_size(#[case] format: vk::Format, #[case] expected: Option<usize>) {
        assert_eq!(texel_size(format), expected);
    }

    #[test]
    fn test_expected_len() {
        let extent = vk::Extent3D {
            width: 4,
            height: 2,
            depth: 1,
        };
        assert_eq!(expected_len(extent, 4), 32);
    }

    #[test]
    fn test_pack_rgba8() {
        assert_eq!(pack_rgba8([1.0, 1.0, 1.0, 1.0]), 0xFFFF_FFFF);
        assert_eq!(pack_rgba8([1.0, 0.0, 0.0, 1.0]), 0xFF00_00FF);
        assert_eq!(pack_rgba8([2.0, -1.0, 0.0, 0.0]), 0x0000_00FF);
    }

    #[test]
    fn test_checkerboard_alternates() {
        let board = checkerboard();
        assert_eq!(board.len(), 256);
        assert_ne!(board[0], board[1]);
        assert_ne!(board[0], board[16]);
        assert_eq!(board[0], board[17]);
    }
}
