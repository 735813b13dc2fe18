//! GPU buffers backed by gpu-allocator.
//!
//! [`BufferUsage`] picks the Vulkan usage flags and memory location for each
//! kind of buffer the renderer creates. [`AllocatedBuffer`] owns the
//! `VkBuffer` and its allocation; it can be dropped directly when the GPU is
//! known to be idle, or [`retired`](AllocatedBuffer::retire) into a
//! [`DeletionQueue`] when a submitted frame may still read it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_rhi::buffer::{AllocatedBuffer, BufferUsage};
//! use ember_rhi::deletion_queue::DeletionQueue;
//! use ember_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>, frame_queue: &mut DeletionQueue) -> ember_rhi::RhiResult<()> {
//! let uniforms = AllocatedBuffer::new(device, BufferUsage::Uniform, 256)?;
//! uniforms.write(&[1.0f32, 0.0, 0.0, 1.0])?;
//! // ... bind it for this frame ...
//! uniforms.retire(frame_queue);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::deletion_queue::{DeletionQueue, Release};
use crate::device::Device;
use crate::error::{RhiError, RhiResult, VkResultExt};

/// What a buffer is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex data read through its device address from a storage binding.
    Vertex,
    Index,
    /// Per-frame uniforms written from the CPU.
    Uniform,
    Storage,
    /// Host-visible source for uploads.
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        use ash::vk::BufferUsageFlags as F;
        match self {
            BufferUsage::Vertex => {
                F::STORAGE_BUFFER | F::TRANSFER_DST | F::SHADER_DEVICE_ADDRESS
            }
            BufferUsage::Index => F::INDEX_BUFFER | F::TRANSFER_DST,
            BufferUsage::Uniform => F::UNIFORM_BUFFER,
            BufferUsage::Storage => F::STORAGE_BUFFER | F::TRANSFER_DST,
            BufferUsage::Staging => F::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Storage => {
                MemoryLocation::GpuOnly
            }
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }
}

/// A `VkBuffer` with its own allocation.
pub struct AllocatedBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl AllocatedBuffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero size or if creation, allocation or
    /// binding fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer =
            unsafe { device.handle().create_buffer(&info, None) }.call("vkCreateBuffer")?;
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: usage.name(),
                    requirements,
                    location: usage.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up.
        let created = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };
        if let Some(allocation) = &created.allocation {
            unsafe {
                created.device.handle().bind_buffer_memory(
                    buffer,
                    allocation.memory(),
                    allocation.offset(),
                )
            }
            .call("vkBindBufferMemory")?;
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);
        Ok(created)
    }

    /// Creates a host-visible buffer holding `data`.
    pub fn with_data<T: Pod>(device: Arc<Device>, usage: BufferUsage, data: &[T]) -> RhiResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::new(device, usage, bytes.len() as vk::DeviceSize)?;
        buffer.write_bytes(0, bytes)?;
        Ok(buffer)
    }

    /// Copies `data` to the start of a mapped buffer.
    pub fn write<T: Pod>(&self, data: &[T]) -> RhiResult<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Copies `data` into the mapped buffer at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not host-visible or the write runs
    /// past its end.
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset.saturating_add(data.len() as vk::DeviceSize);
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "write of {} bytes at {} exceeds {} byte buffer",
                data.len(),
                offset,
                self.size
            )));
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("{} buffer is not mapped", self.usage.name()))
            })?;

        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    /// GPU virtual address of the buffer.
    pub fn device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        unsafe { self.device.handle().get_buffer_device_address(&info) }
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Hands the buffer and its memory to `queue` for release once the GPU
    /// is done with it.
    pub fn retire(mut self, queue: &mut DeletionQueue) {
        queue.push(Release::Buffer {
            buffer: std::mem::replace(&mut self.buffer, vk::Buffer::null()),
            allocation: self.allocation.take(),
        });
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        if self.buffer == vk::Buffer::null() {
            return;
        }

        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} buffer: {}", self.usage.name(), e);
                    }
                }
                Err(e) => error!("Leaking {} buffer memory: {}", self.usage.name(), e),
            }
        }
        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BufferUsage::Vertex, vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)]
    #[case(BufferUsage::Index, vk::BufferUsageFlags::INDEX_BUFFER)]
    #[case(BufferUsage::Uniform, vk::BufferUsageFlags::UNIFORM_BUFFER)]
    #[case(BufferUsage::Storage, vk::BufferUsageFlags::STORAGE_BUFFER)]
    #[case(BufferUsage::Staging, vk::BufferUsageFlags::TRANSFER_SRC)]
    fn test_buffer_usage_flags(#[case] usage: BufferUsage, #[case] expected: vk::BufferUsageFlags) {
        assert!(usage.to_vk_usage().contains(expected));
    }

    #[test]
    fn test_upload_targets_are_transfer_destinations() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index, BufferUsage::Storage] {
            assert!(
                usage
                    .to_vk_usage()
                    .contains(vk::BufferUsageFlags::TRANSFER_DST)
            );
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
        }
    }

    #[test]
    fn test_host_written_buffers_are_mappable() {
        assert_eq!(
            BufferUsage::Uniform.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
    }
}
