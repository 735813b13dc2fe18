//! The device operations the frame-critical core is written against.
//!
//! [`GpuDevice`] lists the raw Vulkan calls used by the frame ring, the
//! descriptor allocator, the deletion queue and immediate submission. The
//! real implementation lives on [`Device`](crate::device::Device); the
//! [`mock`](crate::mock) module provides a recording one for tests.
//!
//! Methods return raw [`VkResult`]s so callers can classify specific codes
//! (pool exhaustion, timeouts) before attaching call-site context.

use ash::prelude::VkResult;
use ash::vk;

use crate::deletion_queue::Release;

/// One command buffer submission with optional semaphore dependencies.
#[derive(Clone, Copy, Debug)]
pub struct SubmitDesc {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on and the stages that wait for it.
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    /// Semaphore to signal and the stages that must finish first.
    pub signal: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    /// Fence signaled when the command buffer completes. May be null.
    pub fence: vk::Fence,
}

/// Raw device operations used by the synchronization and lifetime core.
pub trait GpuDevice: Send + Sync + 'static {
    /// Queue family that graphics submissions go to.
    fn graphics_family(&self) -> u32;

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks until `fence` is signaled or `timeout_ns` elapses
    /// (`Err(vk::Result::TIMEOUT)`).
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    /// Submits to the graphics queue.
    fn submit(&self, desc: &SubmitDesc) -> VkResult<()>;

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool>;
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Destroys a resource handed over by a deletion queue.
    fn release(&self, resource: Release);
}
