//! Command pools and command buffer recording.
//!
//! - [`CommandPool`] owns a `VkCommandPool` and hands out primary buffers.
//! - [`CommandBuffer`] is a thin recording view over a `VkCommandBuffer`
//!   allocated elsewhere; it does not free the handle.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_rhi::command::{CommandBuffer, CommandPool};
//! use ember_rhi::device::Device;
//! use ember_rhi::vk;
//!
//! # fn example(device: Arc<Device>, image: vk::Image) -> ember_rhi::RhiResult<()> {
//! let pool = CommandPool::new(device.clone())?;
//! let cmd = CommandBuffer::from_handle(device, pool.allocate_command_buffer()?);
//! cmd.transition_image(
//!     image,
//!     vk::ImageLayout::UNDEFINED,
//!     vk::ImageLayout::TRANSFER_DST_OPTIMAL,
//!     vk::ImageAspectFlags::COLOR,
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::{debug, warn};

use crate::backend::GpuDevice;
use crate::device::Device;
use crate::error::{RhiResult, VkResultExt};
use crate::layout::{self, LayoutTransition};

/// Vulkan command pool on the graphics queue family.
///
/// Buffers allocated from it can be reset individually. Pools are not
/// thread-safe; use one per recording thread.
pub struct CommandPool<D: GpuDevice = Device> {
    device: Arc<D>,
    pool: vk::CommandPool,
}

impl<D: GpuDevice> CommandPool<D> {
    /// Creates a pool whose buffers can be reset one at a time.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        Self::with_flags(device, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Creates a pool for short-lived, frequently reset buffers.
    pub fn new_transient(device: Arc<D>) -> RhiResult<Self> {
        Self::with_flags(
            device,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    fn with_flags(device: Arc<D>, flags: vk::CommandPoolCreateFlags) -> RhiResult<Self> {
        let family = device.graphics_family();
        let pool = device
            .create_command_pool(family, flags)
            .call("vkCreateCommandPool")?;
        debug!("Command pool created for queue family {}", family);
        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates one primary command buffer. It is freed with the pool.
    pub fn allocate_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        self.device
            .allocate_command_buffer(self.pool)
            .call("vkAllocateCommandBuffers")
    }
}

impl<D: GpuDevice> Drop for CommandPool<D> {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
        debug!("Command pool destroyed");
    }
}

/// Recording helpers over a raw command buffer.
///
/// Begin, end and submission go through [`GpuDevice`]; this type only
/// records commands into a buffer that is already in the recording state.
#[derive(Clone)]
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    #[inline]
    pub fn from_handle(device: Arc<Device>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    fn raw(&self) -> &ash::Device {
        self.device.handle()
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Records a synchronization2 barrier with image barriers only.
    pub fn pipeline_barrier2(&self, image_barriers: &[vk::ImageMemoryBarrier2<'_>]) {
        let dependency = vk::DependencyInfo::default().image_memory_barriers(image_barriers);
        unsafe { self.raw().cmd_pipeline_barrier2(self.buffer, &dependency) };
    }

    /// Moves `image` from `old` to `new`, covering every mip and layer.
    ///
    /// Layout pairs without a dedicated rule use a full
    /// `ALL_COMMANDS` barrier and log a warning.
    pub fn transition_image(
        &self,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<()> {
        let transition = layout::transition(old, new, aspect)?;
        self.record_transition(image, &transition);
        Ok(())
    }

    /// Records an already resolved transition for `image`.
    pub fn record_transition(&self, image: vk::Image, transition: &LayoutTransition) {
        if transition.is_fallback() {
            warn!(
                "Unsupported layout transition {:?} -> {:?}, using a full barrier",
                transition.old_layout, transition.new_layout
            );
        }
        self.pipeline_barrier2(&[transition.barrier(image)]);
    }

    // =========================================================================
    // Dynamic Rendering
    // =========================================================================

    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo<'_>) {
        unsafe { self.raw().cmd_begin_rendering(self.buffer, rendering_info) };
    }

    pub fn end_rendering(&self) {
        unsafe { self.raw().cmd_end_rendering(self.buffer) };
    }

    /// Sets a viewport and scissor covering `extent`.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .max_depth(1.0);
        let scissor = vk::Rect2D::default().extent(extent);
        unsafe {
            self.raw().cmd_set_viewport(self.buffer, 0, &[viewport]);
            self.raw().cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    // =========================================================================
    // Binding and Drawing
    // =========================================================================

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.raw().cmd_bind_pipeline(self.buffer, bind_point, pipeline) };
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.raw()
                .cmd_bind_descriptor_sets(self.buffer, bind_point, layout, first_set, sets, &[]);
        }
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.raw()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, vk::IndexType::UINT32);
        }
    }

    /// Pushes `data` as raw bytes.
    pub fn push_constants<T: Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) {
        unsafe {
            self.raw().cmd_push_constants(
                self.buffer,
                layout,
                stages,
                0,
                bytemuck::bytes_of(data),
            );
        }
    }

    pub fn draw_indexed(&self, index_count: u32, first_index: u32) {
        unsafe {
            self.raw()
                .cmd_draw_indexed(self.buffer, index_count, 1, first_index, 0, 0);
        }
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe { self.raw().cmd_dispatch(self.buffer, x, y, z) };
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.raw().cmd_copy_buffer(self.buffer, src, dst, regions) };
    }

    /// Copies a tightly packed buffer into mip 0 of an image in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(&self, src: vk::Buffer, dst: vk::Image, extent: vk::Extent3D) {
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .layer_count(1),
            )
            .image_extent(extent);
        unsafe {
            self.raw().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Scales mip 0 of `src` (`TRANSFER_SRC_OPTIMAL`) onto mip 0 of `dst`
    /// (`TRANSFER_DST_OPTIMAL`) with linear filtering.
    pub fn blit_image(
        &self,
        src: vk::Image,
        dst: vk::Image,
        src_size: vk::Extent2D,
        dst_size: vk::Extent2D,
    ) {
        let corner = |size: vk::Extent2D| vk::Offset3D {
            x: size.width as i32,
            y: size.height as i32,
            z: 1,
        };
        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .layer_count(1);
        let region = vk::ImageBlit2::default()
            .src_offsets([vk::Offset3D::default(), corner(src_size)])
            .dst_offsets([vk::Offset3D::default(), corner(dst_size)])
            .src_subresource(subresource)
            .dst_subresource(subresource);
        let regions = [region];
        let blit = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(&regions);
        unsafe { self.raw().cmd_blit_image2(self.buffer, &blit) };
    }

    /// Clears every mip and layer of a color image in `layout`.
    pub fn clear_color_image(&self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
        let value = vk::ClearColorValue { float32: color };
        let range = layout::full_range(vk::ImageAspectFlags::COLOR);
        unsafe {
            self.raw()
                .cmd_clear_color_image(self.buffer, image, layout, &value, &[range]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice};
    use ash::vk::Handle;

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
    }

    #[test]
    fn test_pool_allocates_and_destroys() {
        let device = Arc::new(MockDevice::new());
        let raw = {
            let pool = CommandPool::new_transient(device.clone()).unwrap();
            pool.allocate_command_buffer().unwrap();
            pool.handle().as_raw()
        };
        let calls = device.calls();
        assert_eq!(
            calls.first(),
            Some(&Call::CreateCommandPool {
                pool: raw,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            })
        );
        assert_eq!(calls.last(), Some(&Call::DestroyCommandPool(raw)));
    }
}
