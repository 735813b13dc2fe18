//! Descriptor set layouts and writes.
//!
//! - [`DescriptorLayoutBuilder`] collects bindings and builds a
//!   [`DescriptorSetLayout`] visible to a chosen set of shader stages.
//! - [`DescriptorWriter`] batches buffer and image writes and applies them to
//!   a set in one `vkUpdateDescriptorSets` call.
//!
//! Sets themselves come from
//! [`DescriptorAllocatorGrowable`](crate::descriptor_allocator::DescriptorAllocatorGrowable).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorWriter};
//! use ember_rhi::device::Device;
//! use ember_rhi::vk;
//!
//! # fn example(device: Arc<Device>, set: vk::DescriptorSet, ubo: vk::Buffer) -> ember_rhi::RhiResult<()> {
//! let layout = DescriptorLayoutBuilder::new()
//!     .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
//!     .build(device.clone(), vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;
//!
//! let mut writer = DescriptorWriter::new();
//! writer.write_buffer(0, ubo, 256, 0, vk::DescriptorType::UNIFORM_BUFFER);
//! writer.update_set(&device, set);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::deletion_queue::{DeletionQueue, Release};
use crate::device::Device;
use crate::error::{RhiResult, VkResultExt};

/// Owned `VkDescriptorSetLayout`.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Defers destruction to `queue`.
    pub fn retire(mut self, queue: &mut DeletionQueue) {
        queue.push(Release::DescriptorSetLayout(std::mem::replace(
            &mut self.layout,
            vk::DescriptorSetLayout::null(),
        )));
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        if self.layout != vk::DescriptorSetLayout::null() {
            unsafe {
                self.device
                    .handle()
                    .destroy_descriptor_set_layout(self.layout, None);
            }
            debug!("Destroyed descriptor set layout");
        }
    }
}

/// Collects single-descriptor bindings for a layout.
#[derive(Clone, Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<(u32, vk::DescriptorType)>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push((binding, ty));
        self
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Binding descriptions, all visible to `stages`.
    pub fn bindings(&self, stages: vk::ShaderStageFlags) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|&(binding, ty)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(stages)
            })
            .collect()
    }

    pub fn build(
        &self,
        device: Arc<Device>,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<DescriptorSetLayout> {
        let bindings = self.bindings(stages);
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { device.handle().create_descriptor_set_layout(&info, None) }
            .call("vkCreateDescriptorSetLayout")?;
        debug!("Created descriptor set layout with {} binding(s)", bindings.len());
        Ok(DescriptorSetLayout { device, layout })
    }
}

#[derive(Clone, Copy, Debug)]
enum PendingWrite {
    Buffer {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
    Image {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
}

/// Batches descriptor writes for one set.
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(PendingWrite::Buffer {
            binding,
            ty,
            info: vk::DescriptorBufferInfo {
                buffer,
                offset,
                range: size,
            },
        });
        self
    }

    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(PendingWrite::Image {
            binding,
            ty,
            info: vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            },
        });
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Applies every pending write to `set`. Pending writes are kept.
    pub fn update_set(&self, device: &Device, set: vk::DescriptorSet) {
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = self
            .writes
            .iter()
            .map(|w| match w {
                PendingWrite::Buffer { info, .. } => [*info],
                PendingWrite::Image { .. } => [vk::DescriptorBufferInfo::default()],
            })
            .collect();
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = self
            .writes
            .iter()
            .map(|w| match w {
                PendingWrite::Image { info, .. } => [*info],
                PendingWrite::Buffer { .. } => [vk::DescriptorImageInfo::default()],
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .writes
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let write = vk::WriteDescriptorSet::default().dst_set(set);
                match *w {
                    PendingWrite::Buffer { binding, ty, .. } => write
                        .dst_binding(binding)
                        .descriptor_type(ty)
                        .buffer_info(&buffer_infos[i]),
                    PendingWrite::Image { binding, ty, .. } => write
                        .dst_binding(binding)
                        .descriptor_type(ty)
                        .image_info(&image_infos[i]),
                }
            })
            .collect();

        unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
    }
}
