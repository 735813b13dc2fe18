//! Deferred resource destruction.
//!
//! A [`DeletionQueue`] holds [`Release`] entries: tagged descriptions of GPU
//! objects whose destruction has to wait until the GPU is done with them.
//! [`DeletionQueue::flush`] hands them to the device newest-first, so a
//! resource registered after the things it depends on is destroyed before
//! them.
//!
//! Every frame slot owns one queue, flushed after the slot's fence wait;
//! the renderer owns another that is flushed at shutdown.
//!
//! # Example
//!
//! ```no_run
//! use ember_rhi::deletion_queue::{DeletionQueue, Release};
//! use ember_rhi::device::Device;
//! use ember_rhi::vk;
//!
//! # fn example(device: &Device, sampler: vk::Sampler, view: vk::ImageView) {
//! let mut queue = DeletionQueue::new();
//! queue.push(Release::Sampler(sampler));
//! queue.push(Release::ImageView(view));
//!
//! // Later, once the GPU no longer uses them: the view goes first.
//! queue.flush(device);
//! # }
//! ```

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::Allocation;
use tracing::{debug, warn};

use crate::backend::GpuDevice;

/// A GPU object waiting for destruction.
#[derive(Debug)]
pub enum Release {
    /// A buffer and the memory bound to it.
    Buffer {
        buffer: vk::Buffer,
        allocation: Option<Allocation>,
    },
    /// An image and the memory bound to it. Views are released separately.
    Image {
        image: vk::Image,
        allocation: Option<Allocation>,
    },
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorPool(vk::DescriptorPool),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    CommandPool(vk::CommandPool),
}

/// Discriminant of a [`Release`], for logging and inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReleaseKind {
    Buffer,
    Image,
    ImageView,
    Sampler,
    Pipeline,
    PipelineLayout,
    DescriptorSetLayout,
    DescriptorPool,
    Fence,
    Semaphore,
    CommandPool,
}

impl Release {
    pub fn kind(&self) -> ReleaseKind {
        match self {
            Release::Buffer { .. } => ReleaseKind::Buffer,
            Release::Image { .. } => ReleaseKind::Image,
            Release::ImageView(_) => ReleaseKind::ImageView,
            Release::Sampler(_) => ReleaseKind::Sampler,
            Release::Pipeline(_) => ReleaseKind::Pipeline,
            Release::PipelineLayout(_) => ReleaseKind::PipelineLayout,
            Release::DescriptorSetLayout(_) => ReleaseKind::DescriptorSetLayout,
            Release::DescriptorPool(_) => ReleaseKind::DescriptorPool,
            Release::Fence(_) => ReleaseKind::Fence,
            Release::Semaphore(_) => ReleaseKind::Semaphore,
            Release::CommandPool(_) => ReleaseKind::CommandPool,
        }
    }

    /// The raw Vulkan handle of the primary object.
    pub fn raw_handle(&self) -> u64 {
        match self {
            Release::Buffer { buffer, .. } => buffer.as_raw(),
            Release::Image { image, .. } => image.as_raw(),
            Release::ImageView(h) => h.as_raw(),
            Release::Sampler(h) => h.as_raw(),
            Release::Pipeline(h) => h.as_raw(),
            Release::PipelineLayout(h) => h.as_raw(),
            Release::DescriptorSetLayout(h) => h.as_raw(),
            Release::DescriptorPool(h) => h.as_raw(),
            Release::Fence(h) => h.as_raw(),
            Release::Semaphore(h) => h.as_raw(),
            Release::CommandPool(h) => h.as_raw(),
        }
    }
}

/// Ordered list of pending releases, destroyed last-in first-out.
#[derive(Debug, Default)]
pub struct DeletionQueue {
    pending: Vec<Release>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `resource` to the tail of the queue.
    pub fn push(&mut self, resource: Release) {
        self.pending.push(resource);
    }

    /// Releases every pending entry from tail to head, leaving the queue empty.
    ///
    /// Flushing an empty queue does nothing.
    pub fn flush<D: GpuDevice + ?Sized>(&mut self, device: &D) {
        if self.pending.is_empty() {
            return;
        }

        let count = self.pending.len();
        while let Some(resource) = self.pending.pop() {
            device.release(resource);
        }
        debug!("Flushed deletion queue ({} entries)", count);
    }

    /// Pending entries in push order.
    #[inline]
    pub fn pending(&self) -> &[Release] {
        &self.pending
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "Deletion queue dropped with {} unreleased entries",
                self.pending.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice};

    fn buffer(raw: u64) -> Release {
        Release::Buffer {
            buffer: vk::Buffer::from_raw(raw),
            allocation: None,
        }
    }

    fn image(raw: u64) -> Release {
        Release::Image {
            image: vk::Image::from_raw(raw),
            allocation: None,
        }
    }

    fn released(device: &MockDevice) -> Vec<(ReleaseKind, u64)> {
        device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Release(kind, raw) => Some((kind, raw)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_flush_runs_newest_first() {
        let device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        queue.push(Release::Sampler(vk::Sampler::from_raw(1)));
        queue.push(Release::Pipeline(vk::Pipeline::from_raw(2)));
        queue.push(Release::ImageView(vk::ImageView::from_raw(3)));

        queue.flush(&device);

        assert_eq!(
            released(&device),
            vec![
                (ReleaseKind::ImageView, 3),
                (ReleaseKind::Pipeline, 2),
                (ReleaseKind::Sampler, 1),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_image_pushed_after_buffer_is_released_first() {
        let device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        queue.push(buffer(0x10));
        queue.push(image(0x20));

        queue.flush(&device);

        assert_eq!(
            released(&device),
            vec![(ReleaseKind::Image, 0x20), (ReleaseKind::Buffer, 0x10)]
        );
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        queue.flush(&device);
        queue.flush(&device);
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_second_flush_releases_nothing_again() {
        let device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        queue.push(Release::Fence(vk::Fence::from_raw(9)));
        queue.flush(&device);
        queue.flush(&device);
        assert_eq!(released(&device).len(), 1);
    }

    #[test]
    fn test_pending_is_inspectable_in_push_order() {
        let mut queue = DeletionQueue::new();
        queue.push(buffer(1));
        queue.push(Release::DescriptorPool(vk::DescriptorPool::from_raw(2)));

        let kinds: Vec<_> = queue.pending().iter().map(Release::kind).collect();
        assert_eq!(kinds, vec![ReleaseKind::Buffer, ReleaseKind::DescriptorPool]);
        assert_eq!(queue.pending()[1].raw_handle(), 2);

        queue.pending.clear();
    }
}
