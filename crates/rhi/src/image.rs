//! GPU images that know their current layout.
//!
//! [`AllocatedImage`] owns a `VkImage`, its default view and allocation, and
//! records the layout the image was last transitioned to. Transitions go
//! through the image so the old layout is taken from that record instead of
//! the caller:
//!
//! - [`transition_to`](AllocatedImage::transition_to) moves from the tracked
//!   layout;
//! - [`transition_from`](AllocatedImage::transition_from) accepts a caller
//!   claim and rejects it if it disagrees with the record;
//! - [`discard_to`](AllocatedImage::discard_to) transitions from `UNDEFINED`,
//!   throwing away the previous contents.
//!
//! The bookkeeping itself lives in [`TrackedLayout`], which resolves each
//! request into a [`LayoutTransition`] without touching a device.
//!
//! The record reflects recording order, not GPU execution; it is correct as
//! long as command buffers touching the image are submitted in the order they
//! were recorded.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::CommandBuffer;
use crate::deletion_queue::{DeletionQueue, Release};
use crate::device::Device;
use crate::error::{RhiError, RhiResult, VkResultExt};
use crate::layout::{self, LayoutTransition};

/// Parameters for [`AllocatedImage::new`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub name: &'static str,
}

impl ImageDesc {
    pub fn new_2d(
        name: &'static str,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            usage,
            mip_levels: 1,
            name,
        }
    }

    /// Enables a full mip chain for the extent.
    pub fn mipmapped(mut self) -> Self {
        self.mip_levels = mip_level_count(self.extent.width, self.extent.height);
        self
    }

    /// Aspect the default view covers.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if layout::is_depth_format(self.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// Number of mip levels down to 1x1.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// A `VkImage` with its view, allocation and tracked layout.
pub struct AllocatedImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    layout: TrackedLayout,
    name: &'static str,
}

impl AllocatedImage {
    /// Creates a device-local 2D image and a view over all its mips.
    ///
    /// The image starts in `UNDEFINED`.
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.handle().create_image(&info, None) }.call("vkCreateImage")?;
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut created = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            layout: TrackedLayout::new(desc.format),
            name: desc.name,
        };

        if let Some(allocation) = &created.allocation {
            unsafe {
                created
                    .device
                    .handle()
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
            }
            .call("vkBindImageMemory")?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect())
                    .level_count(desc.mip_levels)
                    .layer_count(1),
            );
        created.view = unsafe { created.device.handle().create_image_view(&view_info, None) }
            .call("vkCreateImageView")?;

        debug!(
            "Created image '{}': {}x{} {:?}, {} mip(s)",
            desc.name, desc.extent.width, desc.extent.height, desc.format, desc.mip_levels
        );
        Ok(created)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Layout the image was last transitioned to.
    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout.current()
    }

    /// Records a transition from the tracked layout to `new`.
    pub fn transition_to(&mut self, cmd: &CommandBuffer, new: vk::ImageLayout) -> RhiResult<()> {
        let transition = self.layout.to(new)?;
        cmd.record_transition(self.image, &transition);
        Ok(())
    }

    /// Records a transition from `claimed` to `new`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::LayoutMismatch`] when `claimed` is neither the
    /// tracked layout nor `UNDEFINED`. Nothing is recorded in that case.
    pub fn transition_from(
        &mut self,
        cmd: &CommandBuffer,
        claimed: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<()> {
        let transition = self.layout.from_claim(claimed, new)?;
        cmd.record_transition(self.image, &transition);
        Ok(())
    }

    /// Records a transition from `UNDEFINED`, discarding the contents.
    pub fn discard_to(&mut self, cmd: &CommandBuffer, new: vk::ImageLayout) -> RhiResult<()> {
        let transition = self.layout.discard_to(new)?;
        cmd.record_transition(self.image, &transition);
        Ok(())
    }

    /// Hands the image, view and memory to `queue`. The view is released
    /// first.
    pub fn retire(mut self, queue: &mut DeletionQueue) {
        queue.push(Release::Image {
            image: std::mem::replace(&mut self.image, vk::Image::null()),
            allocation: self.allocation.take(),
        });
        queue.push(Release::ImageView(std::mem::replace(
            &mut self.view,
            vk::ImageView::null(),
        )));
    }
}

/// Layout bookkeeping for one image.
///
/// Each request resolves the barrier for the move and, only if that
/// succeeds, advances the tracked layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedLayout {
    format: vk::Format,
    current: vk::ImageLayout,
}

impl TrackedLayout {
    /// Starts in `UNDEFINED`.
    pub fn new(format: vk::Format) -> Self {
        Self {
            format,
            current: vk::ImageLayout::UNDEFINED,
        }
    }

    #[inline]
    pub fn current(&self) -> vk::ImageLayout {
        self.current
    }

    /// Transition from the tracked layout to `new`.
    pub fn to(&mut self, new: vk::ImageLayout) -> RhiResult<LayoutTransition> {
        self.advance(self.current, new)
    }

    /// Transition from a caller-claimed layout to `new`.
    ///
    /// # Errors
    ///
    /// [`RhiError::LayoutMismatch`] if `claimed` is neither the tracked
    /// layout nor `UNDEFINED`; the tracked layout is left as it was.
    pub fn from_claim(
        &mut self,
        claimed: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<LayoutTransition> {
        check_claim(self.current, claimed)?;
        self.advance(claimed, new)
    }

    /// Transition from `UNDEFINED` to `new`.
    pub fn discard_to(&mut self, new: vk::ImageLayout) -> RhiResult<LayoutTransition> {
        self.advance(vk::ImageLayout::UNDEFINED, new)
    }

    fn advance(
        &mut self,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<LayoutTransition> {
        let transition = layout::transition(old, new, layout::aspect_for(self.format, new))?;
        self.current = new;
        Ok(transition)
    }
}

/// Accepts a claimed layout if it matches the tracked one or is `UNDEFINED`.
pub fn check_claim(tracked: vk::ImageLayout, claimed: vk::ImageLayout) -> RhiResult<()> {
    if claimed == tracked || claimed == vk::ImageLayout::UNDEFINED {
        Ok(())
    } else {
        Err(RhiError::LayoutMismatch { tracked, claimed })
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        let device = self.device.handle();
        if self.view != vk::ImageView::null() {
            unsafe { device.destroy_image_view(self.view, None) };
        }
        if self.image != vk::Image::null() {
            unsafe { device.destroy_image(self.image, None) };
        }
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image '{}': {}", self.name, e);
                    }
                }
                Err(e) => error!("Leaking image '{}' memory: {}", self.name, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1, 1)]
    #[case(2, 1, 2)]
    #[case(256, 256, 9)]
    #[case(1920, 1080, 11)]
    #[case(0, 0, 1)]
    fn test_mip_level_count(#[case] w: u32, #[case] h: u32, #[case] expected: u32) {
        assert_eq!(mip_level_count(w, h), expected);
    }

    #[test]
    fn test_claim_must_match_tracked_layout() {
        use ash::vk::ImageLayout as L;
        assert!(check_claim(L::TRANSFER_DST_OPTIMAL, L::TRANSFER_DST_OPTIMAL).is_ok());
        assert!(check_claim(L::SHADER_READ_ONLY_OPTIMAL, L::UNDEFINED).is_ok());

        let err = check_claim(L::COLOR_ATTACHMENT_OPTIMAL, L::GENERAL).unwrap_err();
        assert!(matches!(
            err,
            RhiError::LayoutMismatch {
                tracked: L::COLOR_ATTACHMENT_OPTIMAL,
                claimed: L::GENERAL
            }
        ));
    }

    #[test]
    fn test_tracked_transition_starts_from_recorded_layout() {
        use ash::vk::ImageLayout as L;
        let mut tracked = TrackedLayout::new(vk::Format::R8G8B8A8_UNORM);
        assert_eq!(tracked.current(), L::UNDEFINED);

        let first = tracked.to(L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(first.old_layout, L::UNDEFINED);

        let second = tracked.to(L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(second.old_layout, L::TRANSFER_DST_OPTIMAL);
        assert_eq!(second.new_layout, L::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(second.aspect, vk::ImageAspectFlags::COLOR);
        assert_eq!(tracked.current(), L::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_rejected_claim_leaves_layout_untouched() {
        use ash::vk::ImageLayout as L;
        let mut tracked = TrackedLayout::new(vk::Format::R16G16B16A16_SFLOAT);
        tracked.to(L::COLOR_ATTACHMENT_OPTIMAL).unwrap();
        let before = tracked;

        let err = tracked
            .from_claim(L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL)
            .unwrap_err();
        assert!(matches!(
            err,
            RhiError::LayoutMismatch {
                tracked: L::COLOR_ATTACHMENT_OPTIMAL,
                claimed: L::TRANSFER_DST_OPTIMAL
            }
        ));
        assert_eq!(tracked, before);

        let accepted = tracked
            .from_claim(L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL)
            .unwrap();
        assert_eq!(accepted.old_layout, L::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(tracked.current(), L::TRANSFER_SRC_OPTIMAL);
    }

    #[test]
    fn test_discard_records_undefined_and_updates_layout() {
        use ash::vk::ImageLayout as L;
        let mut tracked = TrackedLayout::new(vk::Format::D32_SFLOAT);
        tracked.to(L::SHADER_READ_ONLY_OPTIMAL).unwrap();

        let t = tracked.discard_to(L::DEPTH_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(t.old_layout, L::UNDEFINED);
        assert_eq!(t.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(tracked.current(), L::DEPTH_ATTACHMENT_OPTIMAL);

        // A claim of UNDEFINED is always accepted as a discard.
        let t = tracked.from_claim(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(t.old_layout, L::UNDEFINED);
        assert_eq!(tracked.current(), L::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn test_invalid_target_keeps_tracked_layout() {
        use ash::vk::ImageLayout as L;
        let mut tracked = TrackedLayout::new(vk::Format::R8G8B8A8_UNORM);
        tracked.to(L::GENERAL).unwrap();
        assert!(tracked.to(L::UNDEFINED).is_err());
        assert_eq!(tracked.current(), L::GENERAL);
    }

    #[test]
    fn test_desc_aspect_follows_format() {
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        let depth = ImageDesc::new_2d(
            "depth",
            vk::Format::D32_SFLOAT,
            extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        let color = ImageDesc::new_2d(
            "color",
            vk::Format::R8G8B8A8_UNORM,
            extent,
            vk::ImageUsageFlags::SAMPLED,
        )
        .mipmapped();
        assert_eq!(depth.aspect(), vk::ImageAspectFlags::DEPTH);
        assert_eq!(color.aspect(), vk::ImageAspectFlags::COLOR);
        assert_eq!(color.mip_levels, 3);
    }
}
