//! Image layout transitions.
//!
//! [`transition`] turns an `(old, new)` layout pair into the synchronization2
//! stage and access masks that make the move safe: the source scope covers
//! whatever last touched the image in `old`, the destination scope covers
//! whatever will use it in `new`. The result is a [`LayoutTransition`] that
//! builds a full-subresource [`vk::ImageMemoryBarrier2`].
//!
//! Layouts without a dedicated rule fall back to `ALL_COMMANDS` with
//! `MEMORY_READ | MEMORY_WRITE`. That is always correct, only slower, and
//! [`LayoutTransition::is_fallback`] lets the recording site warn about it.
//!
//! ```
//! use ember_rhi::layout::transition;
//! use ember_rhi::vk;
//!
//! let t = transition(
//!     vk::ImageLayout::UNDEFINED,
//!     vk::ImageLayout::TRANSFER_DST_OPTIMAL,
//!     vk::ImageAspectFlags::COLOR,
//! )
//! .unwrap();
//! assert_eq!(t.dst_stage, vk::PipelineStageFlags2::TRANSFER);
//! ```

use ash::vk;

use crate::error::{RhiError, RhiResult};

/// Stage and access masks for one side of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scope {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl Scope {
    const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    const FALLBACK: Scope = Scope::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
        ),
    );
}

/// A resolved layout transition, ready to be turned into a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub aspect: vk::ImageAspectFlags,
    fallback: bool,
}

impl LayoutTransition {
    /// Whether either side used the catch-all scope.
    #[inline]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Builds the barrier for `image`, covering every mip level and array layer.
    pub fn barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(full_range(self.aspect))
    }
}

/// Subresource range over all mips and layers of `aspect`.
pub fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

/// Resolves the barrier scopes for moving an image from `old` to `new`.
///
/// # Errors
///
/// Returns [`RhiError::InvalidTransition`] if `new` is `UNDEFINED`.
pub fn transition(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    aspect: vk::ImageAspectFlags,
) -> RhiResult<LayoutTransition> {
    if new == vk::ImageLayout::UNDEFINED {
        return Err(RhiError::InvalidTransition(new));
    }

    let (src, src_known) = source_scope(old);
    let (dst, dst_known) = destination_scope(new);

    Ok(LayoutTransition {
        old_layout: old,
        new_layout: new,
        src_stage: src.stage,
        src_access: src.access,
        dst_stage: dst.stage,
        dst_access: dst.access,
        aspect,
        fallback: !(src_known && dst_known),
    })
}

/// Work that must finish before the image leaves `layout`.
fn source_scope(layout: vk::ImageLayout) -> (Scope, bool) {
    use ash::vk::AccessFlags2 as A;
    use ash::vk::ImageLayout as L;
    use ash::vk::PipelineStageFlags2 as S;

    let scope = match layout {
        // Must overlap the acquire wait; TOP_OF_PIPE is empty as a sync2 first scope.
        L::UNDEFINED | L::PRESENT_SRC_KHR => Scope::new(S::ALL_COMMANDS, A::NONE),
        L::GENERAL => Scope::new(S::ALL_COMMANDS, A::MEMORY_WRITE),
        L::TRANSFER_SRC_OPTIMAL => Scope::new(S::TRANSFER, A::NONE),
        L::TRANSFER_DST_OPTIMAL => Scope::new(S::TRANSFER, A::TRANSFER_WRITE),
        L::COLOR_ATTACHMENT_OPTIMAL => {
            Scope::new(S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_WRITE)
        }
        L::DEPTH_ATTACHMENT_OPTIMAL | L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => Scope::new(
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        L::SHADER_READ_ONLY_OPTIMAL => {
            Scope::new(S::FRAGMENT_SHADER | S::COMPUTE_SHADER, A::NONE)
        }
        _ => return (Scope::FALLBACK, false),
    };
    (scope, true)
}

/// Work that must wait until the image has entered `layout`.
fn destination_scope(layout: vk::ImageLayout) -> (Scope, bool) {
    use ash::vk::AccessFlags2 as A;
    use ash::vk::ImageLayout as L;
    use ash::vk::PipelineStageFlags2 as S;

    let scope = match layout {
        L::GENERAL => Scope::new(S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
        L::TRANSFER_SRC_OPTIMAL => Scope::new(S::TRANSFER, A::TRANSFER_READ),
        L::TRANSFER_DST_OPTIMAL => Scope::new(S::TRANSFER, A::TRANSFER_WRITE),
        L::COLOR_ATTACHMENT_OPTIMAL => Scope::new(
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        L::DEPTH_ATTACHMENT_OPTIMAL | L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => Scope::new(
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        L::SHADER_READ_ONLY_OPTIMAL => Scope::new(
            S::FRAGMENT_SHADER | S::COMPUTE_SHADER,
            A::SHADER_READ,
        ),
        // Must overlap the stages the render-finished semaphore signals after.
        L::PRESENT_SRC_KHR => Scope::new(S::ALL_COMMANDS, A::NONE),
        _ => return (Scope::FALLBACK, false),
    };
    (scope, true)
}

/// Returns true for formats with a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Returns true for formats with a stencil component.
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Picks the aspect a barrier into `new_layout` should cover for `format`.
pub fn aspect_for(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    match new_layout {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL if has_stencil(format) => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => vk::ImageAspectFlags::DEPTH,
        _ if is_depth_format(format) => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use rstest::rstest;

    use ash::vk::AccessFlags2 as A;
    use ash::vk::ImageLayout as L;
    use ash::vk::PipelineStageFlags2 as S;

    const COLOR: vk::ImageAspectFlags = vk::ImageAspectFlags::COLOR;

    #[rstest]
    #[case::fresh_to_transfer_dst(
        L::UNDEFINED, L::TRANSFER_DST_OPTIMAL,
        S::ALL_COMMANDS, A::NONE, S::TRANSFER, A::TRANSFER_WRITE
    )]
    #[case::upload_to_sampled(
        L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL,
        S::TRANSFER, A::TRANSFER_WRITE, S::FRAGMENT_SHADER | S::COMPUTE_SHADER, A::SHADER_READ
    )]
    #[case::draw_to_blit_source(
        L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL,
        S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_WRITE, S::TRANSFER, A::TRANSFER_READ
    )]
    #[case::blit_target_to_present(
        L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR,
        S::TRANSFER, A::TRANSFER_WRITE, S::ALL_COMMANDS, A::NONE
    )]
    #[case::clear_to_attachment(
        L::TRANSFER_DST_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL,
        S::TRANSFER, A::TRANSFER_WRITE,
        S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE
    )]
    #[case::compute_write_to_attachment(
        L::GENERAL, L::COLOR_ATTACHMENT_OPTIMAL,
        S::ALL_COMMANDS, A::MEMORY_WRITE,
        S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE
    )]
    #[case::present_reuse(
        L::PRESENT_SRC_KHR, L::TRANSFER_DST_OPTIMAL,
        S::ALL_COMMANDS, A::NONE, S::TRANSFER, A::TRANSFER_WRITE
    )]
    fn test_known_transitions(
        #[case] old: vk::ImageLayout,
        #[case] new: vk::ImageLayout,
        #[case] src_stage: vk::PipelineStageFlags2,
        #[case] src_access: vk::AccessFlags2,
        #[case] dst_stage: vk::PipelineStageFlags2,
        #[case] dst_access: vk::AccessFlags2,
    ) {
        let t = transition(old, new, COLOR).unwrap();
        assert_eq!(t.src_stage, src_stage);
        assert_eq!(t.src_access, src_access);
        assert_eq!(t.dst_stage, dst_stage);
        assert_eq!(t.dst_access, dst_access);
        assert!(!t.is_fallback());
    }

    #[test]
    fn test_depth_attachment_uses_fragment_test_stages() {
        let t = transition(
            L::UNDEFINED,
            L::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageAspectFlags::DEPTH,
        )
        .unwrap();
        assert_eq!(t.dst_stage, S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS);
        assert!(t.dst_access.contains(A::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(t.aspect, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn test_transition_to_undefined_is_rejected() {
        let err = transition(L::GENERAL, L::UNDEFINED, COLOR).unwrap_err();
        assert!(matches!(err, RhiError::InvalidTransition(L::UNDEFINED)));
    }

    #[test]
    fn test_unknown_layout_falls_back_to_full_barrier() {
        let t = transition(L::UNDEFINED, L::READ_ONLY_OPTIMAL, COLOR).unwrap();
        assert!(t.is_fallback());
        assert_eq!(t.dst_stage, S::ALL_COMMANDS);
        assert_eq!(t.dst_access, A::MEMORY_READ | A::MEMORY_WRITE);

        let t = transition(L::ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL, COLOR).unwrap();
        assert!(t.is_fallback());
        assert_eq!(t.src_stage, S::ALL_COMMANDS);
        assert_eq!(t.dst_stage, S::TRANSFER);
    }

    #[test]
    fn test_barrier_covers_whole_image() {
        let image = vk::Image::from_raw(42);
        let barrier = transition(L::UNDEFINED, L::GENERAL, COLOR)
            .unwrap()
            .barrier(image);

        assert_eq!(barrier.image, image);
        assert_eq!(barrier.old_layout, L::UNDEFINED);
        assert_eq!(barrier.new_layout, L::GENERAL);
        assert_eq!(barrier.subresource_range.base_mip_level, 0);
        assert_eq!(barrier.subresource_range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(barrier.subresource_range.base_array_layer, 0);
        assert_eq!(barrier.subresource_range.layer_count, vk::REMAINING_ARRAY_LAYERS);
        assert_eq!(barrier.subresource_range.aspect_mask, COLOR);
    }

    #[rstest]
    #[case(vk::Format::D32_SFLOAT, L::DEPTH_ATTACHMENT_OPTIMAL, vk::ImageAspectFlags::DEPTH)]
    #[case(
        vk::Format::D24_UNORM_S8_UINT,
        L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    )]
    #[case(vk::Format::D32_SFLOAT, L::SHADER_READ_ONLY_OPTIMAL, vk::ImageAspectFlags::DEPTH)]
    #[case(vk::Format::R16G16B16A16_SFLOAT, L::GENERAL, vk::ImageAspectFlags::COLOR)]
    #[case(vk::Format::B8G8R8A8_UNORM, L::PRESENT_SRC_KHR, vk::ImageAspectFlags::COLOR)]
    fn test_aspect_for(
        #[case] format: vk::Format,
        #[case] layout: vk::ImageLayout,
        #[case] expected: vk::ImageAspectFlags,
    ) {
        assert_eq!(aspect_for(format, layout), expected);
    }
}
