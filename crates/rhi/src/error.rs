//! RHI-specific error types.

use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error without call-site information
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Vulkan API error attributed to the entry point that produced it
    #[error("{call} failed: {result}")]
    CallFailed {
        call: &'static str,
        result: vk::Result,
    },

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// The allocator mutex was poisoned by a panicking thread
    #[error("GPU allocator lock poisoned")]
    AllocatorPoisoned,

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Shader module or pipeline description rejected before reaching the driver
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Renderer configuration rejected before any GPU work
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A bounded fence wait expired
    #[error("{context}: fence not signaled within {timeout:?}")]
    FenceTimeout {
        context: &'static str,
        timeout: Duration,
    },

    /// No presentable image became available in time
    #[error("swapchain image not acquired within {timeout:?}")]
    AcquireTimeout { timeout: Duration },

    /// A freshly obtained descriptor pool was exhausted as well
    #[error("descriptor pool exhausted twice in one allocation (newest pool holds {watermark} sets)")]
    DescriptorPoolExhausted { watermark: u32 },

    /// Allocation attempted after `destroy_pools`
    #[error("descriptor allocator used after its pools were destroyed")]
    AllocatorDestroyed,

    /// A frame-ring operation was called in the wrong slot state
    #[error("frame slot {slot} cannot {operation} while {state}")]
    InvalidFrameState {
        slot: usize,
        operation: &'static str,
        state: &'static str,
    },

    /// Claimed old layout disagrees with the layout tracked on the image
    #[error("image layout mismatch: tracked {tracked:?}, caller claimed {claimed:?}")]
    LayoutMismatch {
        tracked: vk::ImageLayout,
        claimed: vk::ImageLayout,
    },

    /// The requested layout cannot be a transition target
    #[error("cannot transition an image into {0:?}")]
    InvalidTransition(vk::ImageLayout),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

/// Attaches the failing entry point name to a raw Vulkan result.
pub trait VkResultExt<T> {
    fn call(self, call: &'static str) -> RhiResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    #[inline]
    fn call(self, call: &'static str) -> RhiResult<T> {
        self.map_err(|result| RhiError::CallFailed { call, result })
    }
}
