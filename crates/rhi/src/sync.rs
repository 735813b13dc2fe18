//! Fence and semaphore wrappers.
//!
//! - [`Semaphore`] orders work between queue operations (acquire, render, present).
//! - [`Fence`] lets the host wait for submitted work.
//!
//! Both are generic over [`GpuDevice`] and destroy their handle on drop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ember_rhi::device::Device;
//! use ember_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<Device>) -> ember_rhi::RhiResult<()> {
//! let image_available = Semaphore::new(device.clone())?;
//! let in_flight = Fence::new(device, true)?;
//!
//! in_flight.wait(Duration::from_secs(1))?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::backend::GpuDevice;
use crate::device::Device;
use crate::error::{RhiError, RhiResult, VkResultExt};

/// Converts a timeout to the nanosecond count Vulkan expects, saturating.
#[inline]
pub fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Vulkan semaphore, created unsignaled.
pub struct Semaphore<D: GpuDevice = Device> {
    device: Arc<D>,
    semaphore: vk::Semaphore,
}

impl<D: GpuDevice> Semaphore<D> {
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore().call("vkCreateSemaphore")?;
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<D: GpuDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// Vulkan fence.
///
/// Waits are always bounded. A fence that does not signal within the given
/// timeout is reported as [`RhiError::FenceTimeout`], which callers treat as
/// a lost device rather than something to retry.
pub struct Fence<D: GpuDevice = Device> {
    device: Arc<D>,
    fence: vk::Fence,
    context: &'static str,
}

impl<D: GpuDevice> Fence<D> {
    /// Creates a fence, optionally already signaled so the first wait passes.
    pub fn new(device: Arc<D>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled).call("vkCreateFence")?;
        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self {
            device,
            fence,
            context: "fence wait",
        })
    }

    /// Names the fence in timeout errors.
    pub fn with_context(mut self, context: &'static str) -> Self {
        self.context = context;
        self
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence signals.
    ///
    /// # Errors
    ///
    /// - [`RhiError::FenceTimeout`] if `timeout` elapses first
    /// - [`RhiError::CallFailed`] if the wait itself fails
    pub fn wait(&self, timeout: Duration) -> RhiResult<()> {
        match self.device.wait_for_fence(self.fence, timeout_ns(timeout)) {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::FenceTimeout {
                context: self.context,
                timeout,
            }),
            Err(result) => Err(result).call("vkWaitForFences"),
        }
    }

    /// Returns the fence to the unsignaled state. It must not be pending.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence).call("vkResetFences")
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        debug!("Destroyed fence");
    }
}
