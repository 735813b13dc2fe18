//! Blocking one-off submission.
//!
//! [`ImmediateSubmit`] owns a transient command pool, one command buffer and one fence.
//! [`submit`](ImmediateSubmit::submit) records through a closure, submits to
//! the graphics queue and waits for the fence before returning. It is used
//! for uploads and other setup work outside the frame loop.
//!
//! Calls are serialized through `&mut self`; share it behind a `Mutex` if
//! several threads need it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ember_rhi::device::Device;
//! use ember_rhi::immediate::ImmediateSubmit;
//! use ember_rhi::vk;
//!
//! # fn example(device: Arc<Device>, src: vk::Buffer, dst: vk::Buffer) -> ember_rhi::RhiResult<()> {
//! let mut immediate = ImmediateSubmit::new(device.clone(), Duration::from_secs(10))?;
//! immediate.submit(|cmd| {
//!     let region = vk::BufferCopy::default().size(256);
//!     unsafe { device.handle().cmd_copy_buffer(cmd, src, dst, &[region]) };
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::trace;

use crate::backend::{GpuDevice, SubmitDesc};
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiResult, VkResultExt};
use crate::sync::Fence;

/// Default bound on how long an immediate submission may take.
pub const DEFAULT_IMMEDIATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Synchronous command submission for setup work.
pub struct ImmediateSubmit<D: GpuDevice = Device> {
    device: Arc<D>,
    command_buffer: vk::CommandBuffer,
    fence: Fence<D>,
    pool: CommandPool<D>,
    timeout: Duration,
}

impl<D: GpuDevice> ImmediateSubmit<D> {
    pub fn new(device: Arc<D>, timeout: Duration) -> RhiResult<Self> {
        let pool = CommandPool::new_transient(device.clone())?;
        let command_buffer = pool.allocate_command_buffer()?;
        let fence = Fence::new(device.clone(), false)?.with_context("immediate submit");
        Ok(Self {
            device,
            command_buffer,
            fence,
            pool,
            timeout,
        })
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn command_pool(&self) -> vk::CommandPool {
        self.pool.handle()
    }

    /// Records commands with `record`, submits them and blocks until the GPU
    /// has executed them.
    ///
    /// # Errors
    ///
    /// - any error returned by `record`; nothing is submitted in that case
    /// - [`RhiError::FenceTimeout`](crate::RhiError::FenceTimeout) if the work
    ///   does not finish within the configured timeout
    /// - [`RhiError::CallFailed`](crate::RhiError::CallFailed) for failed
    ///   reset, begin, end or submit calls
    pub fn submit<F>(&mut self, record: F) -> RhiResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> RhiResult<()>,
    {
        let cmd = self.command_buffer;
        self.fence.reset()?;
        self.device
            .reset_command_buffer(cmd)
            .call("vkResetCommandBuffer")?;
        self.device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .call("vkBeginCommandBuffer")?;

        record(cmd)?;

        self.device
            .end_command_buffer(cmd)
            .call("vkEndCommandBuffer")?;
        self.device
            .submit(&SubmitDesc {
                command_buffer: cmd,
                wait: None,
                signal: None,
                fence: self.fence.handle(),
            })
            .call("vkQueueSubmit2")?;

        self.fence.wait(self.timeout)?;
        trace!("Immediate submission complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RhiError;
    use crate::mock::{Call, MockDevice};
    use ash::vk::Handle;

    fn immediate(device: &Arc<MockDevice>) -> ImmediateSubmit<MockDevice> {
        ImmediateSubmit::new(device.clone(), DEFAULT_IMMEDIATE_TIMEOUT).unwrap()
    }

    #[test]
    fn test_submit_follows_reset_record_submit_wait() {
        let device = Arc::new(MockDevice::new());
        let mut imm = immediate(&device);
        let cmd = imm.command_buffer.as_raw();
        let fence = imm.fence.handle().as_raw();
        device.clear_calls();

        let mut recorded_with = None;
        imm.submit(|cmd| {
            recorded_with = Some(cmd.as_raw());
            Ok(())
        })
        .unwrap();

        assert_eq!(recorded_with, Some(cmd));
        assert_eq!(
            device.calls(),
            vec![
                Call::ResetFence(fence),
                Call::ResetCommandBuffer(cmd),
                Call::BeginCommandBuffer(cmd),
                Call::EndCommandBuffer(cmd),
                Call::Submit {
                    command_buffer: cmd,
                    wait: None,
                    signal: None,
                    fence,
                },
                Call::WaitFence(fence),
            ]
        );
    }

    #[test]
    fn test_uses_a_transient_pool() {
        let device = Arc::new(MockDevice::new());
        let imm = immediate(&device);
        let pool = imm.command_pool().as_raw();
        assert!(device.calls().iter().any(|c| matches!(
            c,
            Call::CreateCommandPool { pool: p, flags }
                if *p == pool && flags.contains(vk::CommandPoolCreateFlags::TRANSIENT)
        )));
    }

    #[test]
    fn test_submit_is_reusable() {
        let device = Arc::new(MockDevice::new());
        let mut imm = immediate(&device);
        for _ in 0..3 {
            imm.submit(|_| Ok(())).unwrap();
        }
        assert_eq!(device.count(|c| matches!(c, Call::Submit { .. })), 3);
    }

    #[test]
    fn test_stalled_gpu_is_a_timeout() {
        let device = Arc::new(MockDevice::new());
        let mut imm = immediate(&device);
        device.stall_gpu(true);

        let err = imm.submit(|_| Ok(())).unwrap_err();

        assert!(matches!(
            err,
            RhiError::FenceTimeout {
                context: "immediate submit",
                ..
            }
        ));
    }

    #[test]
    fn test_record_error_skips_submission() {
        let device = Arc::new(MockDevice::new());
        let mut imm = immediate(&device);

        let result = imm.submit(|_| Err(RhiError::InvalidHandle("bad upload".into())));

        assert!(matches!(result, Err(RhiError::InvalidHandle(_))));
        assert_eq!(device.count(|c| matches!(c, Call::Submit { .. })), 0);
    }

    #[test]
    fn test_submit_failure_is_reported_with_call_site() {
        let device = Arc::new(MockDevice::new());
        let mut imm = immediate(&device);
        device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);

        let err = imm.submit(|_| Ok(())).unwrap_err();

        assert!(matches!(
            err,
            RhiError::CallFailed {
                call: "vkQueueSubmit2",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
    }
}
