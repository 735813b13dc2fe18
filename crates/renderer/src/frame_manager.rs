//! The frames-in-flight ring.
//!
//! [`FrameManager`] owns [`MAX_FRAMES_IN_FLIGHT`] slots. Each slot has its
//! own command buffer, completion fence, acquire and render-finished
//! semaphores, deletion queue and descriptor allocator. Frame `n` uses slot
//! `n % MAX_FRAMES_IN_FLIGHT`, so the CPU records frame `n + 1` while the GPU
//! may still be executing frame `n`.
//!
//! # Slot lifecycle
//!
//! ```text
//! Idle ──begin_frame──▶ Recording ──end_frame──▶ Submitted
//!  ▲                                                 │
//!  │            (fence observed on slot reuse)       ▼
//!  └──────────────── aborted frame ◀─────────── Complete
//! ```
//!
//! [`begin_frame`](FrameManager::begin_frame):
//!
//! 1. waits on the slot fence (bounded, expiry is fatal),
//! 2. flushes the slot's deletion queue and resets its descriptor pools,
//! 3. acquires a swapchain image; a stale or suboptimal surface aborts the
//!    frame and raises the resize flag,
//! 4. resets the fence and command buffer and begins recording.
//!
//! The fence is only reset after a successful acquire, so an aborted frame
//! leaves it signaled and the next attempt on the slot does not block.
//!
//! [`end_frame`](FrameManager::end_frame) submits with a wait on the acquire
//! semaphore and a signal of the render-finished semaphore and the fence,
//! then presents.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_renderer::frame_manager::{FrameManager, FrameSettings};
//! use ember_rhi::device::Device;
//! use ember_rhi::swapchain::Swapchain;
//!
//! # fn example(device: Arc<Device>, swapchain: &Swapchain) -> ember_rhi::RhiResult<()> {
//! let mut frames = FrameManager::new(device, FrameSettings::default())?;
//!
//! if let Some(image_index) = frames.begin_frame(swapchain)? {
//!     let cmd = frames.current_frame().command_buffer();
//!     // Record into `cmd`, targeting swapchain image `image_index`...
//!     # let _ = (cmd, image_index);
//!     frames.end_frame(swapchain)?;
//! }
//! if frames.resize_requested() {
//!     // Recreate the swapchain, then:
//!     frames.reset_semaphores()?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, trace};

use ember_core::RendererConfig;
use ember_rhi::backend::{GpuDevice, SubmitDesc};
use ember_rhi::command::CommandPool;
use ember_rhi::deletion_queue::DeletionQueue;
use ember_rhi::descriptor_allocator::{DescriptorAllocatorGrowable, PoolSizeRatio};
use ember_rhi::device::Device;
use ember_rhi::sync::{Fence, Semaphore, timeout_ns};
use ember_rhi::{PresentTarget, RhiError, RhiResult, VkResultExt};

use crate::MAX_FRAMES_IN_FLIGHT;

/// Stages that wait for the acquired swapchain image.
///
/// Barriers out of `UNDEFINED` or `PRESENT_SRC_KHR` use `ALL_COMMANDS` as
/// their source scope, so they chain with this wait.
pub const ACQUIRE_WAIT_STAGE: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::ALL_COMMANDS;

/// Stages that must finish before the render-finished semaphore signals.
///
/// Covers the transfer-stage blit into the swapchain image and the final
/// move to `PRESENT_SRC_KHR`.
pub const RENDER_FINISHED_STAGE: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::ALL_COMMANDS;

/// Descriptor mix of the per-frame allocators.
pub const FRAME_DESCRIPTOR_RATIOS: [PoolSizeRatio; 4] = [
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
];

/// Where a slot is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// Never used, or its last frame was aborted before recording.
    Idle,
    /// Command buffer open for recording.
    Recording,
    /// Handed to the queue; completion not yet observed.
    Submitted,
    /// Fence observed signaled; resources of the previous use are free.
    Complete,
}

impl FrameState {
    pub fn name(self) -> &'static str {
        match self {
            FrameState::Idle => "idle",
            FrameState::Recording => "recording",
            FrameState::Submitted => "submitted",
            FrameState::Complete => "complete",
        }
    }
}

/// Ring timing and sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSettings {
    pub fence_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Set count of the first pool in each slot's descriptor allocator.
    pub initial_descriptor_sets: u32,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            fence_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(1),
            initial_descriptor_sets: 1000,
        }
    }
}

impl From<&RendererConfig> for FrameSettings {
    fn from(config: &RendererConfig) -> Self {
        Self {
            fence_timeout: config.frame_fence_timeout,
            acquire_timeout: config.acquire_timeout,
            initial_descriptor_sets: config.initial_descriptor_sets,
        }
    }
}

/// Resources exclusively owned by one ring slot.
pub struct FrameData<D: GpuDevice = Device> {
    command_buffer: vk::CommandBuffer,
    image_available: Semaphore<D>,
    render_finished: Semaphore<D>,
    in_flight: Fence<D>,
    deletion_queue: DeletionQueue,
    descriptors: DescriptorAllocatorGrowable<D>,
    state: FrameState,
}

impl<D: GpuDevice> FrameData<D> {
    fn new(device: &Arc<D>, pool: &CommandPool<D>, settings: &FrameSettings) -> RhiResult<Self> {
        Ok(Self {
            command_buffer: pool.allocate_command_buffer()?,
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            // Signaled so the first wait on the slot passes
            in_flight: Fence::new(device.clone(), true)?.with_context("frame fence"),
            deletion_queue: DeletionQueue::new(),
            descriptors: DescriptorAllocatorGrowable::new(
                device.clone(),
                settings.initial_descriptor_sets,
                &FRAME_DESCRIPTOR_RATIOS,
            )?,
            state: FrameState::Idle,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight_fence(&self) -> vk::Fence {
        self.in_flight.handle()
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Resources pushed here are released the next time this slot begins.
    #[inline]
    pub fn deletion_queue(&mut self) -> &mut DeletionQueue {
        &mut self.deletion_queue
    }

    /// Sets allocated here are valid until this slot begins again.
    #[inline]
    pub fn descriptors(&mut self) -> &mut DescriptorAllocatorGrowable<D> {
        &mut self.descriptors
    }
}

/// Cycles the frame slots and drives acquire, submit and present.
///
/// Single-threaded: all methods are called from the render thread.
pub struct FrameManager<D: GpuDevice = Device> {
    device: Arc<D>,
    frames: Vec<FrameData<D>>,
    // Declared after `frames`: command buffers are freed with the pool.
    command_pool: CommandPool<D>,
    settings: FrameSettings,
    frame_number: u64,
    image_index: u32,
    resize_requested: bool,
}

impl<D: GpuDevice> FrameManager<D> {
    pub fn new(device: Arc<D>, settings: FrameSettings) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone())?;

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            frames.push(FrameData::new(&device, &command_pool, &settings)?);
            debug!("Created frame slot {}", slot);
        }

        info!(
            "Frame manager created with {} frames in flight",
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            device,
            frames,
            command_pool,
            settings,
            frame_number: 0,
            image_index: 0,
            resize_requested: false,
        })
    }

    /// Frames submitted so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Slot the next (or current) frame uses.
    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_number % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    #[inline]
    pub fn current_frame(&self) -> &FrameData<D> {
        &self.frames[self.current_slot()]
    }

    #[inline]
    pub fn current_frame_mut(&mut self) -> &mut FrameData<D> {
        let slot = self.current_slot();
        &mut self.frames[slot]
    }

    pub fn slot_state(&self, slot: usize) -> Option<FrameState> {
        self.frames.get(slot).map(FrameData::state)
    }

    /// Swapchain image acquired by the last successful `begin_frame`.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn settings(&self) -> &FrameSettings {
        &self.settings
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[inline]
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool.handle()
    }

    /// Whether the swapchain must be recreated before the next frame.
    #[inline]
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    /// Flags the swapchain as stale, e.g. on a window resize event.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    fn invalid_state(&self, operation: &'static str) -> RhiError {
        let slot = self.current_slot();
        RhiError::InvalidFrameState {
            slot,
            operation,
            state: self.frames[slot].state.name(),
        }
    }

    /// Prepares the current slot and acquires a swapchain image.
    ///
    /// Returns `Ok(None)` when the surface is out of date or suboptimal: no
    /// work is recorded for this frame and [`resize_requested`] is set.
    ///
    /// # Errors
    ///
    /// - [`RhiError::FenceTimeout`] if the slot's previous frame does not
    ///   complete in time
    /// - [`RhiError::AcquireTimeout`] if no image becomes available in time
    /// - [`RhiError::InvalidFrameState`] if the slot is already recording
    ///
    /// [`resize_requested`]: Self::resize_requested
    pub fn begin_frame<P: PresentTarget + ?Sized>(&mut self, target: &P) -> RhiResult<Option<u32>> {
        let slot = self.current_slot();
        if self.frames[slot].state == FrameState::Recording {
            return Err(self.invalid_state("begin a frame"));
        }

        let device = self.device.clone();
        let acquire_timeout = self.settings.acquire_timeout;
        let frame = &mut self.frames[slot];

        frame.in_flight.wait(self.settings.fence_timeout)?;
        if frame.state == FrameState::Submitted {
            frame.state = FrameState::Complete;
        }

        frame.deletion_queue.flush(&*device);
        frame.descriptors.clear_pools()?;

        let acquired = target.acquire_next_image(frame.image_available.handle(), timeout_ns(acquire_timeout));
        let image_index = match acquired {
            Ok((index, false)) => index,
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain stale on acquire (frame {}), skipping frame", self.frame_number);
                frame.state = FrameState::Idle;
                self.resize_requested = true;
                return Ok(None);
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                return Err(RhiError::AcquireTimeout {
                    timeout: acquire_timeout,
                });
            }
            Err(result) => return Err(result).call("vkAcquireNextImageKHR"),
        };

        frame.in_flight.reset()?;
        device
            .reset_command_buffer(frame.command_buffer)
            .call("vkResetCommandBuffer")?;
        device
            .begin_command_buffer(
                frame.command_buffer,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
            .call("vkBeginCommandBuffer")?;
        frame.state = FrameState::Recording;
        self.image_index = image_index;

        trace!(
            "Frame {} recording in slot {} (image {})",
            self.frame_number, slot, image_index
        );
        Ok(Some(image_index))
    }

    /// Closes, submits and presents the current frame, then advances the
    /// ring.
    ///
    /// A stale or suboptimal present sets [`resize_requested`](Self::resize_requested).
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidFrameState`] unless `begin_frame` returned an image
    /// for this frame; otherwise the failing call.
    pub fn end_frame<P: PresentTarget + ?Sized>(&mut self, target: &P) -> RhiResult<()> {
        let slot = self.current_slot();
        if self.frames[slot].state != FrameState::Recording {
            return Err(self.invalid_state("end a frame"));
        }

        let frame = &mut self.frames[slot];
        self.device
            .end_command_buffer(frame.command_buffer)
            .call("vkEndCommandBuffer")?;

        self.device
            .submit(&SubmitDesc {
                command_buffer: frame.command_buffer,
                wait: Some((frame.image_available.handle(), ACQUIRE_WAIT_STAGE)),
                signal: Some((frame.render_finished.handle(), RENDER_FINISHED_STAGE)),
                fence: frame.in_flight.handle(),
            })
            .call("vkQueueSubmit2")?;
        frame.state = FrameState::Submitted;

        let presented = target.present(self.image_index, frame.render_finished.handle());
        self.frame_number += 1;

        match presented {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain stale on present, resize requested");
                self.resize_requested = true;
                Ok(())
            }
            Err(result) => Err(result).call("vkQueuePresentKHR"),
        }
    }

    /// Blocks until every slot's last submission has completed.
    pub fn wait_for_all_frames(&mut self) -> RhiResult<()> {
        for frame in &mut self.frames {
            frame.in_flight.wait(self.settings.fence_timeout)?;
            if frame.state == FrameState::Submitted {
                frame.state = FrameState::Complete;
            }
        }
        Ok(())
    }

    /// Replaces every slot's semaphores and clears the resize flag.
    ///
    /// An aborted acquire can leave a semaphore with a pending signal; call
    /// this once the device is idle after recreating the swapchain.
    pub fn reset_semaphores(&mut self) -> RhiResult<()> {
        for frame in &mut self.frames {
            frame.image_available = Semaphore::new(self.device.clone())?;
            frame.render_finished = Semaphore::new(self.device.clone())?;
        }
        self.resize_requested = false;
        debug!("Frame semaphores recreated");
        Ok(())
    }
}

impl<D: GpuDevice> Drop for FrameManager<D> {
    fn drop(&mut self) {
        for frame in &mut self.frames {
            frame.deletion_queue.flush(&*self.device);
        }
        debug!("Frame manager destroyed after {} frames", self.frame_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use ember_rhi::deletion_queue::{Release, ReleaseKind};
    use ember_rhi::mock::{Call, MockDevice, MockSwapchain};

    fn ring() -> (Arc<MockDevice>, FrameManager<MockDevice>) {
        let device = Arc::new(MockDevice::new());
        let settings = FrameSettings {
            initial_descriptor_sets: 4,
            ..Default::default()
        };
        let frames = FrameManager::new(device.clone(), settings).unwrap();
        (device, frames)
    }

    fn position(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
        calls.iter().position(pred).expect("call not recorded")
    }

    fn run_frame(frames: &mut FrameManager<MockDevice>, swapchain: &MockSwapchain) {
        assert!(frames.begin_frame(swapchain).unwrap().is_some());
        frames.end_frame(swapchain).unwrap();
    }

    #[test]
    fn test_frame_manager_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameManager>();
        assert_send::<FrameManager<MockDevice>>();
    }

    #[test]
    fn test_settings_from_config() {
        let config = RendererConfig {
            initial_descriptor_sets: 64,
            frame_fence_timeout: Duration::from_millis(250),
            ..Default::default()
        };
        let settings = FrameSettings::from(&config);
        assert_eq!(settings.initial_descriptor_sets, 64);
        assert_eq!(settings.fence_timeout, Duration::from_millis(250));
        assert_eq!(settings.acquire_timeout, config.acquire_timeout);
    }

    #[test]
    fn test_slots_cycle_through_ring() {
        let (_device, mut frames) = ring();
        let swapchain = MockSwapchain::new(3);

        let mut visited = Vec::new();
        for _ in 0..6 {
            visited.push(frames.current_slot());
            run_frame(&mut frames, &swapchain);
        }

        assert_eq!(visited, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(frames.frame_number(), 6);
    }

    #[test]
    fn test_submit_waits_acquire_and_signals_render_finished() {
        let (device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        let image_available = frames.current_frame().image_available().as_raw();
        let render_finished = frames.current_frame().render_finished().as_raw();
        let fence = frames.current_frame().in_flight_fence().as_raw();
        let cmd = frames.current_frame().command_buffer().as_raw();

        run_frame(&mut frames, &swapchain);

        assert!(device.calls().contains(&Call::Submit {
            command_buffer: cmd,
            wait: Some((image_available, ACQUIRE_WAIT_STAGE)),
            signal: Some((render_finished, RENDER_FINISHED_STAGE)),
            fence,
        }));
        assert_eq!(swapchain.acquires(), vec![image_available]);
        assert_eq!(swapchain.presents(), vec![(0, render_finished)]);
        assert_eq!(frames.slot_state(0), Some(FrameState::Submitted));
    }

    /// Whether two sync2 stage masks share an execution scope.
    /// TOP_OF_PIPE and BOTTOM_OF_PIPE contribute nothing.
    fn scopes_overlap(a: vk::PipelineStageFlags2, b: vk::PipelineStageFlags2) -> bool {
        use ash::vk::PipelineStageFlags2 as S;
        let strip = |m: S| m & !(S::TOP_OF_PIPE | S::BOTTOM_OF_PIPE);
        let (a, b) = (strip(a), strip(b));
        if a.is_empty() || b.is_empty() {
            return false;
        }
        a.contains(S::ALL_COMMANDS) || b.contains(S::ALL_COMMANDS) || a.intersects(b)
    }

    #[test]
    fn test_swapchain_barriers_chain_with_frame_semaphores() {
        use ash::vk::ImageLayout as L;
        use ash::vk::PipelineStageFlags2 as S;
        use ember_rhi::layout::transition;
        let color = vk::ImageAspectFlags::COLOR;

        // Acquire side: the first write to the image waits on image_available.
        for old in [L::UNDEFINED, L::PRESENT_SRC_KHR] {
            let acquire = transition(old, L::TRANSFER_DST_OPTIMAL, color).unwrap();
            assert!(scopes_overlap(acquire.src_stage, ACQUIRE_WAIT_STAGE));
        }

        // Present side: the blit and the layout change finish before the signal.
        let present = transition(L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR, color).unwrap();
        assert!(scopes_overlap(present.dst_stage, RENDER_FINISHED_STAGE));
        assert!(scopes_overlap(S::TRANSFER, RENDER_FINISHED_STAGE));
        assert!(!scopes_overlap(S::TRANSFER, S::ALL_GRAPHICS));
        assert!(!scopes_overlap(S::BOTTOM_OF_PIPE, RENDER_FINISHED_STAGE));
    }

    #[test]
    fn test_suboptimal_acquire_skips_submission() {
        let (device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        swapchain.script_acquire(Ok((0, true)));
        let fence = frames.current_frame().in_flight_fence();

        assert_eq!(frames.begin_frame(&swapchain).unwrap(), None);

        assert!(frames.resize_requested());
        assert_eq!(device.count(|c| matches!(c, Call::Submit { .. })), 0);
        assert_eq!(device.count(|c| matches!(c, Call::ResetFence(_))), 0);
        assert!(device.is_fence_signaled(fence));
        assert_eq!(frames.frame_number(), 0);
        assert_eq!(frames.slot_state(0), Some(FrameState::Idle));
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame() {
        let (_device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        swapchain.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        assert_eq!(frames.begin_frame(&swapchain).unwrap(), None);
        assert!(frames.resize_requested());

        // The aborted slot is retried without blocking
        assert!(frames.begin_frame(&swapchain).unwrap().is_some());
    }

    #[test]
    fn test_stale_present_requests_resize() {
        let (_device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        swapchain.script_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        run_frame(&mut frames, &swapchain);

        assert!(frames.resize_requested());
        assert_eq!(frames.frame_number(), 1);
    }

    #[test]
    fn test_reset_semaphores_replaces_handles_and_clears_flag() {
        let (device, mut frames) = ring();
        frames.request_resize();
        let old = frames.current_frame().image_available();

        frames.reset_semaphores().unwrap();

        assert!(!frames.resize_requested());
        assert_ne!(frames.current_frame().image_available(), old);
        assert!(device.calls().contains(&Call::DestroySemaphore(old.as_raw())));
    }

    #[test]
    fn test_acquire_timeout_is_fatal() {
        let (_device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        swapchain.script_acquire(Err(vk::Result::TIMEOUT));

        let err = frames.begin_frame(&swapchain).unwrap_err();
        assert!(matches!(err, RhiError::AcquireTimeout { .. }));
    }

    #[test]
    fn test_other_acquire_errors_name_the_call() {
        let (_device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        swapchain.script_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR));

        let err = frames.begin_frame(&swapchain).unwrap_err();
        assert!(matches!(
            err,
            RhiError::CallFailed {
                call: "vkAcquireNextImageKHR",
                result: vk::Result::ERROR_SURFACE_LOST_KHR
            }
        ));
    }

    #[test]
    fn test_slot_reuse_waits_for_its_previous_submission() {
        let (_device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        frames.device().stall_gpu(true);

        run_frame(&mut frames, &swapchain);
        run_frame(&mut frames, &swapchain);

        // Slot 0's submission from frame 0 never signaled
        let err = frames.begin_frame(&swapchain).unwrap_err();
        assert!(matches!(
            err,
            RhiError::FenceTimeout {
                context: "frame fence",
                ..
            }
        ));
    }

    #[test]
    fn test_slot_resources_released_before_new_allocations() {
        let (device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);

        frames.begin_frame(&swapchain).unwrap();
        let layout = vk::DescriptorSetLayout::from_raw(0xD5);
        frames.current_frame_mut().descriptors().allocate(layout).unwrap();
        frames
            .current_frame_mut()
            .deletion_queue()
            .push(Release::Sampler(vk::Sampler::from_raw(0x5A)));
        frames.end_frame(&swapchain).unwrap();
        run_frame(&mut frames, &swapchain);

        device.clear_calls();
        frames.begin_frame(&swapchain).unwrap();
        frames.current_frame_mut().descriptors().allocate(layout).unwrap();

        let calls = device.calls();
        let wait = position(&calls, |c| matches!(c, Call::WaitFence(_)));
        let release = position(&calls, |c| *c == Call::Release(ReleaseKind::Sampler, 0x5A));
        let reset = position(&calls, |c| matches!(c, Call::ResetDescriptorPool(_)));
        let allocate = position(&calls, |c| matches!(c, Call::AllocateDescriptorSet { .. }));

        assert!(wait < release);
        assert!(release < reset);
        assert!(reset < allocate);
        assert!(frames.current_frame_mut().deletion_queue().is_empty());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let (_device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        frames.begin_frame(&swapchain).unwrap();

        let err = frames.begin_frame(&swapchain).unwrap_err();
        assert!(matches!(
            err,
            RhiError::InvalidFrameState {
                slot: 0,
                state: "recording",
                ..
            }
        ));
    }

    #[test]
    fn test_end_without_begin_is_rejected() {
        let (device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);

        let err = frames.end_frame(&swapchain).unwrap_err();

        assert!(matches!(
            err,
            RhiError::InvalidFrameState { state: "idle", .. }
        ));
        assert_eq!(device.count(|c| matches!(c, Call::Submit { .. })), 0);
    }

    #[test]
    fn test_submission_failure_is_reported() {
        let (device, mut frames) = ring();
        let swapchain = MockSwapchain::new(2);
        frames.begin_frame(&swapchain).unwrap();
        device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);

        let err = frames.end_frame(&swapchain).unwrap_err();

        assert!(matches!(
            err,
            RhiError::CallFailed {
                call: "vkQueueSubmit2",
                ..
            }
        ));
        assert!(swapchain.presents().is_empty());
    }

    #[test]
    fn test_drop_flushes_pending_releases() {
        let device = Arc::new(MockDevice::new());
        {
            let mut frames = FrameManager::new(device.clone(), FrameSettings::default()).unwrap();
            frames
                .current_frame_mut()
                .deletion_queue()
                .push(Release::Sampler(vk::Sampler::from_raw(0x77)));
        }
        assert!(
            device
                .calls()
                .contains(&Call::Release(ReleaseKind::Sampler, 0x77))
        );
    }
}
