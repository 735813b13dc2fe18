//! Recording stand-ins for [`GpuDevice`] and [`PresentTarget`].
//!
//! [`MockDevice`] hands out sequential fake handles, records every call in
//! order and models just enough device behaviour for the frame-critical
//! code paths:
//!
//! - fences are signaled by a submission that names them, unless the GPU is
//!   stalled, and waiting on an unsignaled fence reports `TIMEOUT`;
//! - descriptor pools hold `max_sets` sets and report
//!   `ERROR_OUT_OF_POOL_MEMORY` once full, until reset;
//! - allocation errors can be injected ahead of the pool model.
//!
//! [`MockSwapchain`] cycles through its images and replays scripted
//! acquire/present results.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;

use crate::backend::{GpuDevice, SubmitDesc};
use crate::deletion_queue::{Release, ReleaseKind};
use crate::swapchain::PresentTarget;

/// One recorded device call. Handles are raw `u64` values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateFence { fence: u64, signaled: bool },
    DestroyFence(u64),
    WaitFence(u64),
    ResetFence(u64),
    CreateSemaphore(u64),
    DestroySemaphore(u64),
    CreateCommandPool {
        pool: u64,
        flags: vk::CommandPoolCreateFlags,
    },
    DestroyCommandPool(u64),
    AllocateCommandBuffer(u64),
    ResetCommandBuffer(u64),
    BeginCommandBuffer(u64),
    EndCommandBuffer(u64),
    /// Semaphores are recorded with their stage masks.
    Submit {
        command_buffer: u64,
        wait: Option<(u64, vk::PipelineStageFlags2)>,
        signal: Option<(u64, vk::PipelineStageFlags2)>,
        fence: u64,
    },
    CreateDescriptorPool { pool: u64, max_sets: u32 },
    AllocateDescriptorSet { pool: u64, ok: bool },
    ResetDescriptorPool(u64),
    DestroyDescriptorPool(u64),
    Release(ReleaseKind, u64),
}

#[derive(Debug)]
struct PoolState {
    max_sets: u32,
    allocated: u32,
}

#[derive(Debug, Default)]
struct DeviceState {
    next_handle: u64,
    calls: Vec<Call>,
    fences: HashMap<u64, bool>,
    pools: HashMap<u64, PoolState>,
    injected_allocation_errors: VecDeque<vk::Result>,
    submit_error: Option<vk::Result>,
    gpu_stalled: bool,
}

impl DeviceState {
    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// A [`GpuDevice`] that records calls instead of talking to a driver.
#[derive(Debug, Default)]
pub struct MockDevice {
    state: Mutex<DeviceState>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("mock device state poisoned")
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// While stalled, submissions never signal their fence.
    pub fn stall_gpu(&self, stalled: bool) {
        self.state().gpu_stalled = stalled;
    }

    /// Makes the next descriptor set allocations fail with `errors`, in order.
    pub fn inject_allocation_errors(&self, errors: impl IntoIterator<Item = vk::Result>) {
        self.state().injected_allocation_errors.extend(errors);
    }

    /// Makes the next submission fail with `error`.
    pub fn fail_next_submit(&self, error: vk::Result) {
        self.state().submit_error = Some(error);
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state()
            .fences
            .get(&fence.as_raw())
            .copied()
            .unwrap_or(false)
    }

    /// Number of descriptor pools created and not yet destroyed.
    pub fn live_descriptor_pools(&self) -> usize {
        self.state().pools.len()
    }

    /// `(max_sets, allocated)` for a live pool.
    pub fn descriptor_pool_usage(&self, pool: vk::DescriptorPool) -> Option<(u32, u32)> {
        self.state()
            .pools
            .get(&pool.as_raw())
            .map(|p| (p.max_sets, p.allocated))
    }

    /// Count of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| predicate(c)).count()
    }
}

impl GpuDevice for MockDevice {
    fn graphics_family(&self) -> u32 {
        0
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.next();
        state.fences.insert(raw, signaled);
        state.calls.push(Call::CreateFence {
            fence: raw,
            signaled,
        });
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.fences.remove(&fence.as_raw());
        state.calls.push(Call::DestroyFence(fence.as_raw()));
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(Call::WaitFence(fence.as_raw()));
        match state.fences.get(&fence.as_raw()) {
            Some(true) => Ok(()),
            Some(false) => Err(vk::Result::TIMEOUT),
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(Call::ResetFence(fence.as_raw()));
        state.fences.insert(fence.as_raw(), false);
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state();
        let raw = state.next();
        state.calls.push(Call::CreateSemaphore(raw));
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state()
            .calls
            .push(Call::DestroySemaphore(semaphore.as_raw()));
    }

    fn create_command_pool(
        &self,
        _queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let mut state = self.state();
        let raw = state.next();
        state.calls.push(Call::CreateCommandPool { pool: raw, flags });
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state()
            .calls
            .push(Call::DestroyCommandPool(pool.as_raw()));
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state();
        let raw = state.next();
        state.calls.push(Call::AllocateCommandBuffer(raw));
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state()
            .calls
            .push(Call::ResetCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        self.state()
            .calls
            .push(Call::BeginCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state()
            .calls
            .push(Call::EndCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn submit(&self, desc: &SubmitDesc) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Submit {
            command_buffer: desc.command_buffer.as_raw(),
            wait: desc.wait.map(|(s, stage)| (s.as_raw(), stage)),
            signal: desc.signal.map(|(s, stage)| (s.as_raw(), stage)),
            fence: desc.fence.as_raw(),
        });
        if let Some(error) = state.submit_error.take() {
            return Err(error);
        }
        if desc.fence != vk::Fence::null() && !state.gpu_stalled {
            state.fences.insert(desc.fence.as_raw(), true);
        }
        Ok(())
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let mut state = self.state();
        let raw = state.next();
        state.pools.insert(
            raw,
            PoolState {
                max_sets,
                allocated: 0,
            },
        );
        state.calls.push(Call::CreateDescriptorPool {
            pool: raw,
            max_sets,
        });
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let mut state = self.state();
        let result = if let Some(error) = state.injected_allocation_errors.pop_front() {
            Err(error)
        } else {
            match state.pools.get_mut(&pool.as_raw()) {
                Some(p) if p.allocated < p.max_sets => {
                    p.allocated += 1;
                    Ok(())
                }
                Some(_) => Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
                None => Err(vk::Result::ERROR_UNKNOWN),
            }
        };

        state.calls.push(Call::AllocateDescriptorSet {
            pool: pool.as_raw(),
            ok: result.is_ok(),
        });
        result.map(|()| {
            let raw = state.next();
            vk::DescriptorSet::from_raw(raw)
        })
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        let mut state = self.state();
        if let Some(p) = state.pools.get_mut(&pool.as_raw()) {
            p.allocated = 0;
        }
        state.calls.push(Call::ResetDescriptorPool(pool.as_raw()));
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        state.pools.remove(&pool.as_raw());
        state.calls.push(Call::DestroyDescriptorPool(pool.as_raw()));
    }

    fn release(&self, resource: Release) {
        self.state()
            .calls
            .push(Call::Release(resource.kind(), resource.raw_handle()));
    }
}

#[derive(Debug, Default)]
struct SwapchainState {
    image_count: u32,
    next_image: u32,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    acquires: Vec<u64>,
    presents: Vec<(u32, u64)>,
}

/// A [`PresentTarget`] with scripted results.
#[derive(Debug)]
pub struct MockSwapchain {
    state: Mutex<SwapchainState>,
}

impl MockSwapchain {
    pub fn new(image_count: u32) -> Self {
        Self {
            state: Mutex::new(SwapchainState {
                image_count: image_count.max(1),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SwapchainState> {
        self.state.lock().expect("mock swapchain state poisoned")
    }

    /// Queues a result for a future acquire, ahead of the default cycling.
    pub fn script_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state().acquire_script.push_back(result);
    }

    /// Queues a result for a future present.
    pub fn script_present(&self, result: VkResult<bool>) {
        self.state().present_script.push_back(result);
    }

    /// Semaphores passed to each acquire, in order.
    pub fn acquires(&self) -> Vec<u64> {
        self.state().acquires.clone()
    }

    /// `(image_index, wait_semaphore)` for each present, in order.
    pub fn presents(&self) -> Vec<(u32, u64)> {
        self.state().presents.clone()
    }
}

impl PresentTarget for MockSwapchain {
    fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        _timeout_ns: u64,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state();
        state.acquires.push(semaphore.as_raw());
        if let Some(result) = state.acquire_script.pop_front() {
            return result;
        }
        let index = state.next_image;
        state.next_image = (index + 1) % state.image_count;
        Ok((index, false))
    }

    fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> VkResult<bool> {
        let mut state = self.state();
        state.presents.push((image_index, wait_semaphore.as_raw()));
        state.present_script.pop_front().unwrap_or(Ok(false))
    }
}
