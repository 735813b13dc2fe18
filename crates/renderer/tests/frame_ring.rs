//! Multi-frame scenarios for the frame ring against the recording device.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use ember_renderer::frame_manager::{FrameManager, FrameSettings, FrameState};
use ember_renderer::MAX_FRAMES_IN_FLIGHT;
use ember_rhi::deletion_queue::{Release, ReleaseKind};
use ember_rhi::immediate::{DEFAULT_IMMEDIATE_TIMEOUT, ImmediateSubmit};
use ember_rhi::mock::{Call, MockDevice, MockSwapchain};
use ember_rhi::RhiError;

fn ring(initial_descriptor_sets: u32) -> (Arc<MockDevice>, FrameManager<MockDevice>) {
    let device = Arc::new(MockDevice::new());
    let settings = FrameSettings {
        initial_descriptor_sets,
        ..Default::default()
    };
    let frames = FrameManager::new(device.clone(), settings).unwrap();
    (device, frames)
}

fn run_frame(frames: &mut FrameManager<MockDevice>, swapchain: &MockSwapchain) {
    assert!(frames.begin_frame(swapchain).unwrap().is_some());
    frames.end_frame(swapchain).unwrap();
}

fn buffer_release(raw: u64) -> Call {
    Call::Release(ReleaseKind::Buffer, raw)
}

#[test]
fn resources_retired_in_a_frame_outlive_the_next_frame() {
    let (device, mut frames) = ring(8);
    let swapchain = MockSwapchain::new(3);
    let slot0_fence = frames.current_frame().in_flight_fence().as_raw();

    frames.begin_frame(&swapchain).unwrap().unwrap();
    frames.current_frame_mut().deletion_queue().push(Release::Buffer {
        buffer: vk::Buffer::from_raw(9001),
        allocation: None,
    });
    frames.end_frame(&swapchain).unwrap();

    // Frame 1 runs in the other slot and must not touch slot 0's queue
    run_frame(&mut frames, &swapchain);
    assert_eq!(device.count(|c| *c == buffer_release(9001)), 0);

    // Frame 2 reuses slot 0: released only after its fence was waited on
    device.clear_calls();
    frames.begin_frame(&swapchain).unwrap().unwrap();
    let calls = device.calls();
    let wait = calls
        .iter()
        .position(|c| *c == Call::WaitFence(slot0_fence))
        .unwrap();
    let release = calls.iter().position(|c| *c == buffer_release(9001)).unwrap();
    assert!(wait < release);
}

#[test]
fn descriptor_pools_are_reused_across_frames() {
    let (device, mut frames) = ring(4);
    let swapchain = MockSwapchain::new(2);
    let layout = vk::DescriptorSetLayout::null();

    for _ in 0..3 * MAX_FRAMES_IN_FLIGHT {
        frames.begin_frame(&swapchain).unwrap().unwrap();
        for _ in 0..10 {
            frames
                .current_frame_mut()
                .descriptors()
                .allocate(layout)
                .unwrap();
        }
        frames.end_frame(&swapchain).unwrap();
    }

    // Each slot grew once (4 + 6 sets) during its first frame and then
    // recycled the same pools.
    assert_eq!(
        device.count(|c| matches!(c, Call::CreateDescriptorPool { .. })),
        2 * MAX_FRAMES_IN_FLIGHT
    );
    assert_eq!(device.live_descriptor_pools(), 2 * MAX_FRAMES_IN_FLIGHT);
}

#[test]
fn resize_cycle_replaces_semaphores_and_resumes() {
    let (device, mut frames) = ring(8);
    let swapchain = MockSwapchain::new(3);
    swapchain.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
    let stale = frames.current_frame().image_available();

    assert_eq!(frames.begin_frame(&swapchain).unwrap(), None);
    assert!(frames.resize_requested());

    frames.wait_for_all_frames().unwrap();
    frames.reset_semaphores().unwrap();
    assert!(!frames.resize_requested());
    assert!(device.calls().contains(&Call::DestroySemaphore(stale.as_raw())));

    let fresh = frames.current_frame().image_available();
    run_frame(&mut frames, &swapchain);
    assert_eq!(swapchain.acquires().last(), Some(&fresh.as_raw()));
    assert_eq!(frames.frame_number(), 1);
}

#[test]
fn stalled_gpu_surfaces_as_fence_timeout_on_slot_reuse() {
    let (device, mut frames) = ring(8);
    let swapchain = MockSwapchain::new(2);

    device.stall_gpu(true);
    run_frame(&mut frames, &swapchain);
    run_frame(&mut frames, &swapchain);

    match frames.begin_frame(&swapchain) {
        Err(RhiError::FenceTimeout { .. }) => {}
        other => panic!("expected a fence timeout, got {other:?}"),
    }
    assert_eq!(frames.slot_state(0), Some(FrameState::Submitted));
}

#[test]
fn immediate_submit_does_not_disturb_frame_fences() {
    let (device, mut frames) = ring(8);
    let swapchain = MockSwapchain::new(2);
    let mut immediate = ImmediateSubmit::new(device.clone(), DEFAULT_IMMEDIATE_TIMEOUT).unwrap();

    run_frame(&mut frames, &swapchain);
    immediate.submit(|_cmd| Ok(())).unwrap();
    run_frame(&mut frames, &swapchain);
    run_frame(&mut frames, &swapchain);

    assert_eq!(frames.frame_number(), 3);
    let frame_fence = frames.current_frame().in_flight_fence();
    assert!(device.is_fence_signaled(frame_fence));
}
