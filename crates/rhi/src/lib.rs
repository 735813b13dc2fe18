//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance, device and swapchain bring-up
//! - Synchronization primitives and command recording
//! - Growable descriptor allocation
//! - Deferred resource destruction
//! - Blocking one-shot submission
//! - Image layout transitions
//! - Shader modules and dynamic-rendering graphics pipelines
//!
//! The frame-critical pieces are written against the [`GpuDevice`] and
//! [`PresentTarget`] traits so they can run against the recording device in
//! [`mock`] as well as a real [`device::Device`].

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod deletion_queue;
pub mod descriptor;
pub mod descriptor_allocator;
pub mod device;
pub mod image;
pub mod immediate;
pub mod instance;
pub mod layout;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod physical_device;
pub mod pipeline;
pub mod swapchain;
pub mod sync;

pub use backend::{GpuDevice, SubmitDesc};
pub use error::{RhiError, RhiResult, VkResultExt};
pub use swapchain::PresentTarget;

// Re-export ash types that users might need
pub use ash::vk;
