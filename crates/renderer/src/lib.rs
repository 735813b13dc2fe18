//! Frame orchestration for the ember renderer.
//!
//! This crate sits between the Vulkan abstraction in `ember-rhi` and the
//! application:
//! - [`GpuContext`] brings up instance, surface and device once
//! - [`FrameManager`] runs the frames-in-flight ring
//! - [`upload`] stages meshes and images into device-local memory
//! - [`material`] and [`draw`] turn render objects into command streams
//! - [`Renderer`] ties them to a window

pub mod context;
pub mod draw;
pub mod frame_manager;
pub mod gpu_data;
pub mod material;
pub mod mesh;
pub mod renderer;
pub mod upload;

pub use context::GpuContext;
pub use draw::{DrawContext, DrawStats, RenderObject};
pub use frame_manager::{FrameManager, FrameSettings, FrameState};
pub use material::{MaterialInstance, MaterialPass, PassKind};
pub use mesh::{MeshData, MeshHandle};
pub use renderer::{FrameRecorder, Renderer};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
