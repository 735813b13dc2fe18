//! Platform layer for the ember renderer.
//!
//! - Window creation via winit
//! - Vulkan surface creation and the instance extensions it requires

mod window;

pub use window::{Surface, Window, required_extensions};

// Re-export winit types the binary drives the event loop with
pub use winit::application::ApplicationHandler;
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::window::WindowId;
