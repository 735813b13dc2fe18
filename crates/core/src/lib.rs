//! Core utilities for the ember renderer.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Renderer configuration
//! - Frame timing

mod config;
mod error;
mod logging;
mod timer;

pub use config::{PresentModePreference, RendererConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging, init_logging_with_filter};
pub use timer::{FrameStats, FrameTimer};
