//! Renderer configuration.
//!
//! [`RendererConfig`] collects every tunable the renderer reads at startup.
//! The binary fills it from command-line flags; library users can start from
//! [`RendererConfig::default`] and override fields directly.

use std::time::Duration;

use crate::error::{Error, Result};

/// Largest descriptor-set count a single pool may be created with.
const MAX_DESCRIPTOR_SETS: u32 = 4092;

/// Window creation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "ember".to_string(),
        }
    }
}

/// Preferred swapchain present mode.
///
/// FIFO is always available; the others fall back to FIFO when the surface
/// does not support them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

/// Startup configuration for the renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    pub window: WindowConfig,
    /// Enable the Khronos validation layer when it is installed.
    pub enable_validation: bool,
    pub present_mode: PresentModePreference,
    /// Bound on the per-frame fence wait. Expiry is fatal.
    pub frame_fence_timeout: Duration,
    /// Bound on swapchain image acquisition. Expiry is fatal.
    pub acquire_timeout: Duration,
    /// Bound on the blocking immediate-submit fence wait. Expiry is fatal.
    pub immediate_submit_timeout: Duration,
    /// Set count of the first pool in each per-frame descriptor allocator.
    pub initial_descriptor_sets: u32,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            enable_validation: cfg!(debug_assertions),
            present_mode: PresentModePreference::default(),
            frame_fence_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(1),
            immediate_submit_timeout: Duration::from_secs(10),
            initial_descriptor_sets: 1000,
            clear_color: [0.1, 0.1, 0.15, 1.0],
        }
    }
}

impl RendererConfig {
    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window extent must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        for (name, timeout) in [
            ("frame_fence_timeout", self.frame_fence_timeout),
            ("acquire_timeout", self.acquire_timeout),
            ("immediate_submit_timeout", self.immediate_submit_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        if !(1..=MAX_DESCRIPTOR_SETS).contains(&self.initial_descriptor_sets) {
            return Err(Error::Config(format!(
                "initial_descriptor_sets must be in 1..={MAX_DESCRIPTOR_SETS}, got {}",
                self.initial_descriptor_sets
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_fence_timeout, Duration::from_secs(1));
        assert_eq!(config.immediate_submit_timeout, Duration::from_secs(10));
        assert_eq!(config.initial_descriptor_sets, 1000);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let mut config = RendererConfig::default();
        config.window.height = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RendererConfig {
            frame_fence_timeout: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("frame_fence_timeout"));
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(4092, true)]
    #[case(4093, false)]
    fn test_descriptor_set_bounds(#[case] sets: u32, #[case] valid: bool) {
        let config = RendererConfig {
            initial_descriptor_sets: sets,
            ..Default::default()
        };
        assert_eq!(config.validate().is_ok(), valid);
    }
}
