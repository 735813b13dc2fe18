//! Command line arguments.
//!
//! Every flag maps onto a field of [`RendererConfig`]; anything left out
//! keeps the configuration default.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use ember_core::{PresentModePreference, RendererConfig, WindowConfig};

/// Present mode selection for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliPresentMode {
    /// Vertical sync, always available.
    #[default]
    Fifo,
    /// Low-latency triple buffering; falls back to FIFO when unsupported.
    Mailbox,
    /// No synchronization, may tear; falls back to FIFO when unsupported.
    Immediate,
}

impl From<CliPresentMode> for PresentModePreference {
    fn from(cli: CliPresentMode) -> Self {
        match cli {
            CliPresentMode::Fifo => PresentModePreference::Fifo,
            CliPresentMode::Mailbox => PresentModePreference::Mailbox,
            CliPresentMode::Immediate => PresentModePreference::Immediate,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ember", about = "Vulkan renderer demo", version)]
pub struct Args {
    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    pub width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    pub height: u32,

    /// Window title.
    #[arg(long, default_value = "ember")]
    pub title: String,

    /// Enable the Khronos validation layer.
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,

    /// Disable the Khronos validation layer.
    #[arg(long)]
    pub no_validation: bool,

    /// Preferred swapchain present mode.
    #[arg(long, default_value = "fifo", value_enum)]
    pub present_mode: CliPresentMode,

    /// Bound on the per-frame fence wait, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub fence_timeout_ms: u64,

    /// Set count of the first descriptor pool in each frame slot.
    #[arg(long, default_value = "1000")]
    pub descriptor_sets: u32,

    /// Tracing filter directive, overrides `RUST_LOG`.
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Directory holding `mesh.vert.spv` and `mesh.frag.spv`. Without it
    /// only the clear color is drawn.
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,

    /// Exit after rendering this many frames.
    #[arg(long)]
    pub max_frames: Option<u64>,
}

impl Args {
    /// `None` keeps the build-dependent default.
    pub fn validation_override(&self) -> Option<bool> {
        if self.validation {
            Some(true)
        } else if self.no_validation {
            Some(false)
        } else {
            None
        }
    }

    pub fn to_config(&self) -> RendererConfig {
        let defaults = RendererConfig::default();
        RendererConfig {
            window: WindowConfig {
                width: self.width,
                height: self.height,
                title: self.title.clone(),
            },
            enable_validation: self
                .validation_override()
                .unwrap_or(defaults.enable_validation),
            present_mode: self.present_mode.into(),
            frame_fence_timeout: Duration::from_millis(self.fence_timeout_ms),
            initial_descriptor_sets: self.descriptor_sets,
            ..defaults
        }
    }

    /// Vertex and fragment shader paths under `--shader-dir`.
    pub fn shader_paths(&self) -> Option<(PathBuf, PathBuf)> {
        self.shader_dir
            .as_ref()
            .map(|dir| (dir.join("mesh.vert.spv"), dir.join("mesh.frag.spv")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ember").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_match_config() {
        let config = parse(&[]).to_config();
        let defaults = RendererConfig::default();
        assert_eq!(config, defaults);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_map_to_config() {
        let config = parse(&[
            "--width",
            "800",
            "--height",
            "600",
            "--title",
            "demo",
            "--present-mode",
            "mailbox",
            "--fence-timeout-ms",
            "250",
            "--descriptor-sets",
            "64",
            "--no-validation",
        ])
        .to_config();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "demo");
        assert_eq!(config.present_mode, PresentModePreference::Mailbox);
        assert_eq!(config.frame_fence_timeout, Duration::from_millis(250));
        assert_eq!(config.initial_descriptor_sets, 64);
        assert!(!config.enable_validation);
    }

    #[test]
    fn test_validation_flags_conflict() {
        let result = Args::try_parse_from(["ember", "--validation", "--no-validation"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_fails_validation() {
        let config = parse(&["--fence-timeout-ms", "0"]).to_config();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shader_paths() {
        assert!(parse(&[]).shader_paths().is_none());
        let (vert, frag) = parse(&["--shader-dir", "shaders"]).shader_paths().unwrap();
        assert_eq!(vert, PathBuf::from("shaders/mesh.vert.spv"));
        assert_eq!(frag, PathBuf::from("shaders/mesh.frag.spv"));
    }
}
