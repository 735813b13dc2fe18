//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,ember_rhi=debug,ember_renderer=debug";

/// Initialize the global tracing subscriber.
///
/// Reads `RUST_LOG` and falls back to [`DEFAULT_FILTER`].
///
/// # Example
/// ```
/// ember_core::init_logging();
/// tracing::info!("Renderer starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

/// Initialize the global tracing subscriber with an explicit filter directive.
///
/// An unparsable directive falls back to [`DEFAULT_FILTER`] and logs a warning
/// once the subscriber is installed.
pub fn init_logging_with_filter(directive: &str) {
    match EnvFilter::try_new(directive) {
        Ok(filter) => install(filter),
        Err(err) => {
            install(EnvFilter::new(DEFAULT_FILTER));
            tracing::warn!("Invalid log filter '{}': {}", directive, err);
        }
    }
}

fn install(filter: EnvFilter) {
    // try_init so tests and embedders that already installed a subscriber keep it
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging_with_filter("debug");
        init_logging();
    }
}
