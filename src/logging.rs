//! Logging initialisation.
//!
//! The relay logs through `tracing`. [`init`] installs a `fmt` subscriber
//! whose filter comes from `RUST_LOG` when set, otherwise from
//! [`Settings::log_level`].

// ============================================================================
// Imports
// ============================================================================

use tracing_subscriber::EnvFilter;

use crate::config::Settings;

// ============================================================================
// Functions
// ============================================================================

/// Builds the filter for `settings`, preferring `RUST_LOG`.
#[must_use]
pub fn filter(settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.directive()))
}

/// Installs the global subscriber.
///
/// Returns `false` if a subscriber was already installed; the existing one is
/// kept.
pub fn init(settings: &Settings) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(settings))
        .with_target(false)
        .try_init()
        .is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_second_init_is_noop() {
        let settings = Settings::new().with_log_level(LogLevel::Debug);
        let _ = init(&settings);
        assert!(!init(&settings));
    }
}
