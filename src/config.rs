//! Relay settings.
//!
//! Settings are read once when a context starts and stay read-only for the
//! relay's lifetime. Changing them requires restarting the context.
//!
//! # Format
//!
//! ```json
//! {
//!   "logLevel": "debug",
//!   "endpoint": "ws://127.0.0.1:1248",
//!   "reconnectDelayMs": 1000
//! }
//! ```
//!
//! Every field is optional.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wallet_relay::{LogLevel, Settings};
//!
//! let settings = Settings::new()
//!     .with_endpoint("ws://127.0.0.1:9000")
//!     .with_log_level(LogLevel::Debug)
//!     .with_reconnect_delay(Duration::from_millis(250));
//!
//! let endpoint = settings.endpoint_url()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Daemon endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:1248";

/// Constant delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// LogLevel
// ============================================================================

/// Log verbosity. Controls output only, never behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Lifecycle events.
    #[default]
    Info,
    /// State transitions.
    Debug,
    /// Every frame.
    Trace,
}

impl LogLevel {
    /// Returns the level name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Returns the `tracing` filter directive for this crate.
    #[inline]
    #[must_use]
    pub fn directive(self) -> String {
        format!("wallet_relay={}", self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Process-wide relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Daemon base URL (`ws://` or `wss://`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Delay between reconnection attempts, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Settings {
    /// Creates settings with defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            log_level: LogLevel::default(),
            endpoint: default_endpoint(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }

    /// Parses and validates settings from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed or a value is
    /// invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid settings JSON: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads and validates settings from a JSON file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Config`] if its content is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Settings {
    /// Sets the daemon endpoint.
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the log level.
    #[inline]
    #[must_use]
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    /// Sets the reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Settings {
    /// Returns the reconnect delay.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Parses the daemon endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint is not a `ws`/`wss` URL.
    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint {:?}: {e}", self.endpoint)))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(Error::config(format!(
                "endpoint scheme must be ws or wss, got {scheme:?}"
            ))),
        }
    }

    /// Validates every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;

        if self.reconnect_delay_ms == 0 {
            return Err(Error::config("reconnectDelayMs must be greater than 0"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
