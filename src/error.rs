//! Error types for the wallet relay.
//!
//! This module defines all error types used throughout the crate.
//! Each hop of the relay produces its own error kind; errors are never
//! translated across hops.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wallet_relay::{Result, PageProvider};
//! use serde_json::json;
//!
//! async fn chain_id(provider: &PageProvider) -> Result<String> {
//!     let value = provider.request(json!({ "method": "eth_chainId" })).await?;
//!     Ok(value.as_str().unwrap_or_default().to_string())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Page | [`Error::InvalidRequestArgs`], [`Error::Disconnected`], [`Error::Rpc`] |
//! | Content/background | [`Error::TransportClosed`], [`Error::InvalidEnvelope`] |
//! | Background/daemon | [`Error::ConnectionFailed`], [`Error::ConnectionClosed`], [`Error::MalformedFrame`] |
//! | Tracing | [`Error::NoReceiver`], [`Error::AlreadyShown`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::TabId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when settings are missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Page Errors
    // ========================================================================
    /// The page called `request()` with a malformed argument.
    ///
    /// Surfaced synchronously to the caller and never retried.
    #[error("Invalid request arguments: {message}")]
    InvalidRequestArgs {
        /// Why the arguments were rejected.
        message: String,
    },

    /// The transport between page and background is down.
    ///
    /// Every pending and new page-level request rejects with this.
    #[error("Disconnected")]
    Disconnected,

    /// The daemon answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    // ========================================================================
    // Content/Background Errors
    // ========================================================================
    /// The extension port between content script and background closed.
    ///
    /// Logged by the content relay, never retried.
    #[error("Transport closed: {port}")]
    TransportClosed {
        /// Name of the port that closed.
        port: String,
    },

    /// An envelope crossing a context boundary failed validation.
    #[error("Invalid envelope: {message}")]
    InvalidEnvelope {
        /// Description of the validation failure.
        message: String,
    },

    // ========================================================================
    // Background/Daemon Errors
    // ========================================================================
    /// Network connection to the daemon could not be established.
    ///
    /// Recovered by the connection manager's reconnect loop.
    #[error("Connection to {url} failed: {message}")]
    ConnectionFailed {
        /// Daemon URL that was dialled.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// Network connection to the daemon closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The daemon sent a frame that is neither keepalive nor JSON.
    #[error("Malformed frame from daemon: {message}")]
    MalformedFrame {
        /// Parser message.
        message: String,
    },

    // ========================================================================
    // Tracing Errors
    // ========================================================================
    /// A trace event was broadcast while nobody was listening.
    ///
    /// Expected when no debugging panel is open.
    #[error("No receiver for broadcast")]
    NoReceiver,

    /// The panel feed for a tab was already handed over.
    #[error("Trace panel for tab {tab_id} already shown")]
    AlreadyShown {
        /// Inspected tab.
        tab_id: TabId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid request arguments error.
    #[inline]
    pub fn invalid_request_args(message: impl Into<String>) -> Self {
        Self::InvalidRequestArgs {
            message: message.into(),
        }
    }

    /// Creates a JSON-RPC error.
    #[inline]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Creates a transport closed error.
    #[inline]
    pub fn transport_closed(port: impl Into<String>) -> Self {
        Self::TransportClosed { port: port.into() }
    }

    /// Creates an invalid envelope error.
    #[inline]
    pub fn invalid_envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }

    /// Creates a connection failed error.
    #[inline]
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error concerns the daemon network connection.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionClosed
                | Self::MalformedFrame { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recovered by reconnecting.
    ///
    /// The connection manager retries these indefinitely.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error() || matches!(self, Self::Io(_))
    }

    /// Returns `true` if this is the expected "nobody is listening" broadcast
    /// outcome.
    #[inline]
    #[must_use]
    pub fn is_no_receiver(&self) -> bool {
        matches!(self, Self::NoReceiver)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection_failed("ws://127.0.0.1:1", "refused");
        assert_eq!(
            err.to_string(),
            "Connection to ws://127.0.0.1:1 failed: refused"
        );
    }

    #[test]
    fn test_invalid_request_args_display() {
        let err = Error::invalid_request_args("method must be a non-empty string");
        assert_eq!(
            err.to_string(),
            "Invalid request arguments: method must be a non-empty string"
        );
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection_failed("u", "m").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::malformed_frame("x").is_connection_error());
        assert!(!Error::Disconnected.is_connection_error());
        assert!(!Error::transport_closed("relay").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        let io_err: Error = IoError::new(ErrorKind::ConnectionRefused, "refused").into();
        assert!(io_err.is_recoverable());
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(!Error::invalid_request_args("bad").is_recoverable());
        assert!(!Error::NoReceiver.is_recoverable());
    }

    #[test]
    fn test_is_no_receiver() {
        assert!(Error::NoReceiver.is_no_receiver());
        assert!(!Error::Disconnected.is_no_receiver());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let err: Error = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, Error::Url(_)));
    }
}
