//! Network frames exchanged with the daemon.
//!
//! Every text frame is either one of the two reserved keepalive words or a
//! JSON-RPC message. Keepalive frames are never treated as JSON-RPC.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Keepalive ping sent by the daemon.
pub const PING: &str = "ping";

/// Keepalive answer sent by the relay.
pub const PONG: &str = "pong";

// ============================================================================
// DaemonFrame
// ============================================================================

/// Classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonFrame {
    /// Keepalive ping; answer with [`PONG`].
    Ping,
    /// Keepalive answer; nothing to do.
    Pong,
    /// JSON-RPC payload to forward to the page.
    Message(Value),
}

impl DaemonFrame {
    /// Classifies a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the frame is not a keepalive word
    /// and not valid JSON.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            PING => Ok(Self::Ping),
            PONG => Ok(Self::Pong),
            _ => serde_json::from_str(text)
                .map(Self::Message)
                .map_err(|e| Error::malformed_frame(e.to_string())),
        }
    }

    /// Returns `true` for keepalive frames.
    #[inline]
    #[must_use]
    pub fn is_keepalive(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keepalive_frames() {
        assert_eq!(DaemonFrame::parse("ping").expect("parse"), DaemonFrame::Ping);
        assert_eq!(DaemonFrame::parse("pong").expect("parse"), DaemonFrame::Pong);
        assert!(DaemonFrame::Ping.is_keepalive());
    }

    #[test]
    fn test_quoted_ping_is_json_not_keepalive() {
        let frame = DaemonFrame::parse("\"ping\"").expect("parse");
        assert_eq!(frame, DaemonFrame::Message(json!("ping")));
        assert!(!frame.is_keepalive());
    }

    #[test]
    fn test_json_message() {
        let frame = DaemonFrame::parse(r#"{"id":1,"result":"0x1"}"#).expect("parse");
        assert_eq!(frame, DaemonFrame::Message(json!({ "id": 1, "result": "0x1" })));
    }

    #[test]
    fn test_malformed_frame() {
        let err = DaemonFrame::parse("{oops").unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
    }
}
