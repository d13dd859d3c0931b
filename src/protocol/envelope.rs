//! Tagged envelope crossing the content/background boundary.
//!
//! Every message on an extension port travels as an [`Envelope`]. The
//! payload is kept as raw UTF-8 JSON so the relay never interprets it; the
//! receiving side calls [`Envelope::validate`] before acting on it and drops
//! (with a log line) anything that does not parse.
//!
//! # Format
//!
//! ```text
//! Envelope {
//!     kind:      request | response
//!     tab_id:    Option<TabId>   (set by the background)
//!     timestamp: u64             (ms since UNIX epoch)
//!     payload:   Vec<u8>         (UTF-8 JSON object or array)
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::TabId;

// ============================================================================
// Helpers
// ============================================================================

/// Returns the current time in milliseconds since the UNIX epoch.
#[inline]
#[must_use]
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// EnvelopeKind
// ============================================================================

/// Direction marker for an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Page → daemon.
    Request,
    /// Daemon → page.
    Response,
}

// ============================================================================
// Envelope
// ============================================================================

/// Message wrapper used on extension ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Direction.
    pub kind: EnvelopeKind,
    /// Owning tab, when known to the sender.
    pub tab_id: Option<TabId>,
    /// Creation time in milliseconds.
    pub timestamp: u64,
    /// Raw JSON payload.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope from raw payload bytes.
    #[inline]
    #[must_use]
    pub fn new(kind: EnvelopeKind, tab_id: Option<TabId>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            tab_id,
            timestamp: timestamp_ms(),
            payload,
        }
    }

    /// Wraps a page request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the value cannot be serialized.
    pub fn request(payload: &Value) -> Result<Self> {
        Ok(Self::new(
            EnvelopeKind::Request,
            None,
            serde_json::to_vec(payload)?,
        ))
    }

    /// Wraps a daemon response for a tab.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the value cannot be serialized.
    pub fn response(tab_id: TabId, payload: &Value) -> Result<Self> {
        Ok(Self::new(
            EnvelopeKind::Response,
            Some(tab_id),
            serde_json::to_vec(payload)?,
        ))
    }

    /// Returns the payload as text, if it is valid UTF-8.
    #[inline]
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Parses and validates the payload.
    ///
    /// A relay payload must be a JSON object (single JSON-RPC message) or an
    /// array (batch).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnvelope`] if the payload is not UTF-8 JSON or
    /// is a JSON scalar.
    pub fn validate(&self) -> Result<Value> {
        let text = self
            .payload_str()
            .ok_or_else(|| Error::invalid_envelope("payload is not UTF-8"))?;

        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::invalid_envelope(format!("payload is not JSON: {e}")))?;

        if !(value.is_object() || value.is_array()) {
            return Err(Error::invalid_envelope(
                "payload must be a JSON object or array",
            ));
        }

        Ok(value)
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
    fn test_request_envelope_validates() {
        let payload = json!({ "id": 1, "method": "eth_chainId" });
        let envelope = Envelope::request(&payload).expect("envelope");
        assert_eq!(envelope.kind, EnvelopeKind::Request);
        assert!(envelope.tab_id.is_none());
        assert!(envelope.timestamp > 0);
        assert_eq!(envelope.validate().expect("valid"), payload);
    }

    #[test]
    fn test_batch_payload_is_accepted() {
        let tab_id = TabId::new(3).expect("valid tab id");
        let envelope = Envelope::response(tab_id, &json!([{ "id": 1 }, { "id": 2 }]))
            .expect("envelope");
        assert!(envelope.validate().expect("valid").is_array());
        assert_eq!(envelope.tab_id, Some(tab_id));
    }

    #[test]
    fn test_rejects_non_utf8() {
        let envelope = Envelope::new(EnvelopeKind::Request, None, vec![0xff, 0xfe]);
        assert!(matches!(
            envelope.validate(),
            Err(Error::InvalidEnvelope { .. })
        ));
    }

    #[test]
    fn test_rejects_non_json_and_scalars() {
        let garbage = Envelope::new(EnvelopeKind::Request, None, b"{not json".to_vec());
        assert!(garbage.validate().is_err());

        let scalar = Envelope::new(EnvelopeKind::Request, None, b"42".to_vec());
        assert!(scalar.validate().is_err());
    }
}
