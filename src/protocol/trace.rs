//! Trace events describing relay traffic.
//!
//! Trace events are the broadcast wire format consumed by the debugging
//! panel. They are informational only and never part of the relay protocol.
//!
//! # Format
//!
//! ```json
//! {
//!   "type": "request",
//!   "tabId": 7,
//!   "data": { "id": 1, "method": "eth_chainId" },
//!   "timestamp": 1760000000000
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::TabId;

use super::envelope::timestamp_ms;

// ============================================================================
// TraceKind
// ============================================================================

/// Trace event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    /// A tab's port connected.
    Start,
    /// A message was forwarded from the page to the daemon.
    Request,
    /// A message was forwarded from the daemon to the page.
    Response,
}

// ============================================================================
// TraceEvent
// ============================================================================

/// A tagged record of relay traffic for one tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub kind: TraceKind,

    /// Owning tab.
    pub tab_id: TabId,

    /// Forwarded payload (absent for `start`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Emission time in milliseconds since the UNIX epoch.
    pub timestamp: u64,
}

impl TraceEvent {
    /// Creates a `start` event.
    #[inline]
    #[must_use]
    pub fn start(tab_id: TabId) -> Self {
        Self {
            kind: TraceKind::Start,
            tab_id,
            data: None,
            timestamp: timestamp_ms(),
        }
    }

    /// Creates a `request` event.
    #[inline]
    #[must_use]
    pub fn request(tab_id: TabId, data: Value) -> Self {
        Self {
            kind: TraceKind::Request,
            tab_id,
            data: Some(data),
            timestamp: timestamp_ms(),
        }
    }

    /// Creates a `response` event.
    #[inline]
    #[must_use]
    pub fn response(tab_id: TabId, data: Value) -> Self {
        Self {
            kind: TraceKind::Response,
            tab_id,
            data: Some(data),
            timestamp: timestamp_ms(),
        }
    }

    /// Returns the JSON-RPC `id` embedded in the payload, if any.
    #[inline]
    #[must_use]
    pub fn rpc_id(&self) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|data| data.get("id"))
            .filter(|id| !id.is_null())
    }

    /// Encodes the event in its broadcast wire format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes an event from its broadcast wire format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnvelope`] if the text is not a trace event.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::invalid_envelope(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tab(id: u32) -> TabId {
        TabId::new(id).expect("valid tab id")
    }

    #[test]
    fn test_wire_format() {
        let event = TraceEvent::request(tab(7), json!({ "id": 1, "method": "eth_chainId" }));
        let value: Value = serde_json::from_str(&event.encode().expect("encode")).expect("json");

        assert_eq!(value["type"], "request");
        assert_eq!(value["tabId"], 7);
        assert_eq!(value["data"]["method"], "eth_chainId");
        assert!(value["timestamp"].as_u64().is_some());
    }

    #[test]
    fn test_start_omits_data() {
        let encoded = TraceEvent::start(tab(1)).encode().expect("encode");
        assert!(!encoded.contains("data"));
        assert!(encoded.contains("\"type\":\"start\""));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = TraceEvent::decode(r#"{"type":"ping","tabId":1,"timestamp":0}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidEnvelope { .. }));
    }

    #[test]
    fn test_rpc_id() {
        let with_id = TraceEvent::response(tab(1), json!({ "id": "abc", "result": null }));
        assert_eq!(with_id.rpc_id(), Some(&json!("abc")));

        let null_id = TraceEvent::response(tab(1), json!({ "id": null, "result": null }));
        assert_eq!(null_id.rpc_id(), None);

        assert_eq!(TraceEvent::start(tab(1)).rpc_id(), None);
    }
}
