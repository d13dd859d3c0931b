//! Background half of the trace sink.
//!
//! Stateless: every event is encoded and broadcast on the runtime bus.
//! Nobody listening (no panel open) is the normal case and is swallowed.

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::TraceEvent;
use crate::transport::RuntimeBus;

// ============================================================================
// TraceEmitter
// ============================================================================

/// Publishes trace events on the runtime broadcast.
#[derive(Clone)]
pub struct TraceEmitter {
    bus: RuntimeBus,
}

impl TraceEmitter {
    /// Creates an emitter publishing on `bus`.
    #[inline]
    #[must_use]
    pub fn new(bus: RuntimeBus) -> Self {
        Self { bus }
    }

    /// Broadcasts `event`.
    ///
    /// # Errors
    ///
    /// Propagates every broadcast failure except [`Error::NoReceiver`].
    pub fn emit(&self, event: &TraceEvent) -> Result<()> {
        match self.bus.send_message(event.encode()?) {
            Ok(receivers) => {
                trace!(tab_id = %event.tab_id, kind = ?event.kind, receivers, "Trace event sent");
                Ok(())
            }
            Err(Error::NoReceiver) => {
                trace!(tab_id = %event.tab_id, kind = ?event.kind, "No trace listener");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::TabId;
    use serde_json::json;

    fn tab(id: u32) -> TabId {
        TabId::new(id).expect("valid tab id")
    }

    #[test]
    fn test_emit_without_listener_is_ok() {
        let emitter = TraceEmitter::new(RuntimeBus::new());
        assert!(emitter.emit(&TraceEvent::start(tab(1))).is_ok());
    }

    #[tokio::test]
    async fn test_emit_reaches_subscriber_in_wire_format() {
        let bus = RuntimeBus::new();
        let mut rx = bus.subscribe();
        let emitter = TraceEmitter::new(bus);

        let event = TraceEvent::request(tab(2), json!({ "id": 1, "method": "eth_accounts" }));
        emitter.emit(&event).expect("emit");

        let text = rx.recv().await.expect("message");
        assert_eq!(TraceEvent::decode(&text).expect("decode"), event);
    }
}
