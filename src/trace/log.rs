//! Display correlation of trace events.
//!
//! The panel shows each `request` next to its `response` when the JSON-RPC
//! payloads share an `id`. This is purely presentational: the relay itself
//! never correlates traffic.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

use crate::protocol::{TraceEvent, TraceKind};

// ============================================================================
// TraceRow
// ============================================================================

/// One row of the panel's traffic table.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceRow {
    /// The tab's port connected.
    Start(TraceEvent),
    /// A request and, once seen, its response.
    Exchange {
        /// Page → daemon message.
        request: TraceEvent,
        /// Daemon → page message with the same id.
        response: Option<TraceEvent>,
    },
    /// A response with no matching open request.
    Unpaired(TraceEvent),
}

// ============================================================================
// TraceLog
// ============================================================================

/// Ordered, paired view of a tab's trace events.
#[derive(Debug, Default)]
pub struct TraceLog {
    rows: Vec<TraceRow>,
    /// Row index of each request still awaiting its response, by id.
    open: FxHashMap<String, usize>,
}

impl TraceLog {
    /// Creates an empty log.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event, pairing it when possible.
    pub fn push(&mut self, event: TraceEvent) {
        match event.kind {
            TraceKind::Start => self.rows.push(TraceRow::Start(event)),

            TraceKind::Request => {
                if let Some(key) = event.rpc_id().map(ToString::to_string) {
                    self.open.insert(key, self.rows.len());
                }
                self.rows.push(TraceRow::Exchange {
                    request: event,
                    response: None,
                });
            }

            TraceKind::Response => {
                let index = event
                    .rpc_id()
                    .map(ToString::to_string)
                    .and_then(|key| self.open.remove(&key));

                match index.and_then(|i| self.rows.get_mut(i)) {
                    Some(TraceRow::Exchange { response, .. }) => *response = Some(event),
                    _ => self.rows.push(TraceRow::Unpaired(event)),
                }
            }
        }
    }

    /// Appends every event in order.
    pub fn extend(&mut self, events: impl IntoIterator<Item = TraceEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// Returns the rows in arrival order.
    #[inline]
    #[must_use]
    pub fn rows(&self) -> &[TraceRow] {
        &self.rows
    }

    /// Returns the number of requests still awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.open.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
