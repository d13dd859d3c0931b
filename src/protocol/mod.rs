//! Relay protocol message types.
//!
//! This module defines every message shape that crosses an execution
//! context boundary.
//!
//! # Protocol Overview
//!
//! | Message Type | Boundary | Purpose |
//! |--------------|----------|---------|
//! | [`MuxFrame`](crate::transport::mux::MuxFrame) | Page ↔ content script | Logical channel data and control |
//! | [`Envelope`] | Content script ↔ background | Tagged opaque JSON payload |
//! | [`DaemonFrame`] | Background ↔ daemon | JSON-RPC text or keepalive |
//! | [`TraceEvent`] | Background → panel | Traffic trace |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Page channel names and logical channel ids |
//! | `envelope` | Extension port envelope |
//! | `frame` | Daemon network frames |
//! | `trace` | Trace event wire format |

// ============================================================================
// Submodules
// ============================================================================

/// Page channel names and logical channel identifiers.
pub mod channel;

/// Extension port envelope.
pub mod envelope;

/// Daemon network frames and keepalive words.
pub mod frame;

/// Trace event wire format.
pub mod trace;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelId, PageChannel};
pub use envelope::{Envelope, EnvelopeKind, timestamp_ms};
pub use frame::{DaemonFrame, PING, PONG};
pub use trace::{TraceEvent, TraceKind};
