//! Trace sink for the debugging panel.
//!
//! | Half | Type | State |
//! |------|------|-------|
//! | Background | [`TraceEmitter`] | None; broadcasts each event |
//! | Panel | [`PanelTrace`] | Backlog until first show, then live |
//! | Panel display | [`TraceLog`] | Request/response pairing |

// ============================================================================
// Submodules
// ============================================================================

/// Request/response pairing for display.
pub mod log;

/// Panel-side listener with backlog replay.
pub mod panel;

/// Background-side emitter.
pub mod sink;

// ============================================================================
// Re-exports
// ============================================================================

pub use log::{TraceLog, TraceRow};
pub use panel::{PanelFeed, PanelTrace};
pub use sink::TraceEmitter;
