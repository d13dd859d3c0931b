//! The four relay components.
//!
//! ```text
//! Page                Content script         Background                  Daemon
//! ┌──────────────┐    ┌──────────────┐       ┌────────────────────┐      ┌────────┐
//! │ PageProvider │◄──►│ ContentRelay │◄─────►│ ConnectionManager  │◄────►│        │
//! └──────────────┘mux └──────────────┘ port  │   (per tab/frame)  │  ws  └────────┘
//!                                            └─────────┬──────────┘
//!                                                      │ trace
//!                                                      ▼
//!                                               PanelTrace (panel)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `provider` | Page-facing request API |
//! | `content` | Content-script forwarder |
//! | `context` | Frame metadata and daemon URL |
//! | `manager` | Per-tab connection state machine |
//! | `background` | Manager registry and port accept loop |

// ============================================================================
// Submodules
// ============================================================================

/// Manager registry and port accept loop.
pub mod background;

/// Content-script forwarder.
pub mod content;

/// Frame metadata and daemon URL construction.
pub mod context;

/// Per-tab connection state machine.
pub mod manager;

/// Page-facing request API.
pub mod provider;

// ============================================================================
// Re-exports
// ============================================================================

pub use background::{Background, PortKey};
pub use content::{ContentRelay, PORT_NAME};
pub use context::ConnectionContext;
pub use manager::{ConnectionManager, ConnectionState};
pub use provider::{PageProvider, RequestArgs};

// ============================================================================
// Tests
// ============================================================================
