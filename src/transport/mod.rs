//! Physical transports between execution contexts.
//!
//! Each hop of the relay runs over its own primitive:
//!
//! ```text
//! ┌──────────────┐  page   ┌──────────────┐  port   ┌──────────────┐  network  ┌────────┐
//! │ PageProvider │◄───────►│ ContentRelay │◄───────►│ Connection-  │◄─────────►│ Daemon │
//! │   (page)     │  window │  (content)   │ runtime │ Manager (bg) │ WebSocket │        │
//! └──────────────┘         └──────────────┘         └──────────────┘           └────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `page` | Window message bus and page streams |
//! | `mux` | Logical channels over a page stream |
//! | `port` | Extension ports, runtime and broadcast bus |
//! | `daemon` | Daemon connection traits and WebSocket implementation |
//! | `memory` | In-process daemon connections |

// ============================================================================
// Submodules
// ============================================================================

/// Daemon connection traits and the WebSocket connector.
pub mod daemon;

/// In-process daemon connections.
pub mod memory;

/// Logical channel multiplexing.
pub mod mux;

/// Page-level window messaging.
pub mod page;

/// Extension ports and runtime broadcast.
pub mod port;

// ============================================================================
// Re-exports
// ============================================================================

pub use daemon::{Connector, DaemonLink, WsConnector, WsLink};
pub use memory::{DaemonSession, MemoryConnector, MemoryDaemon};
pub use mux::{ChannelReceiver, ChannelSender, LogicalChannel, MuxFrame, Multiplexer, PeerState};
pub use page::{PageEvent, PageReader, PageStream, PageWindow, PageWriter};
pub use port::{ConnectListener, ExtensionRuntime, Port, PortSender, RuntimeBus};
