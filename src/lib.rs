//! Wallet relay - connection relay between a web page and a native wallet daemon.
//!
//! A browser-extension-style pipeline carrying EIP-1193 JSON-RPC traffic
//! from an injected page provider, through a content script and a background
//! service, to a daemon reachable over WebSocket.
//!
//! # Architecture
//!
//! Each execution context is an independent task; contexts only exchange
//! messages:
//!
//! - **Page**: [`PageProvider`] assigns request ids and correlates responses
//! - **Content script**: [`ContentRelay`] forwards verbatim between the page
//!   transport and one extension port per frame
//! - **Background**: [`Background`] runs one [`ConnectionManager`] per frame,
//!   each owning one lazily opened, automatically reconnected daemon
//!   connection
//! - **Panel**: [`PanelTrace`] replays the traffic trace of one tab
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use wallet_relay::{
//!     Background, ContentRelay, Document, ExtensionRuntime, PageProvider, PageWindow,
//!     PortSender, Result, Settings, TabId, WsConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::default();
//!     wallet_relay::logging::init(&settings);
//!
//!     let (runtime, listener) = ExtensionRuntime::new();
//!     let _background = Background::spawn(
//!         &settings,
//!         Arc::new(WsConnector::new()),
//!         runtime.bus().clone(),
//!         listener,
//!     )?;
//!
//!     let window = PageWindow::new();
//!     let provider = PageProvider::new(&window);
//!     let Some(tab_id) = TabId::new(7) else { return Ok(()) };
//!     let _relay = ContentRelay::spawn(
//!         Document::default(),
//!         window.clone(),
//!         runtime.clone(),
//!         PortSender::tab(tab_id).with_origin("https://app.example"),
//!     );
//!
//!     let chain_id = provider.request(json!({ "method": "eth_chainId" })).await?;
//!     println!("Chain id: {chain_id}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`relay`] | Provider, content relay, connection manager, background |
//! | [`trace`] | Trace emitter, panel backlog, request/response pairing |
//! | [`transport`] | Page bus, multiplexer, extension ports, daemon links |
//! | [`protocol`] | Message shapes crossing context boundaries |
//! | [`config`] | Settings read once at startup |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`document`] | Pre-rendering lifecycle |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Settings read once at startup.
pub mod config;

/// Hosting document lifecycle.
pub mod document;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for relay entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Log subscriber setup.
pub mod logging;

/// Message types crossing execution context boundaries.
pub mod protocol;

/// The relay components.
///
/// - [`PageProvider`] - page-facing request API
/// - [`ContentRelay`] - content-script forwarder
/// - [`ConnectionManager`] - per-tab daemon connection
/// - [`Background`] - manager registry
pub mod relay;

/// Traffic tracing for the debugging panel.
pub mod trace;

/// Transports between execution contexts.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Relay types
pub use relay::{
    Background, ConnectionContext, ConnectionManager, ConnectionState, ContentRelay,
    PageProvider, PortKey, RequestArgs,
};

// Trace types
pub use trace::{PanelFeed, PanelTrace, TraceEmitter, TraceLog, TraceRow};

// Transport types
pub use transport::{
    Connector, DaemonLink, ExtensionRuntime, MemoryConnector, MemoryDaemon, PageWindow, Port,
    PortSender, RuntimeBus, WsConnector,
};

// Protocol types
pub use protocol::{ChannelId, Envelope, EnvelopeKind, TraceEvent, TraceKind};

// Configuration
pub use config::{LogLevel, Settings};

// Document lifecycle
pub use document::{Document, DocumentState};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{FrameId, RpcId, TabId};
