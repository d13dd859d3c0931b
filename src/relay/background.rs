//! Background service: one connection manager per connected frame.
//!
//! Accepts content ports from the extension runtime and spawns a
//! [`ConnectionManager`] for each. Managers are keyed by tab and frame, so
//! managers of different tabs never share a queue or a network connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Background                   │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ (tab 7, frame 0) → ConnectionManager   │──┼──► daemon ?tabId=7
//! │  │ (tab 9, frame 0) → ConnectionManager   │──┼──► daemon ?tabId=9
//! │  │ (tab 9, frame 3) → ConnectionManager   │──┼──► daemon ?tabId=9
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A port arriving for a key that already has a manager (the tab navigated)
//! stops the old manager before the new one starts. A manager leaves the
//! registry once it reaches [`ConnectionState::Closed`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::Result;
use crate::identifiers::{FrameId, TabId};
use crate::trace::TraceEmitter;
use crate::transport::{ConnectListener, Connector, Port, RuntimeBus};

use super::context::ConnectionContext;
use super::manager::{ConnectionManager, ConnectionState};

// ============================================================================
// PortKey
// ============================================================================

/// Registry key: the frame a content port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortKey {
    /// Owning tab.
    pub tab_id: TabId,
    /// Frame within the tab.
    pub frame_id: FrameId,
}

impl PortKey {
    /// Creates a key.
    #[inline]
    #[must_use]
    pub const fn new(tab_id: TabId, frame_id: FrameId) -> Self {
        Self { tab_id, frame_id }
    }

    /// Creates a key for a tab's top-level frame.
    #[inline]
    #[must_use]
    pub const fn main(tab_id: TabId) -> Self {
        Self::new(tab_id, FrameId::main())
    }
}

// ============================================================================
// ManagerEntry
// ============================================================================

/// Registry bookkeeping for one running manager.
struct ManagerEntry {
    /// Distinguishes a replaced manager from its successor.
    generation: u64,
    /// Manager state.
    state: watch::Receiver<ConnectionState>,
    /// Stops the manager.
    stop: oneshot::Sender<()>,
}

// ============================================================================
// Background
// ============================================================================

/// Background service owning every connection manager.
///
/// # Example
///
/// ```ignore
/// let (runtime, listener) = ExtensionRuntime::new();
/// let background = Background::spawn(
///     &Settings::default(),
///     Arc::new(WsConnector::new()),
///     runtime.bus().clone(),
///     listener,
/// )?;
/// ```
pub struct Background {
    /// Daemon endpoint before per-tab parameters.
    endpoint: Url,

    /// Constant delay between reconnect attempts.
    reconnect_delay: Duration,

    /// Opens daemon connections.
    connector: Arc<dyn Connector>,

    /// Trace publisher shared by all managers.
    tracer: TraceEmitter,

    /// Running managers.
    managers: RwLock<FxHashMap<PortKey, ManagerEntry>>,

    /// Next manager generation.
    generation: AtomicU64,

    /// Port accept loop.
    accept_task: Mutex<Option<JoinHandle<()>>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// Background - Constructor
// ============================================================================

impl Background {
    /// Creates the service and starts accepting ports from `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `settings` are
    /// invalid.
    pub fn spawn(
        settings: &Settings,
        connector: Arc<dyn Connector>,
        bus: RuntimeBus,
        listener: ConnectListener,
    ) -> Result<Arc<Self>> {
        settings.validate()?;
        let endpoint = settings.endpoint_url()?;

        let background = Arc::new(Self {
            endpoint,
            reconnect_delay: settings.reconnect_delay(),
            connector,
            tracer: TraceEmitter::new(bus),
            managers: RwLock::new(FxHashMap::default()),
            generation: AtomicU64::new(0),
            accept_task: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let accept = Arc::clone(&background);
        let handle = tokio::spawn(async move {
            accept.accept_loop(listener).await;
        });
        *background.accept_task.lock() = Some(handle);

        info!(endpoint = %background.endpoint, "Background service started");

        Ok(background)
    }
}

// ============================================================================
// Background - Public API
// ============================================================================

impl Background {
    /// Returns the daemon endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns the number of running managers.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.managers.read().len()
    }

    /// Returns the state of the manager for `key`.
    #[must_use]
    pub fn state(&self, key: PortKey) -> Option<ConnectionState> {
        self.managers.read().get(&key).map(|entry| *entry.state.borrow())
    }

    /// Returns a watcher for the state of the manager for `key`.
    #[must_use]
    pub fn watch_state(&self, key: PortKey) -> Option<watch::Receiver<ConnectionState>> {
        self.managers.read().get(&key).map(|entry| entry.state.clone())
    }

    /// Stops the manager for `key`.
    ///
    /// Returns `false` if no manager was running for it.
    pub fn close(&self, key: PortKey) -> bool {
        let removed = self.managers.write().remove(&key);

        match removed {
            Some(entry) => {
                let _ = entry.stop.send(());
                debug!(tab_id = %key.tab_id, frame_id = %key.frame_id, "Manager stopped");
                true
            }
            None => false,
        }
    }

    /// Stops accepting ports and stops every manager.
    pub fn shutdown(&self) {
        info!("Background service shutting down");

        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.accept_task.lock().take() {
            handle.abort();
        }

        let managers: Vec<_> = {
            let mut map = self.managers.write();
            map.drain().collect()
        };

        for (key, entry) in managers {
            let _ = entry.stop.send(());
            debug!(tab_id = %key.tab_id, frame_id = %key.frame_id, "Manager stopped during shutdown");
        }

        info!("Background service shutdown complete");
    }
}

// ============================================================================
// Background - Accept Loop
// ============================================================================

impl Background {
    /// Accepts content ports until the runtime goes away or shutdown.
    async fn accept_loop(self: Arc<Self>, mut listener: ConnectListener) {
        debug!("Accept loop started");

        while let Some(port) = listener.accept().await {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.handle_port(port);
        }

        debug!("Accept loop terminated");
    }

    /// Starts a manager for one content port.
    fn handle_port(self: &Arc<Self>, port: Port) {
        let Some(context) = port.sender().and_then(ConnectionContext::from_sender) else {
            warn!(port = port.name(), "Rejecting port without a tab");
            return;
        };

        let key = PortKey::new(context.tab_id, context.frame_id);
        let (manager, state, stop) = ConnectionManager::new(
            context,
            &self.endpoint,
            Arc::clone(&self.connector),
            port,
            self.tracer.clone(),
            self.reconnect_delay,
        );
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let replaced = self.managers.write().insert(
            key,
            ManagerEntry {
                generation,
                state,
                stop,
            },
        );

        if let Some(previous) = replaced {
            let _ = previous.stop.send(());
            info!(tab_id = %key.tab_id, frame_id = %key.frame_id, "Replaced manager after navigation");
        }

        debug!(tab_id = %key.tab_id, frame_id = %key.frame_id, url = %manager.url(), "Manager spawned");

        let background = Arc::clone(self);
        tokio::spawn(async move {
            manager.run().await;
            background.release(key, generation);
        });
    }

    /// Removes a finished manager unless it was already replaced.
    fn release(&self, key: PortKey, generation: u64) {
        let mut managers = self.managers.write();
        if managers
            .get(&key)
            .is_some_and(|entry| entry.generation == generation)
        {
            managers.remove(&key);
            debug!(tab_id = %key.tab_id, frame_id = %key.frame_id, "Manager released");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
