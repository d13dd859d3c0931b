//! In-process daemon connections.
//!
//! [`MemoryConnector`] implements [`Connector`] without touching the network.
//! Each successful `connect` hands a [`DaemonSession`] to the paired
//! [`MemoryDaemon`], which plays the daemon side. Reachability can be toggled
//! to simulate a daemon that is down or restarting.
//!
//! Used by the crate's tests and benches, and by embedders that host the
//! daemon in the same process.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{DaemonFrame, PING, PONG};

use super::daemon::{Connector, DaemonLink};

// ============================================================================
// MemoryConnector
// ============================================================================

/// Shared connector state.
struct ConnectorState {
    /// Whether `connect` succeeds.
    reachable: bool,
    /// Every URL dialled, in order.
    attempts: Vec<Url>,
}

/// In-process [`Connector`].
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    sessions: mpsc::UnboundedSender<DaemonSession>,
}

impl MemoryConnector {
    /// Creates a reachable connector and its daemon side.
    #[must_use]
    pub fn new() -> (Self, MemoryDaemon) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(ConnectorState {
                reachable: true,
                attempts: Vec::new(),
            })),
            sessions,
        };
        (connector, MemoryDaemon { sessions: rx })
    }

    /// Makes future connection attempts succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Returns the number of connection attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// Returns every URL dialled so far.
    #[must_use]
    pub fn attempted_urls(&self) -> Vec<Url> {
        self.state.lock().attempts.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn DaemonLink>> {
        let reachable = {
            let mut state = self.state.lock();
            state.attempts.push(url.clone());
            state.reachable
        };

        if !reachable {
            return Err(Error::connection_failed(url.as_str(), "daemon unreachable"));
        }

        let (to_daemon, from_relay) = mpsc::unbounded_channel();
        let (to_relay, from_daemon) = mpsc::unbounded_channel();

        self.sessions
            .send(DaemonSession {
                url: url.clone(),
                to_relay,
                from_relay,
            })
            .map_err(|_| Error::connection_failed(url.as_str(), "daemon stopped"))?;

        Ok(Box::new(MemoryLink {
            to_daemon,
            from_daemon,
        }))
    }
}

// ============================================================================
// MemoryLink
// ============================================================================

/// Relay side of an in-process connection.
struct MemoryLink {
    to_daemon: mpsc::UnboundedSender<String>,
    from_daemon: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl DaemonLink for MemoryLink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.to_daemon
            .send(text)
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        self.from_daemon.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.from_daemon.close();
    }
}

// ============================================================================
// MemoryDaemon
// ============================================================================

/// Daemon side of a [`MemoryConnector`].
pub struct MemoryDaemon {
    sessions: mpsc::UnboundedReceiver<DaemonSession>,
}

impl MemoryDaemon {
    /// Waits for the next accepted connection.
    #[inline]
    pub async fn accept(&mut self) -> Option<DaemonSession> {
        self.sessions.recv().await
    }

    /// Serves every connection with `handler`.
    ///
    /// Each JSON request is passed to the handler; `Some` replies are sent
    /// back on the same connection. Keepalive pings are answered.
    pub fn serve<F>(mut self, handler: F) -> JoinHandle<()>
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Some(session) = self.accept().await {
                tokio::spawn(session.serve(Arc::clone(&handler)));
            }
        })
    }
}

// ============================================================================
// DaemonSession
// ============================================================================

/// One accepted in-process connection, seen from the daemon.
pub struct DaemonSession {
    url: Url,
    to_relay: mpsc::UnboundedSender<String>,
    from_relay: mpsc::UnboundedReceiver<String>,
}

impl DaemonSession {
    /// Returns the URL the relay dialled.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the value of a query parameter on the dialled URL.
    #[must_use]
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Sends a text frame to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the relay dropped the link.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.to_relay
            .send(text.into())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Sends a JSON message to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the relay dropped the link.
    pub fn send_json(&self, value: &Value) -> Result<()> {
        self.send_text(serde_json::to_string(value)?)
    }

    /// Receives the next text frame from the relay.
    #[inline]
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_relay.recv().await
    }

    /// Receives the next JSON message from the relay, skipping keepalives.
    pub async fn recv_json(&mut self) -> Option<Value> {
        while let Some(text) = self.recv_text().await {
            match DaemonFrame::parse(&text) {
                Ok(DaemonFrame::Message(value)) => return Some(value),
                Ok(_) => continue,
                Err(e) => warn!(error = %e, "Relay sent malformed frame"),
            }
        }
        None
    }

    /// Answers requests with `handler` until the relay disconnects.
    async fn serve<F>(mut self, handler: Arc<F>)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        while let Some(text) = self.recv_text().await {
            let reply = match DaemonFrame::parse(&text) {
                Ok(DaemonFrame::Ping) => Some(PONG.to_string()),
                Ok(DaemonFrame::Pong) => None,
                Ok(DaemonFrame::Message(value)) => {
                    (*handler)(&value).and_then(|reply| serde_json::to_string(&reply).ok())
                }
                Err(e) => {
                    warn!(error = %e, "Relay sent malformed frame");
                    None
                }
            };

            if let Some(reply) = reply
                && self.send_text(reply).is_err()
            {
                break;
            }
        }

        debug!(url = %self.url, "Daemon session ended");
    }

    /// Sends a keepalive ping to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the relay dropped the link.
    pub fn ping(&self) -> Result<()> {
        self.send_text(PING)
    }
}

// ============================================================================
// Tests
// ============================================================================
