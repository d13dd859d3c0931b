//! Panel half of the trace sink.
//!
//! A debugging panel can be opened long after traffic started. To avoid
//! losing that traffic, [`PanelTrace::launch`] subscribes as soon as the
//! panel's page loads and buffers every event for the inspected tab. The
//! first [`PanelTrace::show`] hands over the backlog in one batch and
//! switches the same listener to live delivery, under one lock, so each
//! event is delivered exactly once.
//!
//! ```text
//! launch ──► Buffering(backlog) ──show──► Live(feed)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::TraceEvent;
use crate::transport::RuntimeBus;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of events buffered before the panel is shown.
const MAX_BACKLOG: usize = 10_000;

// ============================================================================
// Phase
// ============================================================================

/// Delivery phase of the panel listener.
enum Phase {
    /// Panel not shown yet.
    Buffering(VecDeque<TraceEvent>),
    /// Panel shown; events go straight to the feed.
    Live(mpsc::UnboundedSender<TraceEvent>),
}

// ============================================================================
// PanelTrace
// ============================================================================

/// Trace listener for one panel and its inspected tab.
pub struct PanelTrace {
    tab_id: TabId,
    phase: Arc<Mutex<Phase>>,
    task: JoinHandle<()>,
}

impl PanelTrace {
    /// Starts listening for events of `tab_id`.
    ///
    /// Events broadcast after this call are never missed.
    #[must_use]
    pub fn launch(bus: &RuntimeBus, tab_id: TabId) -> Self {
        let rx = bus.subscribe();
        let phase = Arc::new(Mutex::new(Phase::Buffering(VecDeque::new())));
        let task = tokio::spawn(Self::run_listener(rx, tab_id, Arc::clone(&phase)));

        debug!(%tab_id, "Panel trace listener started");

        Self { tab_id, phase, task }
    }

    /// Returns the inspected tab.
    #[inline]
    #[must_use]
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Returns the number of buffered events (0 once shown).
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        match &*self.phase.lock() {
            Phase::Buffering(backlog) => backlog.len(),
            Phase::Live(_) => 0,
        }
    }

    /// Returns `true` once the panel was shown.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(&*self.phase.lock(), Phase::Live(_))
    }

    /// Hands over the backlog and switches to live delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyShown`] on every call after the first.
    pub fn show(&self) -> Result<PanelFeed> {
        let (tx, rx) = mpsc::unbounded_channel();

        let backlog = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Live(tx)) {
                Phase::Buffering(backlog) => backlog,
                live @ Phase::Live(_) => {
                    *phase = live;
                    return Err(Error::AlreadyShown {
                        tab_id: self.tab_id,
                    });
                }
            }
        };

        debug!(tab_id = %self.tab_id, backlog = backlog.len(), "Panel shown");

        Ok(PanelFeed {
            backlog: backlog.into(),
            live: rx,
        })
    }

    /// Collects events for `tab_id` until the bus or the feed closes.
    async fn run_listener(
        mut rx: broadcast::Receiver<String>,
        tab_id: TabId,
        phase: Arc<Mutex<Phase>>,
    ) {
        loop {
            let text = match rx.recv().await {
                Ok(text) => text,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%tab_id, skipped, "Panel trace listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let event = match TraceEvent::decode(&text) {
                Ok(event) => event,
                Err(e) => {
                    debug!(error = %e, "Ignoring non-trace broadcast");
                    continue;
                }
            };

            if event.tab_id != tab_id {
                continue;
            }

            let mut guard = phase.lock();
            match &mut *guard {
                Phase::Buffering(backlog) => {
                    if backlog.len() == MAX_BACKLOG {
                        backlog.pop_front();
                        debug!(%tab_id, "Trace backlog full, dropped oldest event");
                    }
                    backlog.push_back(event);
                }
                Phase::Live(tx) => {
                    if tx.send(event).is_err() {
                        debug!(%tab_id, "Panel feed closed");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for PanelTrace {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// PanelFeed
// ============================================================================

/// Events handed to a shown panel.
pub struct PanelFeed {
    /// Events captured before the panel was shown, oldest first.
    pub backlog: Vec<TraceEvent>,
    /// Events captured after.
    live: mpsc::UnboundedReceiver<TraceEvent>,
}

impl PanelFeed {
    /// Waits for the next live event.
    #[inline]
    pub async fn next(&mut self) -> Option<TraceEvent> {
        self.live.recv().await
    }

    /// Returns a live event if one is already queued.
    #[inline]
    pub fn try_next(&mut self) -> Option<TraceEvent> {
        self.live.try_recv().ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
