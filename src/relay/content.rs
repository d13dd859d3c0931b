//! Content-script relay: page transport ↔ extension port.
//!
//! One [`ContentRelay`] runs per frame. It never looks inside payloads: the
//! `provider` logical channel is forwarded verbatim to the background port
//! and back. The legacy channel is still attached so its traffic is
//! consumed and dropped instead of lingering unrouted.
//!
//! # Lifecycle
//!
//! | Step | Action |
//! |------|--------|
//! | 1 | Wait while the document is pre-rendering |
//! | 2 | Bind the page stream and attach the multiplexer (sends `hello`) |
//! | 3 | Open the extension port, announce `ready` to the page |
//! | 4 | Forward until the port disconnects or [`ContentRelay::stop`] |
//!
//! A disconnected port is logged and announced to the page with `end`; the
//! relay does not reconnect.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::document::Document;
use crate::error::Error;
use crate::protocol::{ChannelId, Envelope, EnvelopeKind, PageChannel};
use crate::transport::{ExtensionRuntime, Multiplexer, PageStream, PageWindow, PortSender};

// ============================================================================
// Constants
// ============================================================================

/// Name of the extension port opened by every content relay.
pub const PORT_NAME: &str = "wallet-relay-content";

// ============================================================================
// ContentRelay
// ============================================================================

/// Handle to a running content relay.
///
/// Dropping the handle tears the relay down.
pub struct ContentRelay {
    /// Graceful stop request.
    stop: Mutex<Option<oneshot::Sender<()>>>,
    /// Relay task.
    task: JoinHandle<()>,
}

impl ContentRelay {
    /// Starts the relay for one frame.
    ///
    /// `sender` is the frame metadata the background will see on the port.
    #[must_use]
    pub fn spawn(
        document: Document,
        window: PageWindow,
        runtime: ExtensionRuntime,
        sender: PortSender,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(document, window, runtime, sender, stop_rx));

        Self {
            stop: Mutex::new(Some(stop_tx)),
            task,
        }
    }

    /// Stops forwarding and disconnects the port.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }

    /// Returns `true` once the relay task has exited.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ContentRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Relay Task
// ============================================================================

/// Runs one relay until the port disconnects or a stop is requested.
async fn run(
    document: Document,
    window: PageWindow,
    runtime: ExtensionRuntime,
    sender: PortSender,
    mut stop: oneshot::Receiver<()>,
) {
    if document.is_prerendering() {
        debug!("Document pre-rendering, deferring relay setup");
    }

    tokio::select! {
        _ = &mut stop => {
            debug!("Relay stopped before activation");
            return;
        }
        () = document.activated() => {}
    }

    let mux = Multiplexer::attach(PageStream::bind(&window, PageChannel::ContentScript));
    let (to_page, mut from_page) = mux.channel(ChannelId::Provider).split();
    let mut legacy = mux.channel(ChannelId::Legacy);

    let mut port = match runtime.connect(PORT_NAME, sender) {
        Ok(port) => port,
        Err(e) => {
            warn!(error = %e, "Background unavailable");
            mux.signal_end();
            return;
        }
    };

    mux.signal_ready();
    info!(port = PORT_NAME, "Content relay ready");

    loop {
        tokio::select! {
            _ = &mut stop => {
                debug!("Content relay stopped");
                break;
            }

            message = from_page.recv() => {
                let Some(payload) = message else {
                    debug!("Page stream closed");
                    break;
                };

                let envelope = match Envelope::request(&payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(error = %e, "Failed to wrap page message");
                        continue;
                    }
                };

                if let Err(e) = port.post(envelope) {
                    warn!(error = %e, "Extension port disconnected");
                    mux.signal_end();
                    break;
                }
            }

            Some(_) = legacy.recv() => {
                debug!(channel = %ChannelId::Legacy, "Dropping legacy channel message");
            }

            envelope = port.recv() => {
                let Some(envelope) = envelope else {
                    let error = Error::transport_closed(port.name());
                    warn!(%error, "Extension port disconnected");
                    mux.signal_end();
                    break;
                };

                if envelope.kind != EnvelopeKind::Response {
                    warn!(kind = ?envelope.kind, "Dropping envelope with wrong direction");
                    continue;
                }

                match envelope.validate() {
                    Ok(payload) => {
                        trace!(tab_id = ?envelope.tab_id, "Response forwarded to page");
                        to_page.send(payload);
                    }
                    Err(e) => warn!(error = %e, "Dropping invalid envelope"),
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
