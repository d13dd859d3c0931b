//! Logical channel multiplexing over a page stream.
//!
//! A [`Multiplexer`] owns the reading half of a [`PageStream`] and routes
//! each inbound [`MuxFrame::Data`] to the [`LogicalChannel`] registered for
//! its [`ChannelId`]. Frames for unknown or unregistered channels are dropped.
//!
//! Control frames let each side learn whether its peer is attached:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `hello` | Sender just attached; the receiver repeats its last announcement |
//! | `ready` | Peer attached and able to forward |
//! | `end` | Peer lost its upstream transport |
//!
//! Window messages posted before the peer listens are lost, so every
//! multiplexer sends `hello` on attach. Whichever side attaches last thereby
//! still learns the other side's state.
//!
//! # Format
//!
//! ```json
//! { "type": "data", "name": "provider", "data": { ... } }
//! { "type": "hello" }
//! { "type": "ready" }
//! { "type": "end" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::protocol::ChannelId;

use super::page::{PageReader, PageStream, PageWriter};

// ============================================================================
// MuxFrame
// ============================================================================

/// Frame carried on a page stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MuxFrame {
    /// Payload for one logical channel.
    Data {
        /// Target logical channel.
        name: ChannelId,
        /// Opaque payload.
        data: Value,
    },
    /// The sending side just attached and asks for the current state.
    Hello,
    /// The sending side is attached.
    Ready,
    /// The sending side lost its upstream transport.
    End,
}

// ============================================================================
// PeerState
// ============================================================================

/// What this side knows about the opposite endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No control frame seen yet.
    Unknown,
    /// Peer announced `ready`.
    Ready,
    /// Peer announced `end`.
    Ended,
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Route table from channel id to channel inbox.
type RouteMap = FxHashMap<ChannelId, mpsc::UnboundedSender<Value>>;

/// State shared between a multiplexer and its demux task.
#[derive(Default)]
struct Shared {
    /// Registered channels.
    routes: Mutex<RouteMap>,
    /// Last `ready`/`end` this side announced, repeated on `hello`.
    announced: Mutex<Option<PeerState>>,
    /// Subscribers to every peer control frame.
    listeners: Mutex<Vec<mpsc::UnboundedSender<PeerState>>>,
}

/// Multiplexer bound to one page stream.
///
/// Dropping the multiplexer stops demultiplexing and closes every channel
/// it created.
pub struct Multiplexer {
    /// Shared writing half.
    writer: PageWriter,
    /// Routes, announcements and peer listeners.
    shared: Arc<Shared>,
    /// Peer state observed by the demux task.
    peer: watch::Receiver<PeerState>,
    /// Demux task.
    task: JoinHandle<()>,
}

impl Multiplexer {
    /// Attaches a multiplexer to a page stream and starts demultiplexing.
    #[must_use]
    pub fn attach(stream: PageStream) -> Self {
        let (writer, reader) = stream.split();
        let shared = Arc::new(Shared::default());
        let (peer_tx, peer) = watch::channel(PeerState::Unknown);

        let task = tokio::spawn(Self::run_demux(
            reader,
            writer.clone(),
            Arc::clone(&shared),
            peer_tx,
        ));
        write_frame(&writer, &MuxFrame::Hello);

        Self {
            writer,
            shared,
            peer,
            task,
        }
    }

    /// Creates the logical channel `id`.
    ///
    /// Creating the same id twice replaces the earlier channel's inbox.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> LogicalChannel {
        let (tx, rx) = mpsc::unbounded_channel();

        if self.shared.routes.lock().insert(id, tx).is_some() {
            debug!(channel = %id, "Replaced existing logical channel");
        }

        LogicalChannel {
            sender: ChannelSender {
                id,
                writer: self.writer.clone(),
            },
            receiver: ChannelReceiver { id, inbound: rx },
        }
    }

    /// Tells the peer this side is attached.
    pub fn signal_ready(&self) {
        *self.shared.announced.lock() = Some(PeerState::Ready);
        write_frame(&self.writer, &MuxFrame::Ready);
    }

    /// Tells the peer this side lost its upstream transport.
    pub fn signal_end(&self) {
        *self.shared.announced.lock() = Some(PeerState::Ended);
        write_frame(&self.writer, &MuxFrame::End);
    }

    /// Watches the peer's announced state.
    ///
    /// Only the latest state is kept; use [`peer_events`](Self::peer_events)
    /// to observe every transition.
    #[must_use]
    pub fn peer_state(&self) -> watch::Receiver<PeerState> {
        self.peer.clone()
    }

    /// Receives every `ready`/`end` the peer announces from now on, in order.
    #[must_use]
    pub fn peer_events(&self) -> mpsc::UnboundedReceiver<PeerState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.lock().push(tx);
        rx
    }

    /// Routes inbound frames until the stream closes.
    async fn run_demux(
        mut reader: PageReader,
        writer: PageWriter,
        shared: Arc<Shared>,
        peer_tx: watch::Sender<PeerState>,
    ) {
        while let Some(raw) = reader.read().await {
            let frame: MuxFrame = match serde_json::from_value(raw) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "Dropping unrecognised page message");
                    continue;
                }
            };

            match frame {
                MuxFrame::Data { name, data } => {
                    let routes = shared.routes.lock();
                    match routes.get(&name) {
                        Some(tx) => {
                            if tx.send(data).is_err() {
                                trace!(channel = %name, "Logical channel receiver dropped");
                            }
                        }
                        None => trace!(channel = %name, "No logical channel registered"),
                    }
                }

                MuxFrame::Hello => {
                    let announced = *shared.announced.lock();
                    match announced {
                        Some(PeerState::Ready) => write_frame(&writer, &MuxFrame::Ready),
                        Some(PeerState::Ended) => write_frame(&writer, &MuxFrame::End),
                        _ => trace!("Peer attached before any announcement"),
                    }
                }

                MuxFrame::Ready => Self::peer_changed(&shared, &peer_tx, PeerState::Ready),

                MuxFrame::End => Self::peer_changed(&shared, &peer_tx, PeerState::Ended),
            }
        }

        shared.routes.lock().clear();
        shared.listeners.lock().clear();
        debug!("Page stream closed, logical channels destroyed");
    }

    /// Publishes one peer control frame.
    fn peer_changed(shared: &Shared, peer_tx: &watch::Sender<PeerState>, state: PeerState) {
        peer_tx.send_replace(state);
        shared
            .listeners
            .lock()
            .retain(|tx| tx.send(state).is_ok());
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serializes and posts a frame.
fn write_frame(writer: &PageWriter, frame: &MuxFrame) {
    match serde_json::to_value(frame) {
        Ok(value) => writer.write(value),
        Err(e) => warn!(error = %e, "Failed to encode page frame"),
    }
}

// ============================================================================
// LogicalChannel
// ============================================================================

/// A named bidirectional sub-stream of a page stream.
pub struct LogicalChannel {
    sender: ChannelSender,
    receiver: ChannelReceiver,
}

impl LogicalChannel {
    /// Returns the channel id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.sender.id
    }

    /// Sends a payload to the peer's channel of the same id.
    #[inline]
    pub fn send(&self, data: Value) {
        self.sender.send(data);
    }

    /// Receives the next payload, or `None` once the transport closed.
    #[inline]
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Splits the channel into independently owned halves.
    #[must_use]
    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

/// Sending half of a [`LogicalChannel`].
#[derive(Clone)]
pub struct ChannelSender {
    id: ChannelId,
    writer: PageWriter,
}

impl ChannelSender {
    /// Sends a payload to the peer's channel of the same id.
    pub fn send(&self, data: Value) {
        write_frame(&self.writer, &MuxFrame::Data {
            name: self.id,
            data,
        });
    }
}

/// Receiving half of a [`LogicalChannel`].
pub struct ChannelReceiver {
    id: ChannelId,
    inbound: mpsc::UnboundedReceiver<Value>,
}

impl ChannelReceiver {
    /// Returns the channel id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Receives the next payload, or `None` once the transport closed.
    #[inline]
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PageChannel;
    use crate::transport::page::PageWindow;
    use proptest::prelude::*;
    use serde_json::json;

    fn pair() -> (PageWindow, Multiplexer, Multiplexer) {
        let window = PageWindow::new();
        let page = Multiplexer::attach(PageStream::bind(&window, PageChannel::Inpage));
        let content = Multiplexer::attach(PageStream::bind(&window, PageChannel::ContentScript));
        (window, page, content)
    }

    #[test]
    fn test_frame_format() {
        let frame = MuxFrame::Data {
            name: ChannelId::Provider,
            data: json!({ "id": 1 }),
        };
        let value = serde_json::to_value(&frame).expect("encode");
        assert_eq!(value, json!({ "type": "data", "name": "provider", "data": { "id": 1 } }));
        assert_eq!(
            serde_json::to_value(MuxFrame::End).expect("encode"),
            json!({ "type": "end" })
        );
    }

    #[tokio::test]
    async fn test_channels_are_routed_by_id() {
        let (_window, page, content) = pair();
        let page_provider = page.channel(ChannelId::Provider);
        let page_legacy = page.channel(ChannelId::Legacy);
        let mut content_provider = content.channel(ChannelId::Provider);
        let mut content_legacy = content.channel(ChannelId::Legacy);

        page_legacy.send(json!("old"));
        page_provider.send(json!("new"));

        assert_eq!(content_provider.recv().await, Some(json!("new")));
        assert_eq!(content_legacy.recv().await, Some(json!("old")));
    }

    #[tokio::test]
    async fn test_unknown_channel_names_are_dropped() {
        let (window, _page, content) = pair();
        let mut provider = content.channel(ChannelId::Provider);

        window.post_message(
            PageChannel::ContentScript,
            json!({ "type": "data", "name": "provder", "data": 1 }),
        );
        window.post_message(PageChannel::ContentScript, json!("noise"));
        window.post_message(
            PageChannel::ContentScript,
            json!({ "type": "data", "name": "provider", "data": 2 }),
        );

        assert_eq!(provider.recv().await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_peer_state_follows_control_frames() {
        let (_window, page, content) = pair();
        let mut peer = page.peer_state();
        assert_eq!(*peer.borrow(), PeerState::Unknown);

        content.signal_ready();
        peer.changed().await.expect("changed");
        assert_eq!(*peer.borrow_and_update(), PeerState::Ready);

        content.signal_end();
        peer.changed().await.expect("changed");
        assert_eq!(*peer.borrow_and_update(), PeerState::Ended);
    }

    #[tokio::test]
    async fn test_peer_events_keep_every_transition() {
        let (_window, page, content) = pair();
        let mut events = page.peer_events();

        content.signal_end();
        content.signal_ready();
        content.signal_end();

        for expected in [PeerState::Ended, PeerState::Ready, PeerState::Ended] {
            assert_eq!(events.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_hello_replays_last_announcement() {
        let window = PageWindow::new();
        let content = Multiplexer::attach(PageStream::bind(&window, PageChannel::ContentScript));
        content.signal_ready();

        let page = Multiplexer::attach(PageStream::bind(&window, PageChannel::Inpage));
        let mut peer = page.peer_state();
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            peer.wait_for(|state| *state == PeerState::Ready),
        )
        .await
        .expect("ready replayed")
        .expect("watch");
    }

    #[tokio::test]
    async fn test_hello_before_announcement_is_ignored() {
        let window = PageWindow::new();
        let mut page_inbox = window.listen(PageChannel::Inpage);
        let _content = Multiplexer::attach(PageStream::bind(&window, PageChannel::ContentScript));
        let _page = Multiplexer::attach(PageStream::bind(&window, PageChannel::Inpage));

        // Only the content side's own hello reaches the page.
        assert_eq!(page_inbox.recv().await, Some(json!({ "type": "hello" })));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(page_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropping_multiplexer_closes_channels() {
        let (_window, _page, content) = pair();
        let mut provider = content.channel(ChannelId::Provider);
        drop(content);
        assert_eq!(provider.recv().await, None);
    }

    proptest! {
        #[test]
        fn prop_interleaved_channels_keep_per_channel_order(
            picks in proptest::collection::vec(any::<bool>(), 1..64)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let (_window, page, content) = pair();
                let provider_tx = page.channel(ChannelId::Provider);
                let legacy_tx = page.channel(ChannelId::Legacy);
                let mut provider_rx = content.channel(ChannelId::Provider);
                let mut legacy_rx = content.channel(ChannelId::Legacy);

                let mut expected_provider = Vec::new();
                let mut expected_legacy = Vec::new();
                for (n, provider) in picks.iter().enumerate() {
                    if *provider {
                        provider_tx.send(json!(n));
                        expected_provider.push(json!(n));
                    } else {
                        legacy_tx.send(json!(n));
                        expected_legacy.push(json!(n));
                    }
                }

                for value in expected_provider {
                    assert_eq!(provider_rx.recv().await, Some(value));
                }
                for value in expected_legacy {
                    assert_eq!(legacy_rx.recv().await, Some(value));
                }
            });
        }
    }
}
