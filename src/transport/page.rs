//! Page-level window messaging.
//!
//! [`PageWindow`] models the page's `window` as seen by the two scripts that
//! share it: the injected provider and the content script. A message posted
//! to a [`PageChannel`] name reaches every stream listening on that name, in
//! post order. [`PageStream`] binds one endpoint: it listens on its own name
//! and posts to its peer's.
//!
//! The window also carries page-visible DOM-style events ([`PageEvent`]).
//!
//! ```text
//! ┌──────────────┐  post(ContentScript)  ┌───────────────┐
//! │ PageProvider │──────────────────────►│ ContentRelay  │
//! │  (Inpage)    │◄──────────────────────│(ContentScript)│
//! └──────────────┘   post(Inpage)        └───────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::protocol::PageChannel;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the page event broadcast.
const EVENT_CAPACITY: usize = 64;

// ============================================================================
// PageEvent
// ============================================================================

/// Page-visible events dispatched on the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    /// A provider instance finished initialising.
    ProviderInitialized,
}

// ============================================================================
// PageWindow
// ============================================================================

/// Listener senders keyed by the name they listen on.
type ListenerMap = FxHashMap<PageChannel, Vec<mpsc::UnboundedSender<Value>>>;

/// Shared state behind a [`PageWindow`].
struct WindowInner {
    /// Registered listeners.
    listeners: Mutex<ListenerMap>,
    /// Page event broadcast.
    events: broadcast::Sender<PageEvent>,
}

/// The hosting page's window message bus.
///
/// Cheap to clone; all clones refer to the same window.
#[derive(Clone)]
pub struct PageWindow {
    inner: Arc<WindowInner>,
}

impl Default for PageWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl PageWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(WindowInner {
                listeners: Mutex::new(ListenerMap::default()),
                events,
            }),
        }
    }

    /// Posts a message to every listener of `target`.
    ///
    /// Messages posted with nobody listening are lost, like
    /// `window.postMessage`.
    pub fn post_message(&self, target: PageChannel, data: Value) {
        let mut listeners = self.inner.listeners.lock();
        let Some(senders) = listeners.get_mut(&target) else {
            trace!(%target, "Page message with no listener");
            return;
        };

        senders.retain(|tx| tx.send(data.clone()).is_ok());
    }

    /// Registers a listener for messages addressed to `name`.
    #[must_use]
    pub fn listen(&self, name: PageChannel) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.listeners.lock().entry(name).or_default().push(tx);
        rx
    }

    /// Returns the number of live listeners on `name`.
    #[must_use]
    pub fn listener_count(&self, name: PageChannel) -> usize {
        self.inner
            .listeners
            .lock()
            .get(&name)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Dispatches a page event.
    pub fn dispatch_event(&self, event: PageEvent) {
        // No subscriber is fine: nothing on the page cares yet.
        let _ = self.inner.events.send(event);
    }

    /// Subscribes to page events dispatched after this call.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<PageEvent> {
        self.inner.events.subscribe()
    }
}

// ============================================================================
// PageStream
// ============================================================================

/// One endpoint of the page transport.
pub struct PageStream {
    /// Writing half.
    writer: PageWriter,
    /// Messages addressed to this endpoint.
    inbound: mpsc::UnboundedReceiver<Value>,
}

impl PageStream {
    /// Binds an endpoint listening on `name` and posting to `name.peer()`.
    #[must_use]
    pub fn bind(window: &PageWindow, name: PageChannel) -> Self {
        Self {
            writer: PageWriter {
                window: window.clone(),
                target: name.peer(),
            },
            inbound: window.listen(name),
        }
    }

    /// Posts a message to the peer endpoint.
    #[inline]
    pub fn write(&self, data: Value) {
        self.writer.write(data);
    }

    /// Receives the next message addressed to this endpoint.
    #[inline]
    pub async fn read(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    /// Splits the stream into independently owned halves.
    #[must_use]
    pub fn split(self) -> (PageWriter, PageReader) {
        (self.writer, PageReader { inbound: self.inbound })
    }
}

/// Writing half of a [`PageStream`].
#[derive(Clone)]
pub struct PageWriter {
    window: PageWindow,
    target: PageChannel,
}

impl PageWriter {
    /// Posts a message to the peer endpoint.
    #[inline]
    pub fn write(&self, data: Value) {
        self.window.post_message(self.target, data);
    }
}

/// Reading half of a [`PageStream`].
pub struct PageReader {
    inbound: mpsc::UnboundedReceiver<Value>,
}

impl PageReader {
    /// Receives the next message addressed to this endpoint.
    #[inline]
    pub async fn read(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_streams_reach_their_peer_in_order() {
        let window = PageWindow::new();
        let page = PageStream::bind(&window, PageChannel::Inpage);
        let mut content = PageStream::bind(&window, PageChannel::ContentScript);

        for n in 0..5 {
            page.write(json!(n));
        }

        for n in 0..5 {
            assert_eq!(content.read().await, Some(json!(n)));
        }
    }

    #[tokio::test]
    async fn test_stream_does_not_hear_itself() {
        let window = PageWindow::new();
        let mut page = PageStream::bind(&window, PageChannel::Inpage);
        let _content = PageStream::bind(&window, PageChannel::ContentScript);

        page.write(json!("to content"));
        window.post_message(PageChannel::Inpage, json!("to page"));

        assert_eq!(page.read().await, Some(json!("to page")));
    }

    #[test]
    fn test_dropped_listeners_are_pruned() {
        let window = PageWindow::new();
        let stream = PageStream::bind(&window, PageChannel::ContentScript);
        assert_eq!(window.listener_count(PageChannel::ContentScript), 1);

        drop(stream);
        window.post_message(PageChannel::ContentScript, json!(1));
        assert_eq!(window.listener_count(PageChannel::ContentScript), 0);
    }

    #[tokio::test]
    async fn test_page_events() {
        let window = PageWindow::new();
        let mut events = window.subscribe_events();
        window.dispatch_event(PageEvent::ProviderInitialized);
        assert_eq!(events.recv().await.ok(), Some(PageEvent::ProviderInitialized));
    }
}
