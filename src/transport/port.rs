//! Extension messaging: long-lived ports and the runtime broadcast.
//!
//! # Ports
//!
//! A content script opens one [`Port`] per frame through
//! [`ExtensionRuntime::connect`]. The background receives the opposite end
//! from its [`ConnectListener`], together with the [`PortSender`] metadata
//! describing the frame that connected. Dropping either end disconnects the
//! port; the other end's [`Port::recv`] then returns `None`.
//!
//! The port name is informational only. Routing is one port per frame.
//!
//! # Broadcast
//!
//! [`RuntimeBus`] is the runtime-wide one-shot message broadcast. Sending
//! with no subscriber returns [`Error::NoReceiver`] instead of an error
//! string to be matched.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{FrameId, TabId};
use crate::protocol::Envelope;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the runtime broadcast.
const BUS_CAPACITY: usize = 1024;

// ============================================================================
// PortSender
// ============================================================================

/// Metadata about the frame that opened a port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSender {
    /// Tab hosting the frame; absent for non-tab contexts.
    pub tab_id: Option<TabId>,
    /// Frame within the tab.
    pub frame_id: FrameId,
    /// Page origin.
    pub origin: Option<String>,
    /// Page URL.
    pub url: Option<String>,
    /// Page title.
    pub title: Option<String>,
    /// Favicon URL.
    pub fav_icon_url: Option<String>,
}

impl PortSender {
    /// Creates metadata for the top frame of `tab_id`.
    #[inline]
    #[must_use]
    pub fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id: Some(tab_id),
            ..Self::default()
        }
    }

    /// Sets the frame id.
    #[inline]
    #[must_use]
    pub fn with_frame(mut self, frame_id: FrameId) -> Self {
        self.frame_id = frame_id;
        self
    }

    /// Sets the origin.
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Sets the page URL.
    #[inline]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the page title.
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the favicon URL.
    #[inline]
    #[must_use]
    pub fn with_fav_icon_url(mut self, fav_icon_url: impl Into<String>) -> Self {
        self.fav_icon_url = Some(fav_icon_url.into());
        self
    }
}

// ============================================================================
// Port
// ============================================================================

/// One end of a long-lived extension port.
pub struct Port {
    /// Informational name.
    name: String,
    /// Connecting frame (set on the background end only).
    sender: Option<PortSender>,
    /// Outbound envelopes.
    tx: mpsc::UnboundedSender<Envelope>,
    /// Inbound envelopes.
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Port {
    /// Creates a connected pair: `(content end, background end)`.
    #[must_use]
    pub fn pair(name: impl Into<String>, sender: PortSender) -> (Self, Self) {
        let name = name.into();
        let (to_background, from_content) = mpsc::unbounded_channel();
        let (to_content, from_background) = mpsc::unbounded_channel();

        let content = Self {
            name: name.clone(),
            sender: None,
            tx: to_background,
            rx: from_background,
        };
        let background = Self {
            name,
            sender: Some(sender),
            tx: to_content,
            rx: from_content,
        };

        (content, background)
    }

    /// Returns the port name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the connecting frame's metadata (background end only).
    #[inline]
    #[must_use]
    pub fn sender(&self) -> Option<&PortSender> {
        self.sender.as_ref()
    }

    /// Posts an envelope to the other end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the other end disconnected.
    pub fn post(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| Error::transport_closed(&self.name))
    }

    /// Receives the next envelope, or `None` once the other end disconnected.
    #[inline]
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Returns `true` if the other end has disconnected.
    #[inline]
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RuntimeBus
// ============================================================================

/// Runtime-wide one-shot message broadcast.
///
/// Messages are encoded strings; subscribers decode and validate them.
#[derive(Clone)]
pub struct RuntimeBus {
    tx: broadcast::Sender<String>,
}

impl Default for RuntimeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Broadcasts a message to all current subscribers.
    ///
    /// Returns the number of subscribers reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoReceiver`] if nobody is subscribed.
    pub fn send_message(&self, message: String) -> Result<usize> {
        self.tx.send(message).map_err(|_| Error::NoReceiver)
    }

    /// Subscribes to messages sent after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Returns the number of current subscribers.
    #[inline]
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ============================================================================
// ExtensionRuntime
// ============================================================================

/// Extension runtime handle shared by content scripts and the background.
#[derive(Clone)]
pub struct ExtensionRuntime {
    /// Delivers background ends to the connect listener.
    connect_tx: mpsc::UnboundedSender<Port>,
    /// Runtime broadcast.
    bus: RuntimeBus,
}

/// Background-side `onConnect` listener.
pub struct ConnectListener {
    rx: mpsc::UnboundedReceiver<Port>,
}

impl ConnectListener {
    /// Waits for the next connecting port.
    ///
    /// Returns `None` once every runtime handle is dropped.
    #[inline]
    pub async fn accept(&mut self) -> Option<Port> {
        self.rx.recv().await
    }
}

impl ExtensionRuntime {
    /// Creates a runtime and its background connect listener.
    #[must_use]
    pub fn new() -> (Self, ConnectListener) {
        let (connect_tx, rx) = mpsc::unbounded_channel();
        let runtime = Self {
            connect_tx,
            bus: RuntimeBus::new(),
        };
        (runtime, ConnectListener { rx })
    }

    /// Opens a port to the background on behalf of `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the background is not listening.
    pub fn connect(&self, name: &str, sender: PortSender) -> Result<Port> {
        let (content, background) = Port::pair(name, sender);
        self.connect_tx
            .send(background)
            .map_err(|_| Error::transport_closed(name))?;

        debug!(port = name, "Extension port connected");
        Ok(content)
    }

    /// Returns the runtime broadcast.
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &RuntimeBus {
        &self.bus
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tab(id: u32) -> TabId {
        TabId::new(id).expect("valid tab id")
    }

    #[tokio::test]
    async fn test_port_pair_round_trip() {
        let (mut content, mut background) = Port::pair("relay", PortSender::tab(tab(1)));
        assert!(content.sender().is_none());
        assert_eq!(background.sender().and_then(|s| s.tab_id), Some(tab(1)));

        let request = Envelope::request(&json!({ "id": 1 })).expect("envelope");
        content.post(request.clone()).expect("post");
        assert_eq!(background.recv().await, Some(request));

        let response = Envelope::response(tab(1), &json!({ "id": 1 })).expect("envelope");
        background.post(response.clone()).expect("post");
        assert_eq!(content.recv().await, Some(response));
    }

    #[tokio::test]
    async fn test_dropping_one_end_disconnects_the_other() {
        let (content, mut background) = Port::pair("relay", PortSender::tab(tab(1)));
        drop(content);

        assert_eq!(background.recv().await, None);
        assert!(background.is_disconnected());

        let err = background
            .post(Envelope::response(tab(1), &json!({})).expect("envelope"))
            .unwrap_err();
        assert!(matches!(err, Error::TransportClosed { port } if port == "relay"));
    }

    #[test]
    fn test_bus_reports_no_receiver() {
        let bus = RuntimeBus::new();
        assert!(matches!(
            bus.send_message("x".into()),
            Err(Error::NoReceiver)
        ));

        let _rx = bus.subscribe();
        assert_eq!(bus.send_message("x".into()).expect("sent"), 1);
    }

    #[tokio::test]
    async fn test_runtime_connect_reaches_listener() {
        let (runtime, mut listener) = ExtensionRuntime::new();
        let sender = PortSender::tab(tab(9)).with_origin("https://app.example");
        let _content = runtime.connect("relay", sender.clone()).expect("connect");

        let background = listener.accept().await.expect("port");
        assert_eq!(background.name(), "relay");
        assert_eq!(background.sender(), Some(&sender));
    }

    #[test]
    fn test_connect_without_background_fails() {
        let (runtime, listener) = ExtensionRuntime::new();
        drop(listener);
        let err = runtime.connect("relay", PortSender::default()).unwrap_err();
        assert!(matches!(err, Error::TransportClosed { .. }));
    }
}
