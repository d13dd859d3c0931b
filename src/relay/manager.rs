//! Per-tab connection manager.
//!
//! One [`ConnectionManager`] bridges one content port to one network
//! connection to the daemon. The connection is opened lazily, on the first
//! message from the page, and re-opened after every failure with a constant
//! delay for as long as the port stays connected.
//!
//! # State Machine
//!
//! ```text
//!          first message            connected
//!   Idle ───────────────► Connecting ─────────► Open
//!                           ▲    │                │
//!                     delay │    │ failed         │ dropped / malformed frame
//!                           │    ▼                │
//!                        Reconnecting ◄───────────┘
//!
//!   any state ── port disconnected / stop ──► Closed
//! ```
//!
//! # Event Loop
//!
//! Every state is handled by one `select!` over the port, the stop signal
//! and, depending on the state, the connect attempt, the reconnect timer or
//! the open link. All queue and link mutations happen on this task only.
//!
//! Outbound messages go through a FIFO queue. They are removed from it only
//! after a successful write, so a message whose write fails is resent first
//! on the next connection.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::{DaemonFrame, Envelope, EnvelopeKind, PONG, TraceEvent};
use crate::trace::TraceEmitter;
use crate::transport::{Connector, DaemonLink, Port};

use super::context::ConnectionContext;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of one connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Port connected, no network connection yet.
    Idle,
    /// Connection attempt in flight.
    Connecting,
    /// Forwarding in both directions.
    Open,
    /// Waiting before the next attempt.
    Reconnecting,
    /// Port gone; terminal.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for the terminal state.
    #[inline]
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Bridges one tab's extension port to the daemon.
pub struct ConnectionManager {
    /// Frame metadata.
    context: ConnectionContext,
    /// Fully parameterised daemon URL.
    url: Url,
    /// Opens network connections.
    connector: Arc<dyn Connector>,
    /// Background end of the content port.
    port: Port,
    /// Trace publisher.
    tracer: TraceEmitter,
    /// Messages not yet written to the daemon, oldest first.
    queue: VecDeque<Value>,
    /// Current state, observable from outside.
    state: watch::Sender<ConnectionState>,
    /// Constant delay between attempts.
    reconnect_delay: Duration,
    /// External stop request.
    stop: oneshot::Receiver<()>,
    /// Connection attempts made.
    attempts: u64,
}

impl ConnectionManager {
    /// Creates a manager in [`ConnectionState::Idle`].
    ///
    /// Returns the manager, a watcher for its state and the sender that
    /// stops it.
    #[must_use]
    pub fn new(
        context: ConnectionContext,
        endpoint: &Url,
        connector: Arc<dyn Connector>,
        port: Port,
        tracer: TraceEmitter,
        reconnect_delay: Duration,
    ) -> (Self, watch::Receiver<ConnectionState>, oneshot::Sender<()>) {
        let url = context.daemon_url(endpoint);
        let (state, state_rx) = watch::channel(ConnectionState::Idle);
        let (stop_tx, stop) = oneshot::channel();

        let manager = Self {
            context,
            url,
            connector,
            port,
            tracer,
            queue: VecDeque::new(),
            state,
            reconnect_delay,
            stop,
            attempts: 0,
        };

        (manager, state_rx, stop_tx)
    }

    /// Returns the owning tab.
    #[inline]
    #[must_use]
    pub fn tab_id(&self) -> TabId {
        self.context.tab_id
    }

    /// Returns the daemon URL this manager dials.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Runs the state machine until [`ConnectionState::Closed`].
    pub async fn run(mut self) {
        let tab_id = self.tab_id();
        info!(%tab_id, frame_id = %self.context.frame_id, "Connection manager started");
        self.trace(&TraceEvent::start(tab_id));

        let mut link: Option<Box<dyn DaemonLink>> = None;

        loop {
            let current = *self.state.borrow();
            let next = match current {
                ConnectionState::Idle => self.idle().await,
                ConnectionState::Connecting => {
                    let (next, opened) = self.connecting().await;
                    link = opened;
                    next
                }
                ConnectionState::Open => match link.take() {
                    Some(open) => self.open(open).await,
                    None => ConnectionState::Reconnecting,
                },
                ConnectionState::Reconnecting => self.reconnecting().await,
                ConnectionState::Closed => break,
            };

            self.transition(next);
        }

        if !self.queue.is_empty() {
            debug!(%tab_id, dropped = self.queue.len(), "Discarding undelivered messages");
        }
        info!(%tab_id, attempts = self.attempts, "Connection manager closed");
    }

    /// Records a state change.
    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(tab_id = %self.context.tab_id, from = %previous, to = %next, "State transition");
        }
    }

    // ========================================================================
    // States
    // ========================================================================

    /// Waits for the first message.
    async fn idle(&mut self) -> ConnectionState {
        loop {
            tokio::select! {
                _ = &mut self.stop => return ConnectionState::Closed,

                envelope = self.port.recv() => match envelope {
                    Some(envelope) => {
                        if self.enqueue(envelope) {
                            return ConnectionState::Connecting;
                        }
                    }
                    None => return ConnectionState::Closed,
                },
            }
        }
    }

    /// Dials the daemon while still queueing port traffic.
    async fn connecting(&mut self) -> (ConnectionState, Option<Box<dyn DaemonLink>>) {
        self.attempts += 1;
        debug!(tab_id = %self.context.tab_id, attempt = self.attempts, url = %self.url, "Connecting to daemon");

        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let attempt = connector.connect(&url);
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                _ = &mut self.stop => return (ConnectionState::Closed, None),

                result = &mut attempt => {
                    return match result {
                        Ok(link) => (ConnectionState::Open, Some(link)),
                        Err(e) => {
                            warn!(tab_id = %self.context.tab_id, error = %e, "Daemon connection failed");
                            (ConnectionState::Reconnecting, None)
                        }
                    };
                }

                envelope = self.port.recv() => match envelope {
                    Some(envelope) => {
                        self.enqueue(envelope);
                    }
                    None => return (ConnectionState::Closed, None),
                },
            }
        }
    }

    /// Forwards traffic until the link or the port fails.
    async fn open(&mut self, mut link: Box<dyn DaemonLink>) -> ConnectionState {
        info!(tab_id = %self.context.tab_id, queued = self.queue.len(), "Daemon connection open");

        if let Err(e) = self.flush(link.as_mut()).await {
            warn!(tab_id = %self.context.tab_id, error = %e, "Write to daemon failed");
            link.close().await;
            return ConnectionState::Reconnecting;
        }

        loop {
            tokio::select! {
                _ = &mut self.stop => {
                    link.close().await;
                    return ConnectionState::Closed;
                }

                envelope = self.port.recv() => {
                    let Some(envelope) = envelope else {
                        link.close().await;
                        return ConnectionState::Closed;
                    };

                    if self.enqueue(envelope)
                        && let Err(e) = self.flush(link.as_mut()).await
                    {
                        warn!(tab_id = %self.context.tab_id, error = %e, "Write to daemon failed");
                        link.close().await;
                        return ConnectionState::Reconnecting;
                    }
                }

                frame = link.next_text() => match frame {
                    Some(Ok(text)) => {
                        if let Some(next) = self.handle_frame(link.as_mut(), &text).await {
                            link.close().await;
                            return next;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(tab_id = %self.context.tab_id, error = %e, "Daemon connection error");
                        return ConnectionState::Reconnecting;
                    }
                    None => {
                        info!(tab_id = %self.context.tab_id, "Daemon closed the connection");
                        return ConnectionState::Reconnecting;
                    }
                },
            }
        }
    }

    /// Waits out the reconnect delay while still queueing port traffic.
    async fn reconnecting(&mut self) -> ConnectionState {
        debug!(
            tab_id = %self.context.tab_id,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            queued = self.queue.len(),
            "Waiting before reconnect"
        );

        let delay = sleep(self.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut self.stop => return ConnectionState::Closed,

                () = &mut delay => return ConnectionState::Connecting,

                envelope = self.port.recv() => match envelope {
                    Some(envelope) => {
                        self.enqueue(envelope);
                    }
                    None => return ConnectionState::Closed,
                },
            }
        }
    }

    // ========================================================================
    // Forwarding
    // ========================================================================

    /// Validates a port envelope and queues its payload.
    ///
    /// Returns `false` if the envelope was rejected.
    fn enqueue(&mut self, envelope: Envelope) -> bool {
        if envelope.kind != EnvelopeKind::Request {
            warn!(tab_id = %self.context.tab_id, kind = ?envelope.kind, "Dropping envelope with wrong direction");
            return false;
        }

        match envelope.validate() {
            Ok(payload) => {
                self.queue.push_back(payload);
                true
            }
            Err(e) => {
                warn!(tab_id = %self.context.tab_id, error = %e, "Dropping invalid envelope");
                false
            }
        }
    }

    /// Writes every queued message, oldest first.
    async fn flush(&mut self, link: &mut dyn DaemonLink) -> Result<()> {
        while let Some(payload) = self.queue.front() {
            let text = serde_json::to_string(payload)?;
            link.send_text(text).await?;

            if let Some(payload) = self.queue.pop_front() {
                trace!(tab_id = %self.context.tab_id, "Request forwarded to daemon");
                self.trace(&TraceEvent::request(self.context.tab_id, payload));
            }
        }
        Ok(())
    }

    /// Handles one inbound text frame.
    ///
    /// Returns the next state if the connection must be left.
    async fn handle_frame(
        &mut self,
        link: &mut dyn DaemonLink,
        text: &str,
    ) -> Option<ConnectionState> {
        let tab_id = self.context.tab_id;

        match DaemonFrame::parse(text) {
            Ok(DaemonFrame::Ping) => {
                trace!(%tab_id, "Keepalive ping");
                if let Err(e) = link.send_text(PONG.to_string()).await {
                    warn!(%tab_id, error = %e, "Keepalive reply failed");
                    return Some(ConnectionState::Reconnecting);
                }
                None
            }

            Ok(DaemonFrame::Pong) => {
                trace!(%tab_id, "Keepalive pong");
                None
            }

            Ok(DaemonFrame::Message(payload)) if !(payload.is_object() || payload.is_array()) => {
                let error = Error::malformed_frame("expected a JSON object or array");
                warn!(%tab_id, %error, "Malformed daemon frame, reconnecting");
                Some(ConnectionState::Reconnecting)
            }

            Ok(DaemonFrame::Message(payload)) => {
                let envelope = match Envelope::response(tab_id, &payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(%tab_id, error = %e, "Failed to wrap daemon message");
                        return None;
                    }
                };

                if let Err(e) = self.port.post(envelope) {
                    debug!(%tab_id, error = %e, "Port gone while forwarding response");
                    return Some(ConnectionState::Closed);
                }

                self.trace(&TraceEvent::response(tab_id, payload));
                None
            }

            Err(e) => {
                warn!(%tab_id, error = %e, "Malformed daemon frame, reconnecting");
                Some(ConnectionState::Reconnecting)
            }
        }
    }

    /// Publishes a trace event, logging genuine broadcast failures.
    fn trace(&self, event: &TraceEvent) {
        if let Err(e) = self.tracer.emit(event) {
            warn!(tab_id = %event.tab_id, error = %e, "Trace broadcast failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::time::timeout;

    use crate::protocol::{PING, TraceKind};
    use crate::transport::{MemoryConnector, MemoryDaemon, PortSender, RuntimeBus};

    const STEP: Duration = Duration::from_secs(2);
    const RETRY: Duration = Duration::from_millis(20);

    fn tab(id: u32) -> TabId {
        TabId::new(id).expect("valid tab id")
    }

    fn endpoint() -> Url {
        Url::parse("ws://daemon.test").expect("url")
    }

    struct Harness {
        content: Port,
        connector: MemoryConnector,
        daemon: MemoryDaemon,
        state: watch::Receiver<ConnectionState>,
        stop: Option<oneshot::Sender<()>>,
        traces: tokio::sync::broadcast::Receiver<String>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn start(tab_id: u32) -> Self {
            let sender = PortSender::tab(tab(tab_id)).with_origin("https://app.example");
            let (content, background) = Port::pair("relay", sender.clone());
            let (connector, daemon) = MemoryConnector::new();
            let bus = RuntimeBus::new();
            let traces = bus.subscribe();

            let context = ConnectionContext::from_sender(&sender).expect("context");
            let (manager, state, stop) = ConnectionManager::new(
                context,
                &endpoint(),
                Arc::new(connector.clone()),
                background,
                TraceEmitter::new(bus),
                RETRY,
            );
            let task = tokio::spawn(manager.run());

            Self {
                content,
                connector,
                daemon,
                state,
                stop: Some(stop),
                traces,
                task,
            }
        }

        fn send(&self, payload: Value) {
            self.content
                .post(Envelope::request(&payload).expect("envelope"))
                .expect("post");
        }

        async fn recv(&mut self) -> Value {
            timeout(STEP, self.content.recv())
                .await
                .expect("timed out waiting for port")
                .expect("port closed")
                .validate()
                .expect("valid")
        }

        async fn wait_for(&mut self, target: ConnectionState) {
            timeout(STEP, self.state.wait_for(|s| *s == target))
                .await
                .expect("timed out waiting for state")
                .expect("manager dropped");
        }

        async fn next_trace(&mut self) -> TraceEvent {
            let text = timeout(STEP, self.traces.recv())
                .await
                .expect("timed out waiting for trace")
                .expect("trace bus closed");
            TraceEvent::decode(&text).expect("decode")
        }

        fn drain_traces(&mut self) -> Vec<TraceEvent> {
            let mut events = Vec::new();
            while let Ok(text) = self.traces.try_recv() {
                events.push(TraceEvent::decode(&text).expect("decode"));
            }
            events
        }
    }

    async fn accept(daemon: &mut MemoryDaemon) -> crate::transport::DaemonSession {
        timeout(STEP, daemon.accept())
            .await
            .expect("timed out waiting for connection")
            .expect("connector dropped")
    }

    #[tokio::test]
    async fn test_no_connection_until_first_message() {
        let mut h = Harness::start(1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*h.state.borrow(), ConnectionState::Idle);
        assert_eq!(h.connector.attempts(), 0);

        let events = h.drain_traces();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TraceKind::Start);
    }

    #[tokio::test]
    async fn test_chain_id_round_trip_and_traces() {
        let mut h = Harness::start(7);
        h.send(json!({ "id": 1, "jsonrpc": "2.0", "method": "eth_chainId" }));

        let mut session = accept(&mut h.daemon).await;
        assert_eq!(session.query("tabId").as_deref(), Some("7"));
        assert_eq!(session.query("origin").as_deref(), Some("https://app.example"));

        let request = session.recv_json().await.expect("request");
        assert_eq!(request["method"], "eth_chainId");
        h.wait_for(ConnectionState::Open).await;

        let reply = json!({ "id": 1, "jsonrpc": "2.0", "result": "0x1" });
        session.send_json(&reply).expect("reply");
        assert_eq!(h.recv().await, reply);

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let event = h.next_trace().await;
            kinds.push((event.kind, event.tab_id));
        }
        assert!(h.drain_traces().is_empty());
        assert_eq!(
            kinds,
            vec![
                (TraceKind::Start, tab(7)),
                (TraceKind::Request, tab(7)),
                (TraceKind::Response, tab(7)),
            ]
        );
    }

    #[tokio::test]
    async fn test_order_is_preserved_both_ways() {
        let mut h = Harness::start(2);
        for n in 0..20 {
            h.send(json!({ "id": n, "method": "eth_blockNumber" }));
        }

        let mut session = accept(&mut h.daemon).await;
        for n in 0..20 {
            assert_eq!(session.recv_json().await.expect("request")["id"], n);
        }

        for n in (0..20).rev() {
            session.send_json(&json!({ "id": n, "result": n })).expect("reply");
        }
        for n in (0..20).rev() {
            assert_eq!(h.recv().await["id"], n);
        }
    }

    #[tokio::test]
    async fn test_keepalive_is_answered_and_not_forwarded() {
        let mut h = Harness::start(3);
        h.send(json!({ "id": 1, "method": "eth_accounts" }));
        let mut session = accept(&mut h.daemon).await;
        session.recv_json().await.expect("request");

        session.ping().expect("ping");
        assert_eq!(session.recv_text().await.as_deref(), Some(PONG));

        session.send_json(&json!({ "id": 1, "result": [] })).expect("reply");
        assert_eq!(h.recv().await["id"], 1);

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let event = h.next_trace().await;
            assert_ne!(event.data, Some(json!(PING)));
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![TraceKind::Start, TraceKind::Request, TraceKind::Response]
        );
        assert!(h.drain_traces().is_empty());
    }

    #[tokio::test]
    async fn test_reconnection_delivers_queued_messages_in_order() {
        let mut h = Harness::start(4);
        h.send(json!({ "id": 0 }));
        let mut first = accept(&mut h.daemon).await;
        assert_eq!(first.recv_json().await.expect("request")["id"], 0);

        h.connector.set_reachable(false);
        drop(first);
        h.wait_for(ConnectionState::Reconnecting).await;

        for n in 1..=5 {
            h.send(json!({ "id": n }));
        }

        tokio::time::sleep(RETRY * 3).await;
        assert!(h.connector.attempts() >= 2);
        h.connector.set_reachable(true);

        let mut second = accept(&mut h.daemon).await;
        for n in 1..=5 {
            assert_eq!(second.recv_json().await.expect("request")["id"], n);
        }
    }

    #[tokio::test]
    async fn test_unreachable_daemon_retries_without_response_trace() {
        let mut h = Harness::start(5);
        h.connector.set_reachable(false);
        h.send(json!({ "id": 1, "method": "eth_chainId" }));

        tokio::time::sleep(RETRY * 10).await;
        assert!(h.connector.attempts() >= 3);
        assert_ne!(*h.state.borrow(), ConnectionState::Open);
        assert!(h.drain_traces().iter().all(|e| e.kind == TraceKind::Start));
    }

    #[tokio::test]
    async fn test_malformed_frame_triggers_reconnect() {
        let mut h = Harness::start(6);
        h.send(json!({ "id": 1 }));
        let session = accept(&mut h.daemon).await;
        h.wait_for(ConnectionState::Open).await;

        session.send_text("{not json").expect("send");
        let _second = accept(&mut h.daemon).await;
        assert_eq!(h.connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_scalar_frame_triggers_reconnect_untraced() {
        let mut h = Harness::start(6);
        h.send(json!({ "id": 1 }));
        let session = accept(&mut h.daemon).await;
        h.wait_for(ConnectionState::Open).await;
        assert_eq!(h.next_trace().await.kind, TraceKind::Start);
        assert_eq!(h.next_trace().await.kind, TraceKind::Request);

        session.send_text("42").expect("send");
        let _second = accept(&mut h.daemon).await;
        assert_eq!(h.connector.attempts(), 2);

        assert!(timeout(Duration::from_millis(30), h.content.recv()).await.is_err());
        assert!(h.drain_traces().iter().all(|e| e.kind != TraceKind::Response));
    }

    #[tokio::test]
    async fn test_invalid_envelope_keeps_idle() {
        let h = Harness::start(8);
        h.content
            .post(Envelope::new(EnvelopeKind::Request, None, b"nope".to_vec()))
            .expect("post");
        h.content
            .post(Envelope::response(tab(8), &json!({})).expect("envelope"))
            .expect("post");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*h.state.borrow(), ConnectionState::Idle);
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_port_disconnect_closes_network_connection() {
        let mut h = Harness::start(9);
        h.send(json!({ "id": 1 }));
        let mut session = accept(&mut h.daemon).await;
        session.recv_json().await.expect("request");

        drop(h.content);
        timeout(STEP, h.task).await.expect("manager exit").expect("task");
        assert!(h.state.borrow().is_closed());
        assert_eq!(timeout(STEP, session.recv_text()).await.expect("closed"), None);
    }

    #[tokio::test]
    async fn test_stop_signal_closes_manager() {
        let mut h = Harness::start(10);
        h.stop.take().expect("stop").send(()).expect("send stop");
        timeout(STEP, h.task).await.expect("manager exit").expect("task");
        assert!(h.state.borrow().is_closed());
    }
}
