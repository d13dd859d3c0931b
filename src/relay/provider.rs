//! Page-facing EIP-1193 provider.
//!
//! [`PageProvider`] lives in the page context. Each [`request`] is given a
//! provider-assigned JSON-RPC id, sent on the `provider` logical channel and
//! resolved when the message carrying the same id comes back.
//!
//! # Connection State
//!
//! The provider starts out connected but unlinked: requests issued before the
//! content relay is attached are queued and sent, in order, once it announces
//! `ready`. The relay announces its upstream state with multiplexer control
//! frames, each of which takes effect:
//!
//! | Peer frame | Effect |
//! |------------|--------|
//! | `ready` | Queued requests are sent; new requests go out directly |
//! | `end` | Pending, queued and new requests reject with [`Error::Disconnected`] |
//!
//! Rejected requests are never retried.
//!
//! Inbound messages whose id matches no pending request (subscription
//! notifications, for instance) are published on [`notifications`].
//!
//! [`request`]: PageProvider::request
//! [`notifications`]: PageProvider::notifications

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RpcId, RpcIdSource};
use crate::protocol::{ChannelId, PageChannel};
use crate::transport::{
    ChannelReceiver, ChannelSender, Multiplexer, PageEvent, PageStream, PageWindow, PeerState,
};

// ============================================================================
// Constants
// ============================================================================

/// JSON-RPC protocol version stamped on outgoing requests.
const JSONRPC_VERSION: &str = "2.0";

/// Capacity of the notification broadcast.
const NOTIFICATION_CAPACITY: usize = 256;

/// Code used when an error object carries no numeric code.
const INTERNAL_ERROR_CODE: i64 = -32603;

// ============================================================================
// RequestArgs
// ============================================================================

/// Validated arguments of one `request()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArgs {
    /// JSON-RPC method name.
    pub method: String,
    /// Positional (array) or named (object) parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestArgs {
    /// Creates arguments without parameters.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }

    /// Sets the parameters.
    #[inline]
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Validates a raw `request()` argument.
    ///
    /// A `null` `params` is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequestArgs`] if `args` is not an object,
    /// `method` is not a non-empty string, or `params` is neither an object
    /// nor an array.
    pub fn from_value(args: Value) -> Result<Self> {
        let Value::Object(mut fields) = args else {
            return Err(Error::invalid_request_args("expected an object"));
        };

        let method = match fields.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(Error::invalid_request_args("method must be a non-empty string")),
        };

        let params = match fields.remove("params") {
            None | Some(Value::Null) => None,
            Some(params) => Some(params),
        };

        let args = Self { method, params };
        args.validate()?;
        Ok(args)
    }

    /// Checks the invariants on `method` and `params`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequestArgs`] on violation.
    pub fn validate(&self) -> Result<()> {
        if self.method.is_empty() {
            return Err(Error::invalid_request_args("method must be a non-empty string"));
        }

        match &self.params {
            None | Some(Value::Array(_) | Value::Object(_)) => Ok(()),
            Some(_) => Err(Error::invalid_request_args(
                "params must be an object or an array",
            )),
        }
    }

    /// Builds the JSON-RPC message for `id`.
    fn to_message(&self, id: RpcId) -> Value {
        let mut message = Map::new();
        message.insert("jsonrpc".into(), json!(JSONRPC_VERSION));
        message.insert("id".into(), json!(id.get()));
        message.insert("method".into(), json!(self.method));
        if let Some(params) = &self.params {
            message.insert("params".into(), params.clone());
        }
        Value::Object(message)
    }
}

// ============================================================================
// ProviderState
// ============================================================================

/// Requests awaiting their response.
struct Pending {
    /// Whether new requests are accepted.
    connected: bool,
    /// Whether the content relay announced `ready`.
    linked: bool,
    /// Messages held back until the relay is linked.
    outbox: VecDeque<Value>,
    /// Response slots by id.
    calls: FxHashMap<RpcId, oneshot::Sender<Result<Value>>>,
}

/// State shared between the provider handle and its inbound task.
struct ProviderState {
    /// Outbound half of the `provider` channel.
    channel: ChannelSender,
    /// Request id source.
    ids: RpcIdSource,
    /// Pending requests and connection flag, under one lock.
    pending: Mutex<Pending>,
    /// Unmatched inbound messages.
    notifications: broadcast::Sender<Value>,
}

impl ProviderState {
    /// Routes one inbound payload (single message or batch).
    fn dispatch(&self, payload: Value) {
        match payload {
            Value::Array(batch) => {
                for message in batch {
                    self.dispatch_one(message);
                }
            }
            message => self.dispatch_one(message),
        }
    }

    /// Resolves the matching pending request or publishes a notification.
    fn dispatch_one(&self, message: Value) {
        let slot = message
            .get("id")
            .and_then(Value::as_u64)
            .map(RpcId::from_u64)
            .and_then(|id| self.pending.lock().calls.remove(&id));

        match slot {
            Some(slot) => {
                if slot.send(outcome(message)).is_err() {
                    trace!("Request caller went away before its response");
                }
            }
            None => {
                trace!("Unmatched inbound message published as notification");
                let _ = self.notifications.send(message);
            }
        }
    }

    /// Registers a response slot and sends the message, or queues it while
    /// the relay is not linked.
    fn submit(
        &self,
        id: RpcId,
        message: Value,
        slot: oneshot::Sender<Result<Value>>,
    ) -> Result<()> {
        let mut pending = self.pending.lock();
        if !pending.connected {
            return Err(Error::Disconnected);
        }
        pending.calls.insert(id, slot);

        if pending.linked {
            self.channel.send(message);
        } else {
            trace!(%id, "Relay not ready, request queued");
            pending.outbox.push_back(message);
        }
        Ok(())
    }

    /// Rejects every pending and queued request and refuses new ones.
    fn disconnect(&self) {
        let calls: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.connected = false;
            pending.linked = false;
            pending.outbox.clear();
            pending.calls.drain().collect()
        };

        if !calls.is_empty() {
            warn!(pending = calls.len(), "Provider disconnected, rejecting pending requests");
        } else {
            debug!("Provider disconnected");
        }

        for (_, slot) in calls {
            let _ = slot.send(Err(Error::Disconnected));
        }
    }

    /// Accepts new requests again and sends the queued ones in order.
    fn reconnect(&self) {
        let mut pending = self.pending.lock();
        if !pending.connected {
            pending.connected = true;
            info!("Provider reconnected");
        }
        pending.linked = true;

        if !pending.outbox.is_empty() {
            debug!(queued = pending.outbox.len(), "Relay ready, sending queued requests");
        }
        while let Some(message) = pending.outbox.pop_front() {
            self.channel.send(message);
        }
    }
}

/// Maps a JSON-RPC response to the caller's result.
fn outcome(mut message: Value) -> Result<Value> {
    if let Some(error) = message.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(INTERNAL_ERROR_CODE);
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(Error::rpc(code, text));
    }

    Ok(message
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

// ============================================================================
// PageProvider
// ============================================================================

/// Provider object injected into the page.
///
/// Every instance owns its id counter and pending table.
///
/// # Example
///
/// ```ignore
/// let provider = PageProvider::new(&window);
/// let chain_id = provider.request(json!({ "method": "eth_chainId" })).await?;
/// ```
pub struct PageProvider {
    /// Shared state.
    state: Arc<ProviderState>,
    /// Keeps the page stream demultiplexed.
    _mux: Multiplexer,
    /// Inbound dispatch task.
    task: JoinHandle<()>,
}

impl PageProvider {
    /// Attaches a provider to the page window.
    ///
    /// Dispatches [`PageEvent::ProviderInitialized`] once.
    #[must_use]
    pub fn new(window: &PageWindow) -> Self {
        let mux = Multiplexer::attach(PageStream::bind(window, PageChannel::Inpage));
        let (channel, inbound) = mux.channel(ChannelId::Provider).split();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let state = Arc::new(ProviderState {
            channel,
            ids: RpcIdSource::new(),
            pending: Mutex::new(Pending {
                connected: true,
                linked: false,
                outbox: VecDeque::new(),
                calls: FxHashMap::default(),
            }),
            notifications,
        });

        let task = tokio::spawn(run_inbound(inbound, mux.peer_events(), Arc::clone(&state)));

        window.dispatch_event(PageEvent::ProviderInitialized);
        debug!("Page provider initialized");

        Self {
            state,
            _mux: mux,
            task,
        }
    }

    /// Sends a JSON-RPC request and waits for its response.
    ///
    /// `args` must be `{ "method": <non-empty string>, "params"?: <object | array> }`.
    /// A request issued before the content relay is ready waits for it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequestArgs`] if `args` is malformed
    /// - [`Error::Disconnected`] if the transport is down or goes down
    ///   before the response arrives
    /// - [`Error::Rpc`] if the daemon answered with an error object
    pub async fn request(&self, args: Value) -> Result<Value> {
        let args = RequestArgs::from_value(args)?;
        self.send(&args).await
    }

    /// Sends already validated arguments.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn send(&self, args: &RequestArgs) -> Result<Value> {
        args.validate()?;

        let id = self.state.ids.next();
        let (tx, rx) = oneshot::channel();

        trace!(%id, method = %args.method, "Provider request");
        self.state.submit(id, args.to_message(id), tx)?;

        rx.await.unwrap_or(Err(Error::Disconnected))
    }

    /// Returns `true` while requests are accepted.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.pending.lock().connected
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.pending.lock().calls.len()
    }

    /// Subscribes to inbound messages that answer no pending request.
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<Value> {
        self.state.notifications.subscribe()
    }
}

impl Drop for PageProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Dispatches inbound messages and peer control frames.
async fn run_inbound(
    mut inbound: ChannelReceiver,
    mut peer: mpsc::UnboundedReceiver<PeerState>,
    state: Arc<ProviderState>,
) {
    loop {
        tokio::select! {
            biased;

            message = inbound.recv() => match message {
                Some(payload) => state.dispatch(payload),
                None => {
                    state.disconnect();
                    break;
                }
            },

            event = peer.recv() => match event {
                Some(PeerState::Ready) => state.reconnect(),
                Some(PeerState::Ended) => state.disconnect(),
                Some(PeerState::Unknown) => {}
                None => {
                    state.disconnect();
                    break;
                }
            },
        }
    }

    debug!(channel = %inbound.id(), "Provider inbound loop ended");
}

// ============================================================================
// Tests
// ============================================================================
