//! Network connection to the native daemon.
//!
//! The connection manager only sees the [`Connector`] and [`DaemonLink`]
//! traits. [`WsConnector`] is the production implementation over
//! `tokio-tungstenite`; [`memory`](super::memory) provides an in-process one.
//!
//! # Framing
//!
//! Every frame is UTF-8 text. Binary frames and WebSocket-level control
//! frames are not part of the protocol and are skipped; the application-level
//! keepalive is the literal text `ping` / `pong`.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for the WebSocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Traits
// ============================================================================

/// Opens network connections to the daemon.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dials `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the daemon cannot be reached.
    async fn connect(&self, url: &Url) -> Result<Box<dyn DaemonLink>>;
}

/// An open, full-duplex, text-framed connection to the daemon.
#[async_trait]
pub trait DaemonLink: Send {
    /// Writes one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is no longer writable.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Reads the next text frame.
    ///
    /// Returns `None` once the daemon closed the connection. Must be
    /// cancel-safe: it is polled inside `select!`.
    async fn next_text(&mut self) -> Option<Result<String>>;

    /// Closes the connection.
    async fn close(&mut self);
}

// ============================================================================
// WsConnector
// ============================================================================

/// WebSocket connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnector {
    /// Creates a connector with the default handshake timeout.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn DaemonLink>> {
        let (stream, _response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                Error::connection_failed(
                    url.as_str(),
                    format!("handshake timed out after {}ms", self.connect_timeout.as_millis()),
                )
            })?
            .map_err(|e| Error::connection_failed(url.as_str(), e.to_string()))?;

        debug!(%url, "Daemon WebSocket connected");
        Ok(Box::new(WsLink { stream }))
    }
}

// ============================================================================
// WsLink
// ============================================================================

/// WebSocket connection to the daemon.
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DaemonLink for WsLink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Daemon closed WebSocket");
                    return None;
                }
                // Binary, Ping, Pong, Frame
                Ok(other) => trace!(len = other.len(), "Skipping non-text frame"),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(error = %e, "WebSocket close failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn test_ws_link_exchanges_text_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            ws.send(Message::Binary(vec![1, 2, 3].into()))
                .await
                .expect("send binary");
            ws.send(Message::Text("ping".into())).await.expect("send ping");
            match ws.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                other => panic!("unexpected frame: {other:?}"),
            }
        });

        let url = Url::parse(&format!("ws://127.0.0.1:{port}/?tabId=1")).expect("url");
        let mut link = WsConnector::new().connect(&url).await.expect("connect");

        let frame = link.next_text().await.expect("frame").expect("text");
        assert_eq!(frame, "ping");
        link.send_text("pong".to_string()).await.expect("send");

        assert_eq!(server.await.expect("server"), "pong");
        link.close().await;
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        let result = WsConnector::new()
            .with_connect_timeout(Duration::from_secs(2))
            .connect(&url)
            .await;

        match result {
            Err(err) => assert!(err.is_connection_error()),
            Ok(_) => panic!("connection to a closed port succeeded"),
        }
    }
}
