//! Socket transport underneath a [`Session`](crate::session::Session).
//!
//! The gateway is only reachable through a WebSocket at
//! `ws://<host>:<port>/mca`. The [`Transport`] trait hides that socket so the
//! session, discovery and scheduler can be driven by a simulated gateway in
//! tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Default gateway port.
pub const DEFAULT_PORT: u16 = 80;

/// Bound on establishing the socket.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("Connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Connection attempt exceeded its bound.
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// Operation on a transport that was never opened or already closed.
    #[error("Transport not connected")]
    NotConnected,

    /// The remote side closed the socket.
    #[error("Connection closed by peer")]
    Closed,

    /// Send failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Address of the gateway socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL of the gateway's message channel.
    pub fn url(&self) -> String {
        format!("ws://{}:{}/mca", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A bidirectional text-message channel to the gateway.
#[async_trait]
pub trait Transport: Send {
    /// Open the channel.
    async fn open(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text message. `Ok(None)` means the peer closed the
    /// channel.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the channel. Closing an unopened transport is a no-op.
    async fn close(&mut self);

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Default)]
pub struct WsTransport {
    stream: Option<WsStream>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        if self.stream.is_some() {
            self.close().await;
        }
        let url = endpoint.url();
        let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::ConnectTimeout(url.clone()))?
            .map_err(|e| TransportError::ConnectionFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        trace!(url = %url, "WebSocket connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(payload))) => {
                    debug!(len = payload.len(), "Unexpected binary content on websocket");
                }
                Some(Ok(Message::Close(frame))) => {
                    trace!(?frame, "WebSocket closed by peer");
                    self.stream = None;
                    return Ok(None);
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!("WebSocket close error: {}", e);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
