//! Correlated request/response session over the gateway socket.
//!
//! A [`Session`] owns one [`Transport`] and keeps at most one request in
//! flight: every method takes `&mut self`. Callers that share the gateway
//! (the polling loop and on-demand writes) go through a [`SharedSession`],
//! holding its lock for the whole connect → query… → disconnect sequence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::envelope::{DeviceInformation, EnvelopeError, Request, Response, LATEST};
use crate::transport::{Endpoint, Transport, TransportError};

/// How long a query waits for its reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Session shared between the polling loop and write requests.
pub type SharedSession<T> = Arc<Mutex<Session<T>>>;

/// Query error types.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Query issued outside a connect/disconnect pair.
    #[error("Session not connected")]
    NotConnected,

    /// The socket failed underneath the query.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No matching reply within the reply window.
    #[error("No reply within {timeout_ms}ms for {target}")]
    Timeout { target: String, timeout_ms: u64 },

    /// Reply was not a response envelope.
    #[error("Malformed response for {target}: {source}")]
    MalformedResponse {
        target: String,
        #[source]
        source: EnvelopeError,
    },

    /// Successful reply without the expected payload.
    #[error("Response for {target} carries no {what}")]
    MissingContent { target: String, what: &'static str },
}

/// One logical connection to the gateway.
pub struct Session<T> {
    transport: T,
    endpoint: Endpoint,
    reply_timeout: Duration,
    connected: bool,
}

impl<T: Transport> Session<T> {
    /// Create a session bound to an endpoint. Nothing is opened yet.
    pub fn new(transport: T, endpoint: Endpoint) -> Self {
        Self {
            transport,
            endpoint,
            reply_timeout: REPLY_TIMEOUT,
            connected: false,
        }
    }

    /// Override the reply window.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Wrap the session for sharing.
    pub fn shared(self) -> SharedSession<T> {
        Arc::new(Mutex::new(self))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.transport.is_open()
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open the socket.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        match self.transport.open(&self.endpoint).await {
            Ok(()) => {
                self.connected = true;
                trace!(endpoint = %self.endpoint, "Session connected");
                Ok(())
            }
            Err(e) => {
                self.connected = false;
                Err(e)
            }
        }
    }

    /// Close the socket.
    pub async fn disconnect(&mut self) {
        if self.connected {
            trace!(endpoint = %self.endpoint, "Session disconnected");
        }
        self.connected = false;
        self.transport.close().await;
    }

    /// Retrieve the resource at a device-relative path.
    pub async fn query(&mut self, path: &str) -> Result<Response, QueryError> {
        self.exchange(Request::retrieve(path)).await
    }

    /// Retrieve the latest content at `path` (`<path>/la`) and return the
    /// reply. A non-success code is not an error at this level.
    pub async fn query_latest(&mut self, path: &str) -> Result<Response, QueryError> {
        self.query(&format!("{}{}", path, LATEST)).await
    }

    /// Write a value to a device-relative path.
    pub async fn write(&mut self, path: &str, value: &str) -> Result<Response, QueryError> {
        self.exchange(Request::write(path, value)).await
    }

    /// Ask the gateway for its identity.
    pub async fn device_info(&mut self) -> Result<Option<DeviceInformation>, QueryError> {
        let request = Request::device_info();
        let target = request.target.clone();
        let response = self.exchange(request).await?;
        if !response.is_success() {
            debug!(code = response.code, "deviceInfo not available");
            return Ok(None);
        }
        DeviceInformation::from_response(&response)
            .map(Some)
            .ok_or(QueryError::MissingContent {
                target,
                what: "device information",
            })
    }

    /// Send one request and wait for the reply carrying its token.
    async fn exchange(&mut self, request: Request) -> Result<Response, QueryError> {
        if !self.is_connected() {
            warn!(path = %request.target, "Tried to query but session was not connected");
            return Err(QueryError::NotConnected);
        }

        self.transport.send(request.encode()).await?;

        let deadline = Instant::now() + self.reply_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let text = match tokio::time::timeout(remaining, self.transport.recv()).await {
                Ok(Ok(Some(text))) => text,
                Ok(Ok(None)) => {
                    self.connected = false;
                    return Err(TransportError::Closed.into());
                }
                Ok(Err(e)) => {
                    self.connected = false;
                    return Err(e.into());
                }
                Err(_) => {
                    warn!(path = %request.target, "Did not receive a reply in time");
                    return Err(QueryError::Timeout {
                        target: request.target,
                        timeout_ms: self.reply_timeout.as_millis() as u64,
                    });
                }
            };

            let response = Response::parse(&text).map_err(|source| {
                warn!(path = %request.target, response = %text, "Unexpected reply: {}", source);
                QueryError::MalformedResponse {
                    target: request.target.clone(),
                    source,
                }
            })?;

            match response.token.as_deref() {
                Some(token) if token != request.token => {
                    debug!(
                        expected = %request.token,
                        received = %token,
                        "Discarding stale reply"
                    );
                    continue;
                }
                _ => {
                    trace!(path = %request.target, code = response.code, "Reply received");
                    return Ok(response);
                }
            }
        }
    }
}
