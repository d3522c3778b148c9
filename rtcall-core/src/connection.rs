//! WebSocket connection manager for the signaling transport
//!
//! One [`Connection`] exists per client session. It is opened with
//! [`Connection::connect`] and split into a [`ConnectionSender`] (owned by the
//! session, implements [`SignalingTransport`]) and a [`ConnectionReceiver`]
//! (polled by the client driver). Both halves share a liveness flag so a close
//! observed on the read side turns later sends into
//! [`RtCallError::TransportClosed`].

use crate::error::RtCallError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Query parameter carrying the local identity on the connect URL
pub const CLIENT_ID_PARAM: &str = "clientId";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection establishment configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Handshake timeout
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outgoing half of a signaling transport
#[async_trait]
pub trait SignalingTransport: Send {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<(), RtCallError>;

    /// Close the transport; closing twice is a no-op
    async fn close(&mut self) -> Result<(), RtCallError>;

    /// Check if transport is connected
    fn is_connected(&self) -> bool;
}

/// An open WebSocket to the signaling server
#[derive(Debug)]
pub struct Connection {
    url: Url,
    stream: WsStream,
}

impl Connection {
    /// Build the connect URL for `server_url` with the identity attached
    pub fn signaling_url(server_url: &str, identity: &str) -> Result<Url, RtCallError> {
        if identity.is_empty() {
            return Err(RtCallError::InvalidIdentity {
                field: "identity".to_string(),
            });
        }

        let mut url = Url::parse(server_url).map_err(|e| RtCallError::Connection {
            url: server_url.to_string(),
            reason: format!("invalid URL: {}", e),
        })?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RtCallError::Connection {
                    url: server_url.to_string(),
                    reason: format!("unsupported scheme '{}', expected ws or wss", other),
                })
            }
        }

        url.query_pairs_mut().append_pair(CLIENT_ID_PARAM, identity);
        Ok(url)
    }

    /// Open the transport to `server_url` as `identity`
    pub async fn connect(
        server_url: &str,
        identity: &str,
        config: &ConnectionConfig,
    ) -> Result<Self, RtCallError> {
        let url = Self::signaling_url(server_url, identity)?;

        let (stream, _) = tokio::time::timeout(config.timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| RtCallError::Connection {
                url: url.to_string(),
                reason: format!("handshake timed out after {:?}", config.timeout),
            })?
            .map_err(|e| RtCallError::Connection {
                url: url.to_string(),
                reason: format!("WebSocket connection failed: {}", e),
            })?;

        info!("Signaling connection established to {}", url);
        Ok(Self { url, stream })
    }

    /// URL this connection was opened with
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Split into the send half and the receive half
    pub fn split(self) -> (ConnectionSender, ConnectionReceiver) {
        let open = Arc::new(AtomicBool::new(true));
        let (sink, stream) = self.stream.split();
        (
            ConnectionSender {
                sink: Some(sink),
                open: open.clone(),
            },
            ConnectionReceiver { stream, open },
        )
    }
}

/// Send half of a [`Connection`]
#[derive(Debug)]
pub struct ConnectionSender {
    sink: Option<SplitSink<WsStream, Message>>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl SignalingTransport for ConnectionSender {
    async fn send_text(&mut self, text: String) -> Result<(), RtCallError> {
        if !self.is_connected() {
            return Err(RtCallError::TransportClosed);
        }
        let sink = self.sink.as_mut().ok_or(RtCallError::TransportClosed)?;

        if let Err(e) = sink.send(Message::Text(text)).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(RtCallError::Transport {
                reason: format!("Failed to send frame: {}", e),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RtCallError> {
        self.open.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!("Error while closing signaling transport: {}", e);
            }
            info!("Signaling connection closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.sink.is_some() && self.open.load(Ordering::SeqCst)
    }
}

/// Receive half of a [`Connection`]
#[derive(Debug)]
pub struct ConnectionReceiver {
    stream: SplitStream<WsStream>,
    open: Arc<AtomicBool>,
}

impl ConnectionReceiver {
    /// Next text frame from the server
    ///
    /// Returns `Ok(None)` once the server closed the connection. Ping, pong and
    /// binary frames are skipped.
    pub async fn recv(&mut self) -> Result<Option<String>, RtCallError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Signaling server sent close: {:?}", frame);
                    self.open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Ignoring {} byte binary frame on signaling transport", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.open.store(false, Ordering::SeqCst);
                    return Err(RtCallError::Transport {
                        reason: format!("Failed to receive frame: {}", e),
                    });
                }
                None => {
                    self.open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
            }
        }
    }

    /// Check if the read side still considers the transport open
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
