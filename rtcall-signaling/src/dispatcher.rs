//! RPC dispatcher: request encoding and id allocation

use crate::protocol::{methods, IncomingMessage, RpcEnvelope};
use rtcall_core::{RtCallError, SignalingTransport};
use serde::Serialize;
use tracing::{debug, trace};

/// Encodes outgoing requests onto a transport with per-session ids
#[derive(Debug)]
pub struct RpcDispatcher<T> {
    transport: T,
    next_id: u64,
}

impl<T: SignalingTransport> RpcDispatcher<T> {
    /// Wrap a transport; the first request gets id 0
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: 0,
        }
    }

    /// Send `method` with serialized `params`; returns the request id
    pub async fn send<P: Serialize>(
        &mut self,
        method: &str,
        params: &P,
    ) -> Result<u64, RtCallError> {
        let params = serde_json::to_value(params)?;
        self.send_request(method, Some(params)).await
    }

    /// Send a parameterless request; returns the request id
    pub async fn send_bare(&mut self, method: &str) -> Result<u64, RtCallError> {
        self.send_request(method, None).await
    }

    /// Liveness probe
    pub async fn keep_alive(&mut self) -> Result<u64, RtCallError> {
        self.send_bare(methods::KEEP_LIVE).await
    }

    async fn send_request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<u64, RtCallError> {
        if !self.transport.is_connected() {
            return Err(RtCallError::TransportClosed);
        }

        // Never reused, even when the send below fails
        let id = self.next_id;
        self.next_id += 1;

        let json = RpcEnvelope::request(id, method, params).to_json()?;
        debug!("Sending message: {}", json);
        self.transport.send_text(json).await?;
        Ok(id)
    }

    /// Decode one incoming text frame
    pub fn decode(&self, text: &str) -> Result<IncomingMessage, RtCallError> {
        trace!("Received message: {}", text);
        IncomingMessage::decode(text)
    }

    /// Whether the transport is still open
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Close the underlying transport
    pub async fn close(&mut self) -> Result<(), RtCallError> {
        self.transport.close().await
    }
}
