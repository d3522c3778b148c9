//! Error types for the rtcall signaling client

use std::time::Duration;
use thiserror::Error;

/// Main error type for rtcall operations
#[derive(Error, Debug)]
pub enum RtCallError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// The signaling transport could not be opened
    #[error("Connection to {url} failed: {reason}")]
    Connection {
        /// Signaling server URL
        url: String,
        /// Reason for connection failure
        reason: String,
    },

    /// Send attempted on a transport that is no longer open
    #[error("Transport is closed")]
    TransportClosed,

    /// I/O failure on an open transport
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Operation invoked in a state that forbids it
    #[error("Invalid state for {operation}: expected {expected}, got {actual}")]
    InvalidState {
        /// Operation that was attempted
        operation: String,
        /// Expected state(s)
        expected: String,
        /// Actual state
        actual: String,
    },

    /// The signaling server or remote peer declined a request
    #[error("{operation} rejected: {reason}")]
    RemoteRejection {
        /// Rejected operation (register, call)
        operation: String,
        /// Human-readable reason carried in the message
        reason: String,
    },

    /// Offer/answer generation or application failed
    #[error("Media stack error: {reason}")]
    MediaStack {
        /// Reason reported by the media stack
        reason: String,
    },

    /// Empty identity or call target
    #[error("Invalid identity for {field}: must not be empty")]
    InvalidIdentity {
        /// Field that carried the identity
        field: String,
    },

    /// Incoming frame could not be decoded
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: serde_json::Error,
    },

    /// Outgoing envelope could not be encoded
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Pending request never received a response
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Command issued after the client driver stopped
    #[error("Client is closed")]
    ClientClosed,
}

impl RtCallError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            RtCallError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            RtCallError::Connection { .. } => "CONNECTION_FAILED".to_string(),
            RtCallError::TransportClosed => "TRANSPORT_CLOSED".to_string(),
            RtCallError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            RtCallError::InvalidState { .. } => "INVALID_STATE".to_string(),
            RtCallError::RemoteRejection { .. } => "REMOTE_REJECTION".to_string(),
            RtCallError::MediaStack { .. } => "MEDIA_STACK_ERROR".to_string(),
            RtCallError::InvalidIdentity { .. } => "INVALID_IDENTITY".to_string(),
            RtCallError::InvalidMessage { .. } => "INVALID_MESSAGE".to_string(),
            RtCallError::Serialization(_) => "SERIALIZATION_FAILED".to_string(),
            RtCallError::Timeout { .. } => "TIMEOUT".to_string(),
            RtCallError::ClientClosed => "CLIENT_CLOSED".to_string(),
        }
    }

    /// Whether the session survives this error
    ///
    /// Transport failures end the session; rejections, media faults and
    /// timeouts return the state machines to a stable state instead.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RtCallError::RemoteRejection { .. }
            | RtCallError::MediaStack { .. }
            | RtCallError::Timeout { .. }
            | RtCallError::InvalidMessage { .. }
            | RtCallError::InvalidState { .. }
            | RtCallError::InvalidIdentity { .. } => true,
            RtCallError::Initialization { .. }
            | RtCallError::Connection { .. }
            | RtCallError::TransportClosed
            | RtCallError::Transport { .. }
            | RtCallError::Serialization(_)
            | RtCallError::ClientClosed => false,
        }
    }

    /// Whether this error means the transport is gone
    pub fn is_fatal_transport(&self) -> bool {
        matches!(
            self,
            RtCallError::Connection { .. }
                | RtCallError::TransportClosed
                | RtCallError::Transport { .. }
        )
    }
}

/// Build an [`RtCallError::InvalidState`] from a state value
pub fn invalid_state(
    operation: impl Into<String>,
    expected: impl Into<String>,
    actual: impl std::fmt::Debug,
) -> RtCallError {
    RtCallError::InvalidState {
        operation: operation.into(),
        expected: expected.into(),
        actual: format!("{:?}", actual),
    }
}
