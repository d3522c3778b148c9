//! # rtcall core
//!
//! Error taxonomy and the WebSocket connection manager shared by the rtcall
//! signaling client crates.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;

// Re-export main types
pub use connection::{
    Connection, ConnectionConfig, ConnectionReceiver, ConnectionSender, SignalingTransport,
    CLIENT_ID_PARAM,
};
pub use error::{invalid_state, RtCallError};
