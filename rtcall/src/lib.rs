//! # RtCall - One-to-One Call Signaling
//!
//! RtCall is the signaling half of a WebRTC calling client. It registers an
//! identity with a JSON-RPC signaling server over WebSocket, places and
//! answers one-to-one calls, and relays ICE candidates, while the media
//! itself is left to whatever implements [`MediaStack`].
//!
//! ## Key Features
//!
//! - **Explicit state machines**: registration and call state with checked transitions
//! - **Ordered ICE buffering**: candidates found before the call is confirmed are flushed in order
//! - **Single-owner session**: one driver task handles every event in turn
//! - **Pluggable media**: offer/answer generation behind an async trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtcall::{Event, MediaStack, RtCall};
//! # use rtcall::{IceCandidate, RtCallError};
//! # struct MyMedia;
//! # #[rtcall::async_trait]
//! # impl MediaStack for MyMedia {
//! #     async fn generate_offer(&mut self) -> Result<String, RtCallError> { Ok(String::new()) }
//! #     async fn process_answer(&mut self, _: &str) -> Result<(), RtCallError> { Ok(()) }
//! #     async fn add_ice_candidate(&mut self, _: &IceCandidate) -> Result<(), RtCallError> { Ok(()) }
//! #     async fn dispose(&mut self) {}
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RtCall::init()?
//!         .client("alice")
//!         .signaling_server("wss://example.com/call")
//!         .connect(MyMedia)
//!         .await?;
//!
//!     let mut events = client.events().expect("first call");
//!     client.register().await?;
//!
//!     while let Some(event) = events.next().await {
//!         if let Event::IncomingCall { .. } = event {
//!             client.accept().await?;
//!         }
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use async_trait::async_trait;
pub use rtcall_core::{ConnectionConfig, RtCallError, SignalingTransport};

pub use rtcall_signaling::{
    CallDirection, CallEndReason, CallPeer, CallState, Event, EventStream, IceCandidate,
    MediaStack, PendingKind, RegistrationState, Session, SessionConfig,
};

// Public API modules
pub mod client;
pub mod config;
pub mod logging;

// Re-export main API types
pub use client::{CallClient, ClientBuilder, ClientStatus};
pub use config::{ClientConfig, GlobalConfig};
pub use logging::init_logging;

/// Main entry point for rtcall
#[derive(Debug, Clone)]
pub struct RtCall {
    config: std::sync::Arc<GlobalConfig>,
}

impl RtCall {
    /// Initialize rtcall with default settings
    ///
    /// # Example
    /// ```rust,no_run
    /// use rtcall::RtCall;
    ///
    /// let rtcall = RtCall::init()?;
    /// # Ok::<(), rtcall::RtCallError>(())
    /// ```
    pub fn init() -> Result<Self, RtCallError> {
        Self::init_with(GlobalConfig::default())
    }

    /// Initialize with custom global configuration
    ///
    /// With `debug_logging` set, a `tracing` subscriber is installed unless
    /// the application already installed one.
    pub fn init_with(config: GlobalConfig) -> Result<Self, RtCallError> {
        if config.debug_logging {
            if let Err(e) = init_logging(true) {
                tracing::debug!("Keeping existing subscriber: {}", e);
            }
        }

        Ok(Self {
            config: std::sync::Arc::new(config),
        })
    }

    /// Global configuration in effect
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Create a client builder for the given identity
    ///
    /// # Example
    /// ```rust,no_run
    /// use rtcall::RtCall;
    ///
    /// let builder = RtCall::init()?
    ///     .client("alice")
    ///     .signaling_server("ws://localhost:8443/call")
    ///     .video(false);
    /// assert!(!builder.config().has_video);
    /// # Ok::<(), rtcall::RtCallError>(())
    /// ```
    pub fn client(&self, identity: &str) -> ClientBuilder {
        ClientBuilder::new(&self.config, identity)
    }
}
