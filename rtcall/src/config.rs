//! Configuration types and defaults

use rtcall_core::ConnectionConfig;
use rtcall_signaling::ice::DEFAULT_MAX_BUFFERED_CANDIDATES;
use rtcall_signaling::SessionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global rtcall configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Enable debug logging
    pub debug_logging: bool,
    /// Default signaling server URL
    pub default_signaling_url: Option<String>,
}

/// Per-client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Signaling server URL (`ws://` or `wss://`)
    pub server_url: Option<String>,
    /// Local identity, sent as `clientId` and registered as `userId`
    pub identity: String,
    /// Offer audio on calls
    pub has_audio: bool,
    /// Offer video on calls
    pub has_video: bool,
    /// Period of `keepLive` probes; `None` disables them
    pub keep_alive_interval: Option<Duration>,
    /// Deadline for `register` and `call` results; `None` waits forever
    pub request_timeout: Option<Duration>,
    /// Cap on local ICE candidates buffered before the call is confirmed
    pub max_buffered_candidates: usize,
    /// WebSocket handshake timeout
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            identity: String::new(),
            has_audio: true,
            has_video: true,
            keep_alive_interval: Some(Duration::from_secs(30)),
            request_timeout: Some(Duration::from_secs(30)),
            max_buffered_candidates: DEFAULT_MAX_BUFFERED_CANDIDATES,
            connect_timeout: ConnectionConfig::default().timeout,
        }
    }
}

impl ClientConfig {
    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            identity: self.identity.clone(),
            has_audio: self.has_audio,
            has_video: self.has_video,
            request_timeout: self.request_timeout,
            max_buffered_candidates: self.max_buffered_candidates,
        }
    }

    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            timeout: self.connect_timeout,
        }
    }
}
