//! Structured logging setup

use rtcall_core::RtCallError;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";
/// Filter used when debug logging is requested and `RUST_LOG` is unset
pub const DEBUG_FILTER: &str = "rtcall=debug,rtcall_signaling=debug,rtcall_core=debug,info";

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` wins over the `debug` flag. Fails with
/// [`RtCallError::Initialization`] if a subscriber is already installed.
pub fn init_logging(debug: bool) -> Result<(), RtCallError> {
    let fallback = if debug { DEBUG_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| RtCallError::Initialization {
            reason: format!("Failed to install tracing subscriber: {}", e),
        })
}
