//! Media stack seam
//!
//! Offer/answer generation and ICE handling live outside this crate. The
//! session drives whatever implements [`MediaStack`] and awaits each
//! operation, so completions re-enter the state machines in order.

use crate::protocol::IceCandidate;
use async_trait::async_trait;
use rtcall_core::RtCallError;

/// WebRTC media stack used by a session
#[async_trait]
pub trait MediaStack: Send {
    /// Produce a local SDP offer
    async fn generate_offer(&mut self) -> Result<String, RtCallError>;

    /// Apply the remote SDP answer
    async fn process_answer(&mut self, sdp_answer: &str) -> Result<(), RtCallError>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), RtCallError>;

    /// Release per-call media resources
    async fn dispose(&mut self);
}
