//! Call state machine
//!
//! Tracks the single call a client can have. Every transition that leaves
//! `PROCESSING_CALL` settles the local ICE candidate buffer: entering
//! `IN_CALL` flushes it, entering `NO_CALL` discards it.

use crate::ice::IceCandidateBuffer;
use crate::protocol::IceCandidate;
use chrono::{DateTime, Utc};
use rtcall_core::{invalid_state, RtCallError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Default reason surfaced when the peer rejects without one
pub const DEFAULT_CALL_REJECTION: &str = "Unknown reason for call rejection";

/// Whether the client is idle, setting up a call, or in one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CallState {
    /// Idle
    #[default]
    NoCall,
    /// Dialing, ringing, or waiting for the answer
    ProcessingCall,
    /// Media session established
    InCall,
}

impl CallState {
    /// Wire-style name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::NoCall => "NO_CALL",
            CallState::ProcessingCall => "PROCESSING_CALL",
            CallState::InCall => "IN_CALL",
        }
    }

    /// Whether a call is pending or active
    pub fn is_active(&self) -> bool {
        !matches!(self, CallState::NoCall)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who started the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Placed by this client
    Outgoing,
    /// Received from a remote caller
    Incoming,
}

/// The remote side of the current call
#[derive(Debug, Clone, PartialEq)]
pub struct CallPeer {
    /// Remote identity
    pub peer_id: String,
    /// Who started the call
    pub direction: CallDirection,
    /// Server-side session name (incoming calls)
    pub session_name: Option<String>,
    /// Media description from the incoming call
    pub media: Option<Value>,
    /// When the call reached `IN_CALL`
    pub started_at: Option<DateTime<Utc>>,
}

/// What to do with a locally discovered candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Call is live, send it now
    Send(IceCandidate),
    /// Held until the call is confirmed
    Buffered,
    /// No call, or the buffer is full
    Dropped,
}

/// NO_CALL / PROCESSING_CALL / IN_CALL with the candidate buffer attached
#[derive(Debug, Clone)]
pub struct CallStateMachine {
    state: CallState,
    peer: Option<CallPeer>,
    awaiting_decision: bool,
    candidates: IceCandidateBuffer,
}

impl CallStateMachine {
    /// Create an idle machine whose buffer holds `max_candidates`
    pub fn new(max_candidates: usize) -> Self {
        Self {
            state: CallState::NoCall,
            peer: None,
            awaiting_decision: false,
            candidates: IceCandidateBuffer::new(max_candidates),
        }
    }

    /// Current state
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Remote side of the current call
    pub fn peer(&self) -> Option<&CallPeer> {
        self.peer.as_ref()
    }

    /// Whether an incoming call is waiting for the user's decision
    pub fn is_awaiting_decision(&self) -> bool {
        self.awaiting_decision
    }

    /// Read-only view of the candidate buffer
    pub fn candidates(&self) -> &IceCandidateBuffer {
        &self.candidates
    }

    /// NO_CALL → PROCESSING_CALL for a call we place
    pub fn begin_outgoing(&mut self, callee_id: &str) -> Result<(), RtCallError> {
        self.require_idle("placeCall")?;
        self.peer = Some(CallPeer {
            peer_id: callee_id.to_string(),
            direction: CallDirection::Outgoing,
            session_name: None,
            media: None,
            started_at: None,
        });
        self.state = CallState::ProcessingCall;
        Ok(())
    }

    /// NO_CALL → PROCESSING_CALL for a call we receive; a decision is now due
    pub fn begin_incoming(
        &mut self,
        caller_id: &str,
        session_name: Option<String>,
        media: Option<Value>,
    ) -> Result<(), RtCallError> {
        self.require_idle("onIncomingCall")?;
        self.peer = Some(CallPeer {
            peer_id: caller_id.to_string(),
            direction: CallDirection::Incoming,
            session_name,
            media,
            started_at: None,
        });
        self.awaiting_decision = true;
        self.state = CallState::ProcessingCall;
        Ok(())
    }

    /// Consume the pending decision and return the caller
    pub fn take_decision(&mut self) -> Result<CallPeer, RtCallError> {
        if !self.awaiting_decision {
            return Err(invalid_state(
                "answer",
                "PROCESSING_CALL with an undecided incoming call",
                self.state,
            ));
        }
        self.awaiting_decision = false;
        self.peer
            .clone()
            .ok_or_else(|| invalid_state("answer", "PROCESSING_CALL", self.state))
    }

    /// PROCESSING_CALL → IN_CALL, returning the flushed candidates in order
    pub fn enter_in_call(&mut self) -> Result<Vec<IceCandidate>, RtCallError> {
        if self.state != CallState::ProcessingCall || self.awaiting_decision {
            return Err(invalid_state("enterInCall", "PROCESSING_CALL", self.state));
        }
        self.state = CallState::InCall;
        if let Some(peer) = self.peer.as_mut() {
            peer.started_at = Some(Utc::now());
        }
        Ok(self.candidates.flush())
    }

    /// PROCESSING_CALL or IN_CALL → NO_CALL, discarding buffered candidates
    pub fn end(&mut self, operation: &str) -> Result<Option<CallPeer>, RtCallError> {
        if !self.state.is_active() {
            return Err(invalid_state(
                operation,
                "IN_CALL or PROCESSING_CALL",
                self.state,
            ));
        }
        Ok(self.reset())
    }

    /// Any state → NO_CALL
    pub fn reset(&mut self) -> Option<CallPeer> {
        let discarded = self.candidates.discard();
        if discarded > 0 {
            debug!("Discarded {} buffered ICE candidates", discarded);
        }
        self.state = CallState::NoCall;
        self.awaiting_decision = false;
        self.peer.take()
    }

    /// Route a local candidate according to the current state
    pub fn offer_local_candidate(&mut self, candidate: IceCandidate) -> CandidateDisposition {
        match self.state {
            CallState::NoCall => CandidateDisposition::Dropped,
            CallState::ProcessingCall => {
                if self.candidates.add(candidate) {
                    CandidateDisposition::Buffered
                } else {
                    CandidateDisposition::Dropped
                }
            }
            CallState::InCall => CandidateDisposition::Send(candidate),
        }
    }

    fn require_idle(&self, operation: &str) -> Result<(), RtCallError> {
        if self.state != CallState::NoCall {
            return Err(invalid_state(operation, "NO_CALL", self.state));
        }
        Ok(())
    }
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new(crate::ice::DEFAULT_MAX_BUFFERED_CANDIDATES)
    }
}
