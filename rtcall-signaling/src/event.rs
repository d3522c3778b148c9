//! Session events surfaced to the UI

use crate::call::CallState;
use crate::registration::RegistrationState;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Why a call returned to `NO_CALL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEndReason {
    /// Local user hung up
    LocalHangup,
    /// Peer hung up
    RemoteHangup,
    /// Peer or server rejected the call
    Rejected(String),
    /// Local user declined an incoming call
    Declined,
    /// Media stack or protocol failure
    Failed(String),
    /// No answer before the request deadline
    TimedOut,
    /// Registration changed underneath the call
    RegistrationChanged,
    /// Session shut down
    SessionClosed,
}

/// Events emitted by a session
#[derive(Debug, Clone)]
pub enum Event {
    /// Registration state changed
    RegistrationStateChanged {
        /// New state
        state: RegistrationState,
    },
    /// Server rejected the registration
    RegistrationRejected {
        /// Human-readable reason
        reason: String,
    },
    /// Call state changed
    CallStateChanged {
        /// New state
        state: CallState,
    },
    /// A remote user is calling; answer with accept or decline
    IncomingCall {
        /// Caller identity
        caller_id: String,
        /// Server-side session name
        session_name: Option<String>,
    },
    /// A caller was told we are busy
    BusyReplied {
        /// Caller identity
        caller_id: String,
    },
    /// Call reached `IN_CALL`
    CallEstablished {
        /// Remote identity
        peer_id: String,
        /// When the call was established
        started_at: DateTime<Utc>,
    },
    /// Call returned to `NO_CALL`
    CallEnded {
        /// Remote identity, if known
        peer_id: Option<String>,
        /// Why the call ended
        reason: CallEndReason,
    },
    /// Media stack reported a failure
    MediaError {
        /// Failure description
        reason: String,
    },
    /// A pending request got no response in time
    RequestTimedOut {
        /// Request method
        operation: String,
    },
    /// Signaling transport is gone
    Disconnected {
        /// Why the session ended
        reason: String,
    },
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::RegistrationStateChanged { .. } => "registration_state_changed",
            Event::RegistrationRejected { .. } => "registration_rejected",
            Event::CallStateChanged { .. } => "call_state_changed",
            Event::IncomingCall { .. } => "incoming_call",
            Event::BusyReplied { .. } => "busy_replied",
            Event::CallEstablished { .. } => "call_established",
            Event::CallEnded { .. } => "call_ended",
            Event::MediaError { .. } => "media_error",
            Event::RequestTimedOut { .. } => "request_timed_out",
            Event::Disconnected { .. } => "disconnected",
        }
    }

    /// Check if this is a call-related event
    pub fn is_call_event(&self) -> bool {
        matches!(
            self,
            Event::CallStateChanged { .. }
                | Event::IncomingCall { .. }
                | Event::BusyReplied { .. }
                | Event::CallEstablished { .. }
                | Event::CallEnded { .. }
        )
    }

    /// Check if this is an error event the user should see
    pub fn is_error_event(&self) -> bool {
        matches!(
            self,
            Event::RegistrationRejected { .. }
                | Event::MediaError { .. }
                | Event::RequestTimedOut { .. }
                | Event::Disconnected { .. }
                | Event::CallEnded {
                    reason: CallEndReason::Rejected(_) | CallEndReason::Failed(_),
                    ..
                }
        )
    }
}

/// Stream of session events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { receiver }
    }

    /// Create a connected sender/stream pair
    pub fn channel() -> (mpsc::UnboundedSender<Event>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
