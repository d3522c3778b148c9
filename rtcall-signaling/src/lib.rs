//! # RtCall Signaling
//!
//! Client side of the JSON-RPC call-setup protocol.
//! Handles registration, one-to-one call negotiation, ICE candidate
//! buffering, and routing of server messages into the session state.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod dispatcher;
pub mod event;
pub mod ice;
pub mod media;
pub mod protocol;
pub mod registration;
pub mod session;

// Re-export main types
pub use call::{CallDirection, CallPeer, CallState, CallStateMachine, CandidateDisposition};
pub use dispatcher::RpcDispatcher;
pub use event::{CallEndReason, Event, EventStream};
pub use ice::IceCandidateBuffer;
pub use media::MediaStack;
pub use protocol::{IceCandidate, IncomingMessage, RemoteCallEvent};
pub use registration::{RegistrationState, RegistrationStateMachine};
pub use session::{PendingKind, PendingRequest, Session, SessionConfig};
