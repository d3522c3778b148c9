//! Signaling protocol messages
//!
//! Outgoing traffic is a JSON-RPC-2.0-shaped [`RpcEnvelope`]. Incoming frames
//! are either a result (`{"result": {"method": ..}}`) or a method call
//! (`{"method": .., "params": ..}`) and are decoded into the closed
//! [`IncomingMessage`] set, with [`IncomingMessage::Unrecognized`] catching
//! anything newer servers may send.

use rtcall_core::RtCallError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Literal carried in every envelope's `jsonrpc` field
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names used on the wire
pub mod methods {
    /// Register the local identity (client request, server result)
    pub const REGISTER: &str = "register";
    /// Place an outgoing call (client request, server result)
    pub const CALL: &str = "call";
    /// Call progress event (both directions)
    pub const ON_CALL: &str = "onCall";
    /// Local ICE candidate sent to the peer
    pub const ON_ICE_CANDIDATE: &str = "onIceCandidate";
    /// Liveness probe
    pub const KEEP_LIVE: &str = "keepLive";
    /// Server notification of an inbound call
    pub const INCOMING_CALL: &str = "incomingCall";
    /// Remote ICE candidate relayed by the server
    pub const ICE_CANDIDATE: &str = "iceCandidate";
}

/// `type` value of an accepted registration
pub const REGISTER_ACCEPTED: &str = "accepted";
/// `response` value of an accepted call
pub const CALL_RESPONSE_OK: &str = "OK";

/// Outgoing JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    /// Per-session request id
    pub id: u64,
    /// Method name
    pub method: String,
    /// Request parameters; omitted for parameterless requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Always "2.0"
    pub jsonrpc: String,
}

impl RpcEnvelope {
    /// Build a request envelope
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            jsonrpc: JSONRPC_VERSION.to_string(),
        }
    }

    /// Encode to the wire representation
    pub fn to_json(&self) -> Result<String, RtCallError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// ICE candidate as produced by the media stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// SDP candidate line
    pub candidate: String,
    /// Media stream identification tag
    pub sdp_mid: String,
    /// Index of the m-line the candidate belongs to
    pub sdp_m_line_index: u32,
}

impl IceCandidate {
    /// Create a candidate
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: impl Into<String>,
        sdp_m_line_index: u32,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            sdp_m_line_index,
        }
    }
}

/// `register` request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterParams {
    /// Identity to register
    pub user_id: String,
}

/// `call` request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParams {
    /// Local identity
    pub caller_id: String,
    /// Identity being called
    pub callee_id: String,
    /// Offer audio
    pub has_audio: bool,
    /// Offer video
    pub has_video: bool,
    /// Local SDP offer
    pub sdp_offer: String,
}

/// `onIceCandidate` request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateParams {
    /// SDP candidate line
    pub candidate: String,
    /// Media stream identification tag
    pub sdp_mid: String,
    /// Index of the m-line
    pub sdp_m_line_index: u32,
    /// Local identity the candidate belongs to
    pub endpoint_name: String,
}

impl IceCandidateParams {
    /// Attach the local identity to a candidate
    pub fn new(candidate: IceCandidate, endpoint_name: impl Into<String>) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_m_line_index: candidate.sdp_m_line_index,
            endpoint_name: endpoint_name.into(),
        }
    }
}

/// Call progress event kinds sent by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallEventKind {
    /// Incoming call accepted
    Accept,
    /// Incoming call declined
    Reject,
    /// Already in a call
    Busy,
    /// Call ended locally
    Hangup,
}

/// Outgoing `onCall` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEventParams {
    /// Event kind
    pub event: CallEventKind,
    /// Caller of the call this event refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    /// Server-side session name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    /// Media description echoed from the incoming call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Value>,
    /// Offer audio (accept only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<bool>,
    /// Offer video (accept only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_video: Option<bool>,
    /// Local SDP offer (accept only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_offer: Option<String>,
    /// Human-readable reason (reject/busy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CallEventParams {
    /// Bare event with no extra fields
    pub fn new(event: CallEventKind) -> Self {
        Self {
            event,
            caller_id: None,
            session_name: None,
            media: None,
            has_audio: None,
            has_video: None,
            sdp_offer: None,
            reason: None,
        }
    }
}

/// Result of a `register` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResult {
    /// "accepted" or a rejection marker
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Rejection reason
    #[serde(default)]
    pub message: Option<String>,
}

impl RegisterResult {
    /// Whether the server accepted the registration
    pub fn is_accepted(&self) -> bool {
        self.kind == REGISTER_ACCEPTED
    }
}

/// Result of a `call` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    /// "OK" or a rejection reason
    #[serde(default)]
    pub response: String,
    /// Remote SDP answer when accepted
    #[serde(default)]
    pub sdp_answer: Option<String>,
}

impl CallResult {
    /// Whether the callee accepted
    pub fn is_ok(&self) -> bool {
        self.response == CALL_RESPONSE_OK
    }
}

/// `incomingCall` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallParams {
    /// Identity of the caller
    pub caller_id: String,
    /// Server-side session name
    #[serde(default)]
    pub session_name: Option<String>,
    /// Media description, echoed back in the reply
    #[serde(default)]
    pub media: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCallEvent {
    event: String,
    #[serde(default)]
    sdp_answer: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Call progress event received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCallEvent {
    /// Callee accepted
    Accept {
        /// Remote SDP answer
        sdp_answer: Option<String>,
    },
    /// Media session connected
    Connected {
        /// Remote SDP answer
        sdp_answer: Option<String>,
    },
    /// Callee declined
    Reject {
        /// Reason given by the peer
        reason: Option<String>,
    },
    /// Peer hung up
    Hangup,
    /// Event name this client does not know
    Other(String),
}

impl From<RawCallEvent> for RemoteCallEvent {
    fn from(raw: RawCallEvent) -> Self {
        match raw.event.as_str() {
            "accept" => RemoteCallEvent::Accept {
                sdp_answer: raw.sdp_answer,
            },
            "connected" => RemoteCallEvent::Connected {
                sdp_answer: raw.sdp_answer,
            },
            "reject" => RemoteCallEvent::Reject { reason: raw.reason },
            "hangup" => RemoteCallEvent::Hangup,
            _ => RemoteCallEvent::Other(raw.event),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    #[serde(default)]
    pub code: Option<i64>,
    /// Error message
    #[serde(default)]
    pub message: Option<String>,
    /// Extra data
    #[serde(default)]
    pub data: Option<Value>,
}

/// Every message the client understands, plus a catch-all
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Result of `register`
    RegisterResult(RegisterResult),
    /// Result of `call`
    CallResult(CallResult),
    /// `incomingCall` method call
    IncomingCall(IncomingCallParams),
    /// `onCall` method call
    CallEvent(RemoteCallEvent),
    /// `iceCandidate` method call
    IceCandidate(IceCandidate),
    /// JSON-RPC error envelope
    Error(RpcError),
    /// Result or method this client does not know
    Unrecognized {
        /// Method name, when the message carried one
        method: Option<String>,
    },
}

impl IncomingMessage {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, RtCallError> {
        let invalid = |source| RtCallError::InvalidMessage {
            message: text.to_string(),
            source,
        };

        let value: Value = serde_json::from_str(text).map_err(invalid)?;
        let Value::Object(mut object) = value else {
            return Ok(IncomingMessage::Unrecognized { method: None });
        };

        if let Some(result) = object.remove("result") {
            return Self::decode_result(result).map_err(invalid);
        }

        if let Some(error) = object.remove("error") {
            return serde_json::from_value(error)
                .map(IncomingMessage::Error)
                .map_err(invalid);
        }

        let method = match object.get("method").and_then(Value::as_str) {
            Some(method) => method.to_string(),
            None => return Ok(IncomingMessage::Unrecognized { method: None }),
        };
        let params = match object.remove("params") {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(params) => params,
        };

        Self::decode_method(method, params).map_err(invalid)
    }

    fn decode_result(result: Value) -> Result<Self, serde_json::Error> {
        let method = result
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);

        match method.as_deref() {
            Some(methods::REGISTER) => from_value(result).map(IncomingMessage::RegisterResult),
            Some(methods::CALL) => from_value(result).map(IncomingMessage::CallResult),
            _ => Ok(IncomingMessage::Unrecognized { method }),
        }
    }

    fn decode_method(method: String, params: Value) -> Result<Self, serde_json::Error> {
        match method.as_str() {
            methods::INCOMING_CALL => from_value(params).map(IncomingMessage::IncomingCall),
            methods::ON_CALL => from_value::<RawCallEvent>(params)
                .map(|raw| IncomingMessage::CallEvent(raw.into())),
            methods::ICE_CANDIDATE => from_value(params).map(IncomingMessage::IceCandidate),
            _ => Ok(IncomingMessage::Unrecognized {
                method: Some(method),
            }),
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingMessage::RegisterResult(_) => "register_result",
            IncomingMessage::CallResult(_) => "call_result",
            IncomingMessage::IncomingCall(_) => "incoming_call",
            IncomingMessage::CallEvent(_) => "call_event",
            IncomingMessage::IceCandidate(_) => "ice_candidate",
            IncomingMessage::Error(_) => "error",
            IncomingMessage::Unrecognized { .. } => "unrecognized",
        }
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}
