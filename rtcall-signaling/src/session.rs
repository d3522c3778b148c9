//! Signaling session
//!
//! A [`Session`] owns everything one client connection needs: the RPC
//! dispatcher over the transport, the injected media stack, both state
//! machines, and the event sender. All methods take `&mut self` and run to
//! completion, so the caller serializes UI commands, incoming frames and
//! timer ticks through a single flow.

use crate::call::{
    CallPeer, CallState, CallStateMachine, CandidateDisposition, DEFAULT_CALL_REJECTION,
};
use crate::dispatcher::RpcDispatcher;
use crate::event::{CallEndReason, Event, EventStream};
use crate::ice::DEFAULT_MAX_BUFFERED_CANDIDATES;
use crate::media::MediaStack;
use crate::protocol::{
    methods, CallEventKind, CallEventParams, CallParams, IceCandidate, IceCandidateParams,
    IncomingCallParams, IncomingMessage, RegisterParams, RemoteCallEvent,
};
use crate::registration::{
    RegistrationState, RegistrationStateMachine, DEFAULT_REGISTER_REJECTION,
};
use rtcall_core::{invalid_state, RtCallError, SignalingTransport};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reason sent with a `busy` reply
pub const BUSY_REASON: &str = "busy";
/// Reason sent when the local user declines
pub const DECLINE_REASON: &str = "Call declined";
/// Media description sent with an accept when the caller gave none
pub const DEFAULT_ACCEPT_MEDIA: &str = "all";

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local identity; also the `clientId` of the connection
    pub identity: String,
    /// Offer audio on calls
    pub has_audio: bool,
    /// Offer video on calls
    pub has_video: bool,
    /// Deadline for `register` and `call`; `None` waits forever
    pub request_timeout: Option<Duration>,
    /// Cap on buffered local ICE candidates
    pub max_buffered_candidates: usize,
}

impl SessionConfig {
    /// Defaults for `identity`
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            has_audio: true,
            has_video: true,
            request_timeout: Some(Duration::from_secs(30)),
            max_buffered_candidates: DEFAULT_MAX_BUFFERED_CANDIDATES,
        }
    }
}

/// Which request is waiting for its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// `register`
    Register,
    /// `call`, or an accepted incoming call waiting for `connected`
    Call,
}

impl PendingKind {
    fn method(&self) -> &'static str {
        match self {
            PendingKind::Register => methods::REGISTER,
            PendingKind::Call => methods::CALL,
        }
    }
}

/// A request awaiting its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Request kind
    pub kind: PendingKind,
    /// Envelope id
    pub id: u64,
    /// When it was sent
    pub sent_at: Instant,
}

/// One client's signaling session
pub struct Session<T, M> {
    id: Uuid,
    config: SessionConfig,
    dispatcher: RpcDispatcher<T>,
    media: M,
    media_active: bool,
    registration: RegistrationStateMachine,
    call: CallStateMachine,
    pending: Option<PendingRequest>,
    events: mpsc::UnboundedSender<Event>,
}

impl<T, M> std::fmt::Debug for Session<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.config.identity)
            .field("registration", &self.registration.state())
            .field("call", &self.call.state())
            .field("pending", &self.pending)
            .finish()
    }
}

impl<T: SignalingTransport, M: MediaStack> Session<T, M> {
    /// Create a session over an open transport
    pub fn new(config: SessionConfig, transport: T, media: M) -> (Self, EventStream) {
        let (events, stream) = EventStream::channel();
        let call = CallStateMachine::new(config.max_buffered_candidates);
        let session = Self {
            id: Uuid::new_v4(),
            config,
            dispatcher: RpcDispatcher::new(transport),
            media,
            media_active: false,
            registration: RegistrationStateMachine::new(),
            call,
            pending: None,
            events,
        };
        (session, stream)
    }

    /// Session id used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Local identity
    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    /// Current registration state
    pub fn registration_state(&self) -> RegistrationState {
        self.registration.state()
    }

    /// Current call state
    pub fn call_state(&self) -> CallState {
        self.call.state()
    }

    /// Remote side of the current call
    pub fn call_peer(&self) -> Option<&CallPeer> {
        self.call.peer()
    }

    /// Local candidates waiting for the call to be confirmed
    pub fn buffered_candidates(&self) -> usize {
        self.call.candidates().len()
    }

    /// Request waiting for a result, if any
    pub fn pending_request(&self) -> Option<PendingRequest> {
        self.pending
    }

    /// When the pending request expires
    pub fn pending_deadline(&self) -> Option<Instant> {
        let timeout = self.config.request_timeout?;
        self.pending.map(|pending| pending.sent_at + timeout)
    }

    /// Whether the transport is still open
    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    /// Announce the session with a liveness probe before any other traffic
    pub async fn open(&mut self) -> Result<(), RtCallError> {
        info!(session_id = %self.id, "Opening signaling session for {}", self.config.identity);
        self.keep_alive().await
    }

    /// Send a `keepLive` probe
    pub async fn keep_alive(&mut self) -> Result<(), RtCallError> {
        self.dispatcher.keep_alive().await.map(|_| ())
    }

    /// NOT_REGISTERED → REGISTERING, sending `register`
    pub async fn request_register(&mut self, identity: &str) -> Result<(), RtCallError> {
        if identity.is_empty() {
            return Err(RtCallError::InvalidIdentity {
                field: "userId".to_string(),
            });
        }
        self.registration.request()?;
        self.config.identity = identity.to_string();
        self.emit(Event::RegistrationStateChanged {
            state: RegistrationState::Registering,
        });

        let params = RegisterParams {
            user_id: identity.to_string(),
        };
        let id = self.dispatcher.send(methods::REGISTER, &params).await?;
        self.track_pending(PendingKind::Register, id);
        info!("Registering as {}", identity);
        Ok(())
    }

    /// Apply the server's answer to `register`
    pub async fn on_register_result(
        &mut self,
        accepted: bool,
        reason: Option<String>,
    ) -> Result<(), RtCallError> {
        let state = self.registration.on_result(accepted)?;
        self.clear_pending(PendingKind::Register);

        if accepted {
            info!("Registered as {}", self.config.identity);
        } else {
            let reason =
                non_empty(reason).unwrap_or_else(|| DEFAULT_REGISTER_REJECTION.to_string());
            log_rejection(methods::REGISTER, &reason);
            self.emit(Event::RegistrationRejected { reason });
        }
        self.emit(Event::RegistrationStateChanged { state });
        self.abandon_call(CallEndReason::RegistrationChanged).await;
        Ok(())
    }

    /// NO_CALL → PROCESSING_CALL, then send `call` once the offer is ready
    pub async fn place_call(&mut self, callee_id: &str) -> Result<(), RtCallError> {
        if callee_id.is_empty() {
            return Err(RtCallError::InvalidIdentity {
                field: "calleeId".to_string(),
            });
        }
        if self.registration.state() != RegistrationState::Registered {
            return Err(invalid_state(
                "placeCall",
                "REGISTERED",
                self.registration.state(),
            ));
        }
        self.call.begin_outgoing(callee_id)?;
        self.emit(Event::CallStateChanged {
            state: CallState::ProcessingCall,
        });
        info!("Calling {}", callee_id);

        self.media_active = true;
        let sdp_offer = match self.media.generate_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail_call(e).await),
        };

        let params = CallParams {
            caller_id: self.config.identity.clone(),
            callee_id: callee_id.to_string(),
            has_audio: self.config.has_audio,
            has_video: self.config.has_video,
            sdp_offer,
        };
        let id = self.dispatcher.send(methods::CALL, &params).await?;
        self.track_pending(PendingKind::Call, id);
        Ok(())
    }

    /// Handle an inbound call: reply busy, or surface the decision point
    pub async fn on_incoming_call(
        &mut self,
        incoming: IncomingCallParams,
    ) -> Result<(), RtCallError> {
        if self.call.state() != CallState::NoCall {
            info!(
                "Busy ({}), rejecting incoming call from {}",
                self.call.state(),
                incoming.caller_id
            );
            let params = CallEventParams {
                caller_id: Some(incoming.caller_id.clone()),
                session_name: incoming.session_name,
                media: incoming.media,
                reason: Some(BUSY_REASON.to_string()),
                ..CallEventParams::new(CallEventKind::Busy)
            };
            self.dispatcher.send(methods::ON_CALL, &params).await?;
            self.emit(Event::BusyReplied {
                caller_id: incoming.caller_id,
            });
            return Ok(());
        }

        self.call.begin_incoming(
            &incoming.caller_id,
            incoming.session_name.clone(),
            incoming.media,
        )?;
        info!("Incoming call from {}", incoming.caller_id);
        self.emit(Event::CallStateChanged {
            state: CallState::ProcessingCall,
        });
        self.emit(Event::IncomingCall {
            caller_id: incoming.caller_id,
            session_name: incoming.session_name,
        });
        Ok(())
    }

    /// Resolve the pending incoming call
    pub async fn answer_incoming(&mut self, accept: bool) -> Result<(), RtCallError> {
        let caller = self.call.take_decision()?;

        if !accept {
            info!("Declining call from {}", caller.peer_id);
            let params = CallEventParams {
                caller_id: Some(caller.peer_id.clone()),
                reason: Some(DECLINE_REASON.to_string()),
                ..CallEventParams::new(CallEventKind::Reject)
            };
            self.dispatcher.send(methods::ON_CALL, &params).await?;
            self.finish_call(CallEndReason::Declined).await;
            return Ok(());
        }

        info!("Accepting call from {}", caller.peer_id);
        self.media_active = true;
        let sdp_offer = match self.media.generate_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                let params = CallEventParams {
                    caller_id: Some(caller.peer_id.clone()),
                    reason: Some(e.to_string()),
                    ..CallEventParams::new(CallEventKind::Reject)
                };
                if let Err(send_err) = self.dispatcher.send(methods::ON_CALL, &params).await {
                    warn!("Failed to tell {} about media failure: {}", caller.peer_id, send_err);
                }
                return Err(self.fail_call(e).await);
            }
        };

        let params = CallEventParams {
            caller_id: Some(caller.peer_id),
            session_name: caller.session_name,
            media: Some(
                caller
                    .media
                    .unwrap_or_else(|| DEFAULT_ACCEPT_MEDIA.into()),
            ),
            has_audio: Some(self.config.has_audio),
            has_video: Some(self.config.has_video),
            sdp_offer: Some(sdp_offer),
            ..CallEventParams::new(CallEventKind::Accept)
        };
        let id = self.dispatcher.send(methods::ON_CALL, &params).await?;
        self.track_pending(PendingKind::Call, id);
        Ok(())
    }

    /// `OK` result for the outgoing `call` request
    ///
    /// Without an SDP answer the server is only saying the callee was
    /// notified; the call stays in PROCESSING_CALL and the deadline restarts
    /// while the answer arrives as an `accept`/`connected` event.
    pub async fn on_call_acknowledged(
        &mut self,
        sdp_answer: Option<String>,
    ) -> Result<(), RtCallError> {
        if let Some(sdp_answer) = non_empty(sdp_answer) {
            return self.on_call_answer(Some(sdp_answer)).await;
        }
        self.require_answer_expected("onCallAcknowledged")?;

        if let Some(pending) = self.pending.filter(|p| p.kind == PendingKind::Call) {
            self.track_pending(PendingKind::Call, pending.id);
        }
        if let Some(peer) = self.call.peer() {
            info!("{} notified, waiting for answer", peer.peer_id);
        }
        Ok(())
    }

    /// PROCESSING_CALL → IN_CALL once the remote answer is applied
    ///
    /// Used for an `OK` call result carrying an answer and for
    /// `accept`/`connected` events. Buffered local candidates are flushed in
    /// discovery order.
    pub async fn on_call_answer(&mut self, sdp_answer: Option<String>) -> Result<(), RtCallError> {
        self.require_answer_expected("onCallAccepted")?;

        let Some(sdp_answer) = non_empty(sdp_answer) else {
            warn!("Call answer carried no SDP, abandoning call");
            let params = CallEventParams::new(CallEventKind::Hangup);
            if let Err(e) = self.dispatcher.send(methods::ON_CALL, &params).await {
                warn!("Failed to release peer after empty answer: {}", e);
            }
            self.finish_call(CallEndReason::Failed("missing SDP answer".to_string()))
                .await;
            return Ok(());
        };

        if let Err(e) = self.media.process_answer(&sdp_answer).await {
            return Err(self.fail_call(e).await);
        }

        let flushed = self.call.enter_in_call()?;
        self.clear_pending(PendingKind::Call);
        debug!("Flushing {} buffered ICE candidates", flushed.len());
        for candidate in flushed {
            self.send_candidate(candidate).await?;
        }

        self.emit(Event::CallStateChanged {
            state: CallState::InCall,
        });
        if let Some(peer) = self.call.peer() {
            info!("In call with {}", peer.peer_id);
            let event = Event::CallEstablished {
                peer_id: peer.peer_id.clone(),
                started_at: peer.started_at.unwrap_or_else(chrono::Utc::now),
            };
            self.emit(event);
        }
        Ok(())
    }

    /// PROCESSING_CALL → NO_CALL on a rejection from the peer or server
    pub async fn on_call_rejected(&mut self, reason: Option<String>) -> Result<(), RtCallError> {
        if self.call.state() != CallState::ProcessingCall {
            return Err(invalid_state(
                "onCallRejected",
                "PROCESSING_CALL",
                self.call.state(),
            ));
        }
        let reason = non_empty(reason).unwrap_or_else(|| DEFAULT_CALL_REJECTION.to_string());
        log_rejection(methods::CALL, &reason);
        self.finish_call(CallEndReason::Rejected(reason)).await;
        Ok(())
    }

    /// IN_CALL or PROCESSING_CALL → NO_CALL because the peer hung up
    pub async fn on_remote_hangup(&mut self) -> Result<(), RtCallError> {
        let peer = self.call.end("onRemoteHangup")?;
        info!("Peer hung up");
        self.release_call(peer, CallEndReason::RemoteHangup).await;
        Ok(())
    }

    /// IN_CALL or PROCESSING_CALL → NO_CALL, telling the peer
    ///
    /// An incoming call still waiting for a decision is declined instead.
    pub async fn hangup(&mut self) -> Result<(), RtCallError> {
        if self.call.is_awaiting_decision() {
            return self.answer_incoming(false).await;
        }
        let peer = self.call.end("hangup")?;
        info!("Hanging up");
        let send_result = self
            .dispatcher
            .send(methods::ON_CALL, &CallEventParams::new(CallEventKind::Hangup))
            .await;
        self.release_call(peer, CallEndReason::LocalHangup).await;
        send_result.map(|_| ())
    }

    /// Route a candidate discovered by the local media stack
    pub async fn add_local_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), RtCallError> {
        match self.call.offer_local_candidate(candidate) {
            CandidateDisposition::Send(candidate) => self.send_candidate(candidate).await,
            CandidateDisposition::Buffered => Ok(()),
            CandidateDisposition::Dropped => {
                debug!("Dropped local ICE candidate in {}", self.call.state());
                Ok(())
            }
        }
    }

    /// Hand a relayed remote candidate to the media stack
    pub async fn on_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), RtCallError> {
        if !self.call.state().is_active() {
            debug!("Ignoring remote ICE candidate with no call");
            return Ok(());
        }
        if let Err(e) = self.media.add_ice_candidate(&candidate).await {
            error!("Error adding candidate: {}", e);
            self.emit(Event::MediaError {
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Decode one text frame and route it
    pub async fn handle_message(&mut self, text: &str) -> Result<(), RtCallError> {
        let message = self.dispatcher.decode(text)?;
        debug!("Handling {} message", message.kind());

        match message {
            IncomingMessage::RegisterResult(result) => {
                self.on_register_result(result.is_accepted(), result.message)
                    .await
            }
            IncomingMessage::CallResult(result) => {
                if result.is_ok() {
                    self.on_call_acknowledged(result.sdp_answer).await
                } else {
                    self.on_call_rejected(Some(result.response)).await
                }
            }
            IncomingMessage::IncomingCall(incoming) => self.on_incoming_call(incoming).await,
            IncomingMessage::CallEvent(event) => match event {
                RemoteCallEvent::Accept { sdp_answer }
                | RemoteCallEvent::Connected { sdp_answer } => {
                    self.on_call_answer(sdp_answer).await
                }
                RemoteCallEvent::Reject { reason } => self.on_call_rejected(reason).await,
                RemoteCallEvent::Hangup => self.on_remote_hangup().await,
                RemoteCallEvent::Other(name) => {
                    debug!("Ignoring unrecognized call event '{}'", name);
                    Ok(())
                }
            },
            IncomingMessage::IceCandidate(candidate) => self.on_remote_candidate(candidate).await,
            IncomingMessage::Error(rpc_error) => {
                warn!(
                    "Server error {:?}: {}",
                    rpc_error.code,
                    rpc_error.message.as_deref().unwrap_or("no message")
                );
                Ok(())
            }
            IncomingMessage::Unrecognized { method } => {
                debug!("Ignoring unrecognized message {:?}", method);
                Ok(())
            }
        }
    }

    /// Expire the pending request if its deadline is at or before `now`
    ///
    /// Returns the timeout error when something expired.
    pub async fn expire_pending(&mut self, now: Instant) -> Option<RtCallError> {
        let (timeout, pending) = match (self.config.request_timeout, self.pending) {
            (Some(timeout), Some(pending)) if now >= pending.sent_at + timeout => {
                (timeout, pending)
            }
            _ => return None,
        };
        self.pending = None;
        warn!(
            "{} request {} got no response within {:?}",
            pending.kind.method(),
            pending.id,
            timeout
        );
        self.emit(Event::RequestTimedOut {
            operation: pending.kind.method().to_string(),
        });

        match pending.kind {
            PendingKind::Register => {
                if self.registration.expire() {
                    self.emit(Event::RegistrationStateChanged {
                        state: RegistrationState::NotRegistered,
                    });
                    self.abandon_call(CallEndReason::RegistrationChanged).await;
                }
            }
            PendingKind::Call => {
                if self.call.state() == CallState::ProcessingCall {
                    let params = CallEventParams::new(CallEventKind::Hangup);
                    if let Err(e) = self.dispatcher.send(methods::ON_CALL, &params).await {
                        warn!("Failed to cancel timed out call: {}", e);
                    }
                    self.finish_call(CallEndReason::TimedOut).await;
                }
            }
        }

        Some(RtCallError::Timeout {
            operation: pending.kind.method().to_string(),
            duration: timeout,
        })
    }

    /// Tear the session down and close the transport
    pub async fn close(&mut self, reason: &str) -> Result<(), RtCallError> {
        self.abandon_call(CallEndReason::SessionClosed).await;
        self.pending = None;
        if self.registration.state() != RegistrationState::NotRegistered {
            self.registration.reset();
            self.emit(Event::RegistrationStateChanged {
                state: RegistrationState::NotRegistered,
            });
        }
        self.emit(Event::Disconnected {
            reason: reason.to_string(),
        });
        info!(session_id = %self.id, "Signaling session closed: {}", reason);
        self.dispatcher.close().await
    }

    async fn send_candidate(&mut self, candidate: IceCandidate) -> Result<(), RtCallError> {
        let params = IceCandidateParams::new(candidate, self.config.identity.clone());
        self.dispatcher
            .send(methods::ON_ICE_CANDIDATE, &params)
            .await
            .map(|_| ())
    }

    /// Release media after a failure and hand the error back
    async fn fail_call(&mut self, error: RtCallError) -> RtCallError {
        error!("Media stack failure: {}", error);
        self.emit(Event::MediaError {
            reason: error.to_string(),
        });
        self.finish_call(CallEndReason::Failed(error.to_string()))
            .await;
        error
    }

    /// Return to NO_CALL if a call is pending or active
    async fn abandon_call(&mut self, reason: CallEndReason) {
        if self.call.state().is_active() {
            self.finish_call(reason).await;
        }
    }

    async fn finish_call(&mut self, reason: CallEndReason) {
        let peer = self.call.reset();
        self.release_call(peer, reason).await;
    }

    /// Side effects of leaving a call once the machine is back in NO_CALL
    async fn release_call(&mut self, peer: Option<CallPeer>, reason: CallEndReason) {
        self.clear_pending(PendingKind::Call);
        if self.media_active {
            self.media.dispose().await;
            self.media_active = false;
        }
        self.emit(Event::CallStateChanged {
            state: CallState::NoCall,
        });
        self.emit(Event::CallEnded {
            peer_id: peer.map(|peer| peer.peer_id),
            reason,
        });
    }

    fn require_answer_expected(&self, operation: &str) -> Result<(), RtCallError> {
        if self.call.state() != CallState::ProcessingCall || self.call.is_awaiting_decision() {
            return Err(invalid_state(operation, "PROCESSING_CALL", self.call.state()));
        }
        Ok(())
    }

    fn track_pending(&mut self, kind: PendingKind, id: u64) {
        self.pending = Some(PendingRequest {
            kind,
            id,
            sent_at: Instant::now(),
        });
    }

    fn clear_pending(&mut self, kind: PendingKind) {
        if self.pending.map(|pending| pending.kind) == Some(kind) {
            self.pending = None;
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("Event stream closed, dropping event");
        }
    }
}

fn log_rejection(operation: &str, reason: &str) {
    let rejection = RtCallError::RemoteRejection {
        operation: operation.to_string(),
        reason: reason.to_string(),
    };
    warn!(code = %rejection.error_code(), "{}", rejection);
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}
