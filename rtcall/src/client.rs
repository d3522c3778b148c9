//! Client builder and driver
//!
//! [`ClientBuilder::connect`] opens the WebSocket, announces the session and
//! spawns a driver task that owns the [`Session`]. The driver handles one
//! thing at a time: a command from [`CallClient`], an incoming frame, a
//! keep-alive tick, or the pending request deadline. It closes the transport
//! on every exit path.

use crate::config::{ClientConfig, GlobalConfig};
use rtcall_core::{Connection, ConnectionReceiver, ConnectionSender, RtCallError};
use rtcall_signaling::{
    CallState, EventStream, IceCandidate, MediaStack, PendingKind, RegistrationState, Session,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const COMMAND_QUEUE_DEPTH: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, RtCallError>>;
type ClientSession<M> = Session<ConnectionSender, M>;

/// Fluent builder for client configuration and connection
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub(crate) fn new(global: &GlobalConfig, identity: &str) -> Self {
        Self::from_config(ClientConfig {
            server_url: global.default_signaling_url.clone(),
            identity: identity.to_string(),
            ..ClientConfig::default()
        })
    }

    /// Start from a full configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Set signaling server URL
    pub fn signaling_server(mut self, url: &str) -> Self {
        self.config.server_url = Some(url.to_string());
        self
    }

    /// Offer audio on calls
    pub fn audio(mut self, enabled: bool) -> Self {
        self.config.has_audio = enabled;
        self
    }

    /// Offer video on calls
    pub fn video(mut self, enabled: bool) -> Self {
        self.config.has_video = enabled;
        self
    }

    /// Period of `keepLive` probes; `None` disables them
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Deadline for `register` and `call`; `None` waits forever
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Cap on buffered local ICE candidates
    pub fn max_buffered_candidates(mut self, max: usize) -> Self {
        self.config.max_buffered_candidates = max;
        self
    }

    /// WebSocket handshake timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect, announce the session, and start the driver
    pub async fn connect<M>(self, media: M) -> Result<CallClient, RtCallError>
    where
        M: MediaStack + 'static,
    {
        let config = self.config;
        let server_url = config
            .server_url
            .clone()
            .ok_or_else(|| RtCallError::Initialization {
                reason: "signaling server URL is not configured".to_string(),
            })?;

        let connection =
            Connection::connect(&server_url, &config.identity, &config.connection_config())
                .await?;
        let (sender, receiver) = connection.split();
        let (mut session, events) = Session::new(config.session_config(), sender, media);

        if let Err(e) = session.open().await {
            let _ = session.close("liveness probe failed").await;
            return Err(e);
        }

        let session_id = session.id();
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let span = info_span!("call_client", session_id = %session_id, identity = %config.identity);
        let task = tokio::spawn(
            drive(session, receiver, command_rx, config.keep_alive_interval).instrument(span),
        );

        Ok(CallClient {
            id: session_id,
            identity: config.identity,
            commands,
            task,
            events: Some(events),
        })
    }
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    /// Registration state
    pub registration: RegistrationState,
    /// Call state
    pub call: CallState,
    /// Remote side of the current call
    pub peer_id: Option<String>,
    /// Request waiting for a result
    pub pending: Option<PendingKind>,
    /// Local candidates held until the call is confirmed
    pub buffered_candidates: usize,
    /// Whether the transport is open
    pub connected: bool,
}

impl ClientStatus {
    fn of<M: MediaStack>(session: &ClientSession<M>) -> Self {
        Self {
            registration: session.registration_state(),
            call: session.call_state(),
            peer_id: session.call_peer().map(|peer| peer.peer_id.clone()),
            pending: session.pending_request().map(|pending| pending.kind),
            buffered_candidates: session.buffered_candidates(),
            connected: session.is_connected(),
        }
    }
}

enum Command {
    Register {
        identity: String,
        reply: Reply<()>,
    },
    PlaceCall {
        callee_id: String,
        reply: Reply<()>,
    },
    Answer {
        accept: bool,
        reply: Reply<()>,
    },
    Hangup {
        reply: Reply<()>,
    },
    LocalCandidate {
        candidate: IceCandidate,
        reply: Reply<()>,
    },
    Status {
        reply: Reply<ClientStatus>,
    },
}

/// Handle to a running signaling client
///
/// Dropping the handle stops the driver and closes the transport.
#[derive(Debug)]
pub struct CallClient {
    id: Uuid,
    identity: String,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<Result<(), RtCallError>>,
    events: Option<EventStream>,
}

impl CallClient {
    /// Session id used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Local identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Take the event stream; `None` after the first call
    pub fn events(&mut self) -> Option<EventStream> {
        self.events.take()
    }

    /// Register the connection's identity
    pub async fn register(&self) -> Result<(), RtCallError> {
        let identity = self.identity.clone();
        self.request(|reply| Command::Register { identity, reply })
            .await
    }

    /// Call `callee_id`
    pub async fn place_call(&self, callee_id: &str) -> Result<(), RtCallError> {
        let callee_id = callee_id.to_string();
        self.request(|reply| Command::PlaceCall { callee_id, reply })
            .await
    }

    /// Accept the pending incoming call
    pub async fn accept(&self) -> Result<(), RtCallError> {
        self.request(|reply| Command::Answer {
            accept: true,
            reply,
        })
        .await
    }

    /// Decline the pending incoming call
    pub async fn decline(&self) -> Result<(), RtCallError> {
        self.request(|reply| Command::Answer {
            accept: false,
            reply,
        })
        .await
    }

    /// End the current call
    pub async fn hangup(&self) -> Result<(), RtCallError> {
        self.request(|reply| Command::Hangup { reply }).await
    }

    /// Forward a candidate discovered by the local media stack
    pub async fn add_local_candidate(&self, candidate: IceCandidate) -> Result<(), RtCallError> {
        self.request(|reply| Command::LocalCandidate { candidate, reply })
            .await
    }

    /// Snapshot of the session state
    pub async fn status(&self) -> Result<ClientStatus, RtCallError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Whether the driver is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the driver and wait for the transport to close
    pub async fn close(self) -> Result<(), RtCallError> {
        let CallClient { commands, task, .. } = self;
        drop(commands);
        task.await.map_err(|e| RtCallError::Transport {
            reason: format!("client driver failed: {}", e),
        })?
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RtCallError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| RtCallError::ClientClosed)?;
        response.await.map_err(|_| RtCallError::ClientClosed)?
    }
}

async fn drive<M: MediaStack>(
    mut session: ClientSession<M>,
    mut receiver: ConnectionReceiver,
    mut commands: mpsc::Receiver<Command>,
    keep_alive: Option<Duration>,
) -> Result<(), RtCallError> {
    info!("Client driver started");
    let mut keep_alive = keep_alive.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let reason = loop {
        let deadline = session.pending_deadline();

        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    handle_command(&mut session, command).await;
                    if !session.is_connected() {
                        error!("Signaling transport closed while handling a command");
                        break "transport closed".to_string();
                    }
                }
                None => break "client closed".to_string(),
            },
            frame = receiver.recv() => match frame {
                Ok(Some(text)) => {
                    if let Err(e) = session.handle_message(&text).await {
                        if e.is_fatal_transport() {
                            error!("Transport failed while handling message: {}", e);
                            break e.to_string();
                        }
                        warn!(code = %e.error_code(), "Failed to handle message: {}", e);
                    }
                }
                Ok(None) => break "server closed the connection".to_string(),
                Err(e) => {
                    error!("Signaling transport failed: {}", e);
                    break e.to_string();
                }
            },
            _ = tick(&mut keep_alive) => {
                if let Err(e) = session.keep_alive().await {
                    error!("Keep-alive failed: {}", e);
                    break e.to_string();
                }
            },
            _ = wait_until(deadline) => {
                if let Some(e) = session.expire_pending(Instant::now()).await {
                    warn!(code = %e.error_code(), "{}", e);
                }
            },
        }
    };

    session.close(&reason).await
}

async fn handle_command<M: MediaStack>(session: &mut ClientSession<M>, command: Command) {
    match command {
        Command::Register { identity, reply } => {
            let _ = reply.send(session.request_register(&identity).await);
        }
        Command::PlaceCall { callee_id, reply } => {
            let _ = reply.send(session.place_call(&callee_id).await);
        }
        Command::Answer { accept, reply } => {
            let _ = reply.send(session.answer_incoming(accept).await);
        }
        Command::Hangup { reply } => {
            let _ = reply.send(session.hangup().await);
        }
        Command::LocalCandidate { candidate, reply } => {
            let _ = reply.send(session.add_local_candidate(candidate).await);
        }
        Command::Status { reply } => {
            let _ = reply.send(Ok(ClientStatus::of(session)));
        }
    }
    debug!(
        registration = %session.registration_state(),
        call = %session.call_state(),
        "Command handled"
    );
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
