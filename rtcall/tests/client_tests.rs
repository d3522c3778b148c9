//! End-to-end tests for the call client
//!
//! A scripted signaling server runs in-process on an ephemeral port. It
//! answers `register` on its own, forwards every frame it receives to the
//! test, and pushes whatever the test queues to the client.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use rtcall::{
    CallEndReason, CallState, Event, EventStream, GlobalConfig, IceCandidate, MediaStack,
    RegistrationState, RtCall, RtCallError,
};

const WAIT: Duration = Duration::from_secs(5);
const CLOSE: &str = "__close__";

struct MockServer {
    url: String,
    uri: oneshot::Receiver<String>,
    frames: mpsc::UnboundedReceiver<Value>,
    push: mpsc::UnboundedSender<String>,
}

impl MockServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (uri_tx, uri) = oneshot::channel();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback =
                move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    let _ = uri_tx.send(request.uri().to_string());
                    Ok(response)
                };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();

            loop {
                tokio::select! {
                    message = ws.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let frame: Value = serde_json::from_str(&text).unwrap();
                            if frame["method"] == "register" {
                                let reply = json!({"result": {"method": "register", "type": "accepted"}});
                                let _ = ws.send(Message::Text(reply.to_string())).await;
                            }
                            let _ = frames_tx.send(frame);
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    },
                    pushed = push_rx.recv() => match pushed {
                        Some(text) if text == CLOSE => {
                            let _ = ws.close(None).await;
                            break;
                        }
                        Some(text) => {
                            let _ = ws.send(Message::Text(text)).await;
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            url: format!("ws://127.0.0.1:{}/call", addr.port()),
            uri,
            frames,
            push,
        }
    }

    fn send(&self, message: Value) {
        self.push.send(message.to_string()).unwrap();
    }

    /// Next frame the client sent with `method`, skipping others
    async fn expect(&mut self, method: &str) -> Value {
        timeout(WAIT, async {
            loop {
                let frame = self.frames.recv().await.expect("server stopped");
                if frame["method"] == method {
                    return frame;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {} frame", method))
    }

    /// Every frame received so far
    fn received(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[derive(Clone, Default)]
struct RecordingMedia {
    answers: Arc<Mutex<Vec<String>>>,
    disposed: Arc<Mutex<usize>>,
}

#[async_trait]
impl MediaStack for RecordingMedia {
    async fn generate_offer(&mut self) -> Result<String, RtCallError> {
        Ok("v=0 local offer".to_string())
    }

    async fn process_answer(&mut self, sdp_answer: &str) -> Result<(), RtCallError> {
        self.answers.lock().push(sdp_answer.to_string());
        Ok(())
    }

    async fn add_ice_candidate(&mut self, _candidate: &IceCandidate) -> Result<(), RtCallError> {
        Ok(())
    }

    async fn dispose(&mut self) {
        *self.disposed.lock() += 1;
    }
}

async fn wait_for(events: &mut EventStream, matches: impl Fn(&Event) -> bool) -> Event {
    timeout(WAIT, async {
        loop {
            let event = events.next().await.expect("event stream ended");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received")
}

fn quiet() -> RtCall {
    RtCall::init_with(GlobalConfig::default()).unwrap()
}

#[tokio::test]
async fn test_register_and_call_end_to_end() {
    let mut server = MockServer::start().await;
    let media = RecordingMedia::default();
    let mut client = quiet()
        .client("alice")
        .signaling_server(&server.url)
        .keep_alive(None)
        .connect(media.clone())
        .await
        .unwrap();
    let mut events = client.events().unwrap();
    assert!(client.events().is_none());

    let uri = timeout(WAIT, &mut server.uri).await.unwrap().unwrap();
    assert_eq!(uri, "/call?clientId=alice");

    // Liveness probe goes out first, without params
    let probe = server.expect("keepLive").await;
    assert_eq!(probe, json!({"id": 0, "method": "keepLive", "jsonrpc": "2.0"}));

    client.register().await.unwrap();
    let register = server.expect("register").await;
    assert_eq!(register["id"], 1);
    assert_eq!(register["params"], json!({"userId": "alice"}));
    wait_for(&mut events, |event| {
        matches!(
            event,
            Event::RegistrationStateChanged {
                state: RegistrationState::Registered
            }
        )
    })
    .await;

    client.place_call("bob").await.unwrap();
    let call = server.expect("call").await;
    assert_eq!(call["params"]["calleeId"], "bob");
    assert_eq!(call["params"]["sdpOffer"], "v=0 local offer");

    for name in ["A", "B", "C"] {
        client
            .add_local_candidate(IceCandidate::new(format!("candidate:{}", name), "0", 0))
            .await
            .unwrap();
    }
    let status = client.status().await.unwrap();
    assert_eq!(status.call, CallState::ProcessingCall);
    assert_eq!(status.buffered_candidates, 3);

    server.send(json!({"result": {"method": "call", "response": "OK", "sdpAnswer": "v=0 remote answer"}}));
    wait_for(&mut events, |event| matches!(event, Event::CallEstablished { .. })).await;

    for name in ["A", "B", "C"] {
        let frame = server.expect("onIceCandidate").await;
        assert_eq!(frame["params"]["candidate"], format!("candidate:{}", name));
        assert_eq!(frame["params"]["endpointName"], "alice");
    }
    assert_eq!(media.answers.lock().clone(), vec!["v=0 remote answer"]);

    client.hangup().await.unwrap();
    let hangup = server.expect("onCall").await;
    assert_eq!(hangup["params"], json!({"event": "hangup"}));
    assert!(matches!(
        client.hangup().await,
        Err(RtCallError::InvalidState { .. })
    ));

    let status = client.status().await.unwrap();
    assert_eq!(status.call, CallState::NoCall);
    assert_eq!(status.registration, RegistrationState::Registered);
    assert_eq!(*media.disposed.lock(), 1);

    tokio_test::assert_ok!(client.close().await);
}

#[tokio::test]
async fn test_call_answered_after_ok_result() {
    let mut server = MockServer::start().await;
    let media = RecordingMedia::default();
    let mut client = quiet()
        .client("alice")
        .signaling_server(&server.url)
        .keep_alive(None)
        .connect(media.clone())
        .await
        .unwrap();
    let mut events = client.events().unwrap();

    client.register().await.unwrap();
    wait_for(&mut events, |event| {
        matches!(
            event,
            Event::RegistrationStateChanged {
                state: RegistrationState::Registered
            }
        )
    })
    .await;

    client.place_call("bob").await.unwrap();
    server.expect("call").await;
    client
        .add_local_candidate(IceCandidate::new("candidate:A", "0", 0))
        .await
        .unwrap();

    // The server only confirms the callee was notified
    server.send(json!({"result": {"method": "call", "response": "OK"}}));
    for name in ["B", "C"] {
        client
            .add_local_candidate(IceCandidate::new(format!("candidate:{}", name), "0", 0))
            .await
            .unwrap();
    }
    let status = client.status().await.unwrap();
    assert_eq!(status.call, CallState::ProcessingCall);
    assert_eq!(status.buffered_candidates, 3);

    server.send(json!({"method": "onCall", "params": {"event": "accept", "sdpAnswer": "v=0 remote answer"}}));
    wait_for(&mut events, |event| matches!(event, Event::CallEstablished { peer_id, .. } if peer_id == "bob")).await;

    for name in ["A", "B", "C"] {
        let frame = server.expect("onIceCandidate").await;
        assert_eq!(frame["params"]["candidate"], format!("candidate:{}", name));
    }
    assert_eq!(media.answers.lock().clone(), vec!["v=0 remote answer"]);
    assert!(server
        .received()
        .iter()
        .all(|frame| frame["method"] != "onCall"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_incoming_call_busy_and_accept() {
    let mut server = MockServer::start().await;
    let mut client = quiet()
        .client("alice")
        .signaling_server(&server.url)
        .keep_alive(None)
        .connect(RecordingMedia::default())
        .await
        .unwrap();
    let mut events = client.events().unwrap();
    client.register().await.unwrap();
    server.expect("register").await;

    server.send(json!({
        "method": "incomingCall",
        "params": {"callerId": "carol", "sessionName": "s1", "media": "all"}
    }));
    wait_for(&mut events, |event| {
        matches!(event, Event::IncomingCall { caller_id, .. } if caller_id == "carol")
    })
    .await;

    // A second caller gets a busy reply while carol is ringing
    server.send(json!({
        "method": "incomingCall",
        "params": {"callerId": "dave", "sessionName": "s2"}
    }));
    let busy = server.expect("onCall").await;
    assert_eq!(busy["params"]["event"], "busy");
    assert_eq!(busy["params"]["callerId"], "dave");

    client.accept().await.unwrap();
    let accept = server.expect("onCall").await;
    assert_eq!(accept["params"]["event"], "accept");
    assert_eq!(accept["params"]["callerId"], "carol");
    assert_eq!(accept["params"]["sdpOffer"], "v=0 local offer");

    server.send(json!({"method": "onCall", "params": {"event": "connected", "sdpAnswer": "v=0 answer"}}));
    wait_for(&mut events, |event| {
        matches!(event, Event::CallEstablished { peer_id, .. } if peer_id == "carol")
    })
    .await;

    server.send(json!({"method": "onCall", "params": {"event": "hangup"}}));
    wait_for(&mut events, |event| {
        matches!(
            event,
            Event::CallEnded {
                reason: CallEndReason::RemoteHangup,
                ..
            }
        )
    })
    .await;

    // The remote hangup is not echoed back
    let echoed = server
        .received()
        .into_iter()
        .filter(|frame| frame["method"] == "onCall")
        .count();
    assert_eq!(echoed, 0);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_decline_incoming_call() {
    let mut server = MockServer::start().await;
    let mut client = quiet()
        .client("alice")
        .signaling_server(&server.url)
        .keep_alive(None)
        .connect(RecordingMedia::default())
        .await
        .unwrap();
    let mut events = client.events().unwrap();

    server.send(json!({"method": "incomingCall", "params": {"callerId": "carol"}}));
    wait_for(&mut events, |event| matches!(event, Event::IncomingCall { .. })).await;

    client.decline().await.unwrap();
    let reject = server.expect("onCall").await;
    assert_eq!(reject["params"]["event"], "reject");
    assert_eq!(client.status().await.unwrap().call, CallState::NoCall);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_periodic_keep_alive() {
    let mut server = MockServer::start().await;
    let client = quiet()
        .client("alice")
        .signaling_server(&server.url)
        .keep_alive(Some(Duration::from_millis(50)))
        .connect(RecordingMedia::default())
        .await
        .unwrap();

    let ids: Vec<Value> = [
        server.expect("keepLive").await,
        server.expect("keepLive").await,
        server.expect("keepLive").await,
    ]
    .iter()
    .map(|frame| frame["id"].clone())
    .collect();
    assert_eq!(ids, vec![json!(0), json!(1), json!(2)]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let mut server = MockServer::start().await;
    let mut client = quiet()
        .client("alice")
        .signaling_server(&server.url)
        .keep_alive(None)
        .request_timeout(Some(Duration::from_millis(100)))
        .connect(RecordingMedia::default())
        .await
        .unwrap();
    let mut events = client.events().unwrap();
    client.register().await.unwrap();
    server.expect("register").await;
    wait_for(&mut events, |event| {
        matches!(
            event,
            Event::RegistrationStateChanged {
                state: RegistrationState::Registered
            }
        )
    })
    .await;

    client.place_call("bob").await.unwrap();
    server.expect("call").await;

    wait_for(&mut events, |event| {
        matches!(event, Event::RequestTimedOut { operation } if operation == "call")
    })
    .await;
    let cancel = server.expect("onCall").await;
    assert_eq!(cancel["params"]["event"], "hangup");
    assert_eq!(client.status().await.unwrap().call, CallState::NoCall);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_server_close_stops_client() {
    let server = MockServer::start().await;
    let mut client = quiet()
        .client("alice")
        .signaling_server(&server.url)
        .keep_alive(None)
        .connect(RecordingMedia::default())
        .await
        .unwrap();
    let mut events = client.events().unwrap();

    server.push.send(CLOSE.to_string()).unwrap();
    wait_for(&mut events, |event| matches!(event, Event::Disconnected { .. })).await;

    timeout(WAIT, async {
        while client.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(matches!(
        client.place_call("bob").await,
        Err(RtCallError::ClientClosed)
    ));
    assert!(client.close().await.is_ok());
}

#[tokio::test]
async fn test_close_closes_transport() {
    let mut server = MockServer::start().await;
    let mut client = quiet()
        .client("alice")
        .signaling_server(&server.url)
        .keep_alive(None)
        .connect(RecordingMedia::default())
        .await
        .unwrap();
    let mut events = client.events().unwrap();
    server.expect("keepLive").await;

    client.close().await.unwrap();

    // Server side sees the stream end
    let end = timeout(WAIT, server.frames.recv()).await.unwrap();
    assert!(end.is_none());

    let remaining = events.drain();
    assert!(matches!(remaining.last(), Some(Event::Disconnected { .. })));
}

#[tokio::test]
async fn test_connect_failures() {
    let missing_url = quiet().client("alice").connect(RecordingMedia::default()).await;
    assert!(matches!(
        missing_url,
        Err(RtCallError::Initialization { .. })
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let refused = quiet()
        .client("alice")
        .signaling_server(&format!("ws://127.0.0.1:{}/call", port))
        .connect(RecordingMedia::default())
        .await;
    assert_eq!(refused.unwrap_err().error_code(), "CONNECTION_FAILED");

    let empty_identity = quiet()
        .client("")
        .signaling_server("ws://127.0.0.1:1/call")
        .connect(RecordingMedia::default())
        .await;
    assert!(matches!(
        empty_identity,
        Err(RtCallError::InvalidIdentity { .. })
    ));
}
