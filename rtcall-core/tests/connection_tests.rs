//! Integration tests for the signaling connection manager
//!
//! Each test binds an in-process WebSocket server on an ephemeral port and
//! drives a real [`Connection`] against it.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use rtcall_core::{Connection, ConnectionConfig, RtCallError, SignalingTransport};

/// Accept one connection, report the request URI, echo text frames back
async fn start_echo_server() -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();

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

        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) if text == "close-me" => {
                    let _ = ws.close(None).await;
                    break;
                }
                Message::Text(text) => {
                    if ws.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    (addr, uri_rx)
}

fn server_url(addr: SocketAddr) -> String {
    format!("ws://127.0.0.1:{}/call", addr.port())
}

#[tokio::test]
async fn test_connect_sends_identity_and_echoes() {
    let (addr, uri_rx) = start_echo_server().await;

    let connection = Connection::connect(&server_url(addr), "alice", &ConnectionConfig::default())
        .await
        .unwrap();
    assert_eq!(connection.url().query(), Some("clientId=alice"));

    let uri = timeout(Duration::from_secs(5), uri_rx).await.unwrap().unwrap();
    assert_eq!(uri, "/call?clientId=alice");

    let (mut sender, mut receiver) = connection.split();
    assert!(sender.is_connected());

    sender.send_text("{\"hello\":1}".to_string()).await.unwrap();
    let echoed = timeout(Duration::from_secs(5), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed.as_deref(), Some("{\"hello\":1}"));

    sender.close().await.unwrap();
}

#[tokio::test]
async fn test_send_after_close_fails() {
    let (addr, _uri_rx) = start_echo_server().await;

    let connection = Connection::connect(&server_url(addr), "bob", &ConnectionConfig::default())
        .await
        .unwrap();
    let (mut sender, _receiver) = connection.split();

    sender.close().await.unwrap();
    assert!(!sender.is_connected());

    // Closing again is a no-op
    tokio_test::assert_ok!(sender.close().await);

    let result = sender.send_text("late".to_string()).await;
    assert!(matches!(result, Err(RtCallError::TransportClosed)));
}

#[tokio::test]
async fn test_remote_close_marks_transport_closed() {
    let (addr, _uri_rx) = start_echo_server().await;

    let connection = Connection::connect(&server_url(addr), "carol", &ConnectionConfig::default())
        .await
        .unwrap();
    let (mut sender, mut receiver) = connection.split();

    sender.send_text("close-me".to_string()).await.unwrap();

    let next = timeout(Duration::from_secs(5), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(next.is_none());
    assert!(!receiver.is_connected());
    assert!(!sender.is_connected());

    let result = sender.send_text("after close".to_string()).await;
    assert!(matches!(result, Err(RtCallError::TransportClosed)));
}

#[tokio::test]
async fn test_connect_failure_is_connection_error() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ConnectionConfig {
        timeout: Duration::from_secs(2),
    };
    let result = Connection::connect(&server_url(addr), "dave", &config).await;

    match result {
        Err(err) => {
            assert_eq!(err.error_code(), "CONNECTION_FAILED");
            assert!(err.is_fatal_transport());
        }
        Ok(_) => panic!("connect to a closed port should fail"),
    }
}

#[tokio::test]
async fn test_connect_rejects_empty_identity() {
    let result =
        Connection::connect("ws://127.0.0.1:1/call", "", &ConnectionConfig::default()).await;
    assert!(matches!(result, Err(RtCallError::InvalidIdentity { .. })));
}
