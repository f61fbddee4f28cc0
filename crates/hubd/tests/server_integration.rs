//! Integration tests for the device WebSocket server.
//!
//! Runs DeviceServer on a loopback port and drives it with a real WebSocket
//! client: connect, hello, rename over the socket, routed intents,
//! server-side disconnect and graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use hub_core::{DeviceId, Target};
use hub_protocol::ServerMessage;
use hubd::registry::{spawn_registry, RegistryHandle};
use hubd::router::ControlRouter;
use hubd::server::{DeviceServer, ServerError};

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for a frame or a registry change
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between registry polls
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Running server plus the handles the tests drive it with.
struct TestServer {
    addr: SocketAddr,
    registry: RegistryHandle,
    router: ControlRouter,
    cancel_token: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let addr = listener.local_addr().unwrap();

        let registry = spawn_registry();
        let cancel_token = CancellationToken::new();
        let server = DeviceServer::new(addr, registry.clone(), cancel_token.clone());
        let task = tokio::spawn(server.serve(listener));

        Self {
            addr,
            router: ControlRouter::new(registry.clone()),
            registry,
            cancel_token,
            task,
        }
    }

    async fn connect(&self, device_id: Option<&str>) -> Client {
        let url = match device_id {
            Some(id) => format!("ws://{}/?device_id={id}", self.addr),
            None => format!("ws://{}/", self.addr),
        };
        let (client, _response) = timeout(WAIT_TIMEOUT, connect_async(url))
            .await
            .expect("connect timed out")
            .expect("WebSocket handshake");
        client
    }

    /// Polls the registry until its device list equals `expected`.
    async fn wait_for_devices(&self, expected: &[&str]) {
        let expected: Vec<DeviceId> = expected.iter().map(|id| DeviceId::new(*id)).collect();
        let start = tokio::time::Instant::now();
        loop {
            let ids = self.registry.list().await;
            if ids == expected {
                return;
            }
            assert!(
                start.elapsed() < WAIT_TIMEOUT,
                "registry never reached {expected:?}, last saw {ids:?}"
            );
            sleep(POLL_INTERVAL).await;
        }
    }
}

/// Next frame, skipping pings and pongs. `None` once the stream ends.
async fn next_frame(client: &mut Client) -> Option<Message> {
    loop {
        let frame = timeout(WAIT_TIMEOUT, client.next())
            .await
            .expect("frame timed out")?;
        match frame {
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(message) => return Some(message),
            Err(_) => return None,
        }
    }
}

async fn next_json(client: &mut Client) -> Value {
    match next_frame(client).await {
        Some(Message::Text(text)) => serde_json::from_str(&text).expect("frame should be JSON"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_connect_with_device_id_gets_hello() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(Some("kitchen")).await;

    let hello = next_json(&mut client).await;
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["device_id"], "kitchen");

    server.wait_for_devices(&["kitchen"]).await;

    let sessions = server.registry.sessions().await;
    let remote = sessions[0].remote_addr.expect("remote address recorded");
    assert!(remote.ip().is_loopback());
}

#[tokio::test]
async fn test_connect_without_id_gets_anonymous_id() {
    let server = TestServer::spawn().await;
    let mut first = server.connect(None).await;
    assert_eq!(next_json(&mut first).await["device_id"], "anon-1");

    let mut second = server.connect(None).await;
    assert_eq!(next_json(&mut second).await["device_id"], "anon-2");
    server.wait_for_devices(&["anon-1", "anon-2"]).await;
}

#[tokio::test]
async fn test_register_renames_over_socket() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(None).await;
    assert_eq!(next_json(&mut client).await["device_id"], "anon-1");

    client
        .send(Message::Text(
            r#"{"type":"register","device_id":"kitchen-speaker"}"#.to_string(),
        ))
        .await
        .unwrap();
    server.wait_for_devices(&["kitchen-speaker"]).await;

    // Intents now reach the socket under the new id.
    server
        .router
        .deliver(&Target::device("kitchen-speaker"), &ServerMessage::status_req())
        .await
        .expect("delivery to renamed device");
    assert_eq!(next_json(&mut client).await["type"], "status_req");
}

#[tokio::test]
async fn test_garbage_frames_keep_connection_open() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(Some("hall")).await;
    next_json(&mut client).await;

    client.send(Message::Text("not json".to_string())).await.unwrap();
    client
        .send(Message::Text(r#"{"type":"status","volume":3}"#.to_string()))
        .await
        .unwrap();

    server
        .router
        .deliver(&Target::device("hall"), &ServerMessage::file_stop())
        .await
        .expect("device still connected");
    assert_eq!(next_json(&mut client).await["type"], "file_stop");
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_client_close_unregisters() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(Some("porch")).await;
    next_json(&mut client).await;
    server.wait_for_devices(&["porch"]).await;

    client.close(None).await.unwrap();
    server.wait_for_devices(&[]).await;
}

#[tokio::test]
async fn test_disconnect_sends_close_frame() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(Some("porch")).await;
    next_json(&mut client).await;
    server.wait_for_devices(&["porch"]).await;

    let report = server.router.disconnect(&Target::device("porch")).await.unwrap();
    assert_eq!(report.delivered, vec![DeviceId::new("porch")]);

    match next_frame(&mut client).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("expected close, got {other:?}"),
    }
    server.wait_for_devices(&[]).await;
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_server() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(Some("porch")).await;
    next_json(&mut client).await;

    server.cancel_token.cancel();

    match next_frame(&mut client).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("expected close, got {other:?}"),
    }

    let result = timeout(WAIT_TIMEOUT, server.task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}
