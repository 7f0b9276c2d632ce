//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use eqnotify_auth::{Identity, JwtVerifier, issue_token};
use eqnotify_server::websocket::protocol::now_millis;
use eqnotify_server::{NotifyServer, OutboundMessage, ServerConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const SECRET: &[u8] = b"integration-secret";
const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a test server and return the WS URL + server.
async fn boot_server(config: ServerConfig) -> (String, Arc<NotifyServer>) {
    let server = Arc::new(NotifyServer::new(config, Arc::new(JwtVerifier::new(SECRET))));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn boot_default() -> (String, Arc<NotifyServer>) {
    boot_server(ServerConfig::default()).await
}

fn token(user_id: &str, username: &str, role: &str) -> String {
    issue_token(
        SECRET,
        &Identity::new(user_id, username, role),
        Duration::from_secs(3600),
    )
    .unwrap()
}

/// Connect and consume the `connection` acknowledgment.
async fn connect(url: &str) -> WsStream {
    let (mut ws, _) = connect_async(url).await.unwrap();
    let ack = read_json(&mut ws).await;
    assert_eq!(ack["type"], "connection");
    ws
}

/// Connect and authenticate.
async fn connect_as(url: &str, user_id: &str, username: &str, role: &str) -> WsStream {
    let mut ws = connect(url).await;
    send_json(&mut ws, json!({"type": "auth", "token": token(user_id, username, role)})).await;
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["status"], "success", "auth failed: {reply}");
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert nothing arrives for a short while.
async fn assert_silent(ws: &mut WsStream) {
    let got = timeout(QUIET, ws.next()).await;
    assert!(got.is_err(), "expected no message, got {got:?}");
}

async fn wait_for_len(server: &NotifyServer, expected: usize) {
    timeout(TIMEOUT, async {
        while server.registry().len() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached expected size");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_connection_ack_is_first_frame() {
    let (url, server) = boot_default().await;
    let (mut ws, _) = connect_async(&url).await.unwrap();

    let ack = read_json(&mut ws).await;
    assert_eq!(ack["type"], "connection");
    assert_eq!(ack["status"], "connected");
    assert!(ack["message"].is_string());
    assert_silent(&mut ws).await;
    assert_eq!(server.registry().len(), 1);
}

#[tokio::test]
async fn e2e_ping_pong() {
    let (url, _server) = boot_default().await;
    let mut ws = connect(&url).await;

    let before = now_millis();
    send_json(&mut ws, json!({"type": "ping"})).await;
    let pong = read_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["timestamp"].as_i64().unwrap() >= before);
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn e2e_auth_success_and_failure() {
    let (url, server) = boot_default().await;

    let mut bad = connect(&url).await;
    send_json(&mut bad, json!({"type": "auth", "token": "not-a-jwt"})).await;
    let reply = read_json(&mut bad).await;
    assert_eq!(reply["type"], "auth");
    assert_eq!(reply["status"], "error");
    assert!(reply["message"].is_string());
    assert_eq!(server.registry().authenticated_count(), 0);

    // Still usable after a failed auth.
    send_json(&mut bad, json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut bad).await["type"], "pong");

    let mut good = connect(&url).await;
    send_json(&mut good, json!({"type": "auth", "token": token("42", "alice", "ADMIN")})).await;
    let reply = read_json(&mut good).await;
    assert_eq!(reply["status"], "success");
    assert_eq!(
        reply["user"],
        json!({"userId": "42", "username": "alice", "role": "ADMIN"})
    );
    assert_eq!(server.registry().authenticated_count(), 1);
}

#[tokio::test]
async fn e2e_wrong_secret_is_not_targetable() {
    let (url, server) = boot_default().await;
    let mut ws = connect(&url).await;
    let forged = issue_token(
        b"some-other-secret",
        &Identity::new("9", "mallory", "ADMIN"),
        Duration::from_secs(60),
    )
    .unwrap();
    send_json(&mut ws, json!({"type": "auth", "token": forged})).await;
    assert_eq!(read_json(&mut ws).await["status"], "error");

    let report = server
        .delivery()
        .send_to_role("ADMIN", &OutboundMessage::system_notification(json!({})));
    assert_eq!(report.matched, 0);
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn e2e_send_to_user_reaches_all_of_their_connections() {
    let (url, _server) = boot_default().await;
    let mut alice1 = connect_as(&url, "1", "alice", "OPERATOR").await;
    let mut alice2 = connect_as(&url, "1", "alice", "OPERATOR").await;
    let mut bob = connect_as(&url, "2", "bob", "OPERATOR").await;
    let mut sender = connect_as(&url, "3", "carol", "ADMIN").await;

    send_json(
        &mut sender,
        json!({"type": "notification", "target": "user", "userId": "1", "data": {"msg": "for alice"}}),
    )
    .await;

    for ws in [&mut alice1, &mut alice2] {
        let got = read_json(ws).await;
        assert_eq!(got["type"], "notification");
        assert_eq!(got["from"], "carol");
        assert_eq!(got["data"]["msg"], "for alice");
    }
    assert_silent(&mut bob).await;
    assert_silent(&mut sender).await;
}

#[tokio::test]
async fn e2e_send_to_role() {
    let (url, _server) = boot_default().await;
    let mut admin = connect_as(&url, "1", "alice", "ADMIN").await;
    let mut operator = connect_as(&url, "2", "bob", "OPERATOR").await;
    let mut anon = connect(&url).await;

    send_json(
        &mut operator,
        json!({"type": "notification", "target": "role", "role": "ADMIN", "data": {"level": 3}}),
    )
    .await;

    let got = read_json(&mut admin).await;
    assert_eq!(got["from"], "bob");
    assert_eq!(got["data"]["level"], 3);
    assert_silent(&mut operator).await;
    assert_silent(&mut anon).await;
}

#[tokio::test]
async fn e2e_broadcast_excludes_sender() {
    let (url, _server) = boot_default().await;
    let mut sender = connect_as(&url, "1", "alice", "ADMIN").await;
    let mut a = connect(&url).await;
    let mut b = connect_as(&url, "2", "bob", "OPERATOR").await;

    send_json(
        &mut sender,
        json!({"type": "notification", "target": "all", "data": "hello"}),
    )
    .await;

    assert_eq!(read_json(&mut a).await["data"], "hello");
    assert_eq!(read_json(&mut b).await["from"], "alice");
    assert_silent(&mut sender).await;
}

#[tokio::test]
async fn e2e_unauthenticated_relay_has_no_from() {
    let (url, _server) = boot_default().await;
    let mut sender = connect(&url).await;
    let mut receiver = connect(&url).await;

    send_json(
        &mut sender,
        json!({"type": "notification", "target": "all", "data": {"x": 1}}),
    )
    .await;

    let got = read_json(&mut receiver).await;
    assert_eq!(got["type"], "notification");
    assert!(got.get("from").is_none());
}

#[tokio::test]
async fn e2e_malformed_frame_yields_one_error_and_keeps_connection() {
    let (url, server) = boot_default().await;
    let mut ws = connect(&url).await;

    ws.send(Message::text("{definitely not json")).await.unwrap();
    let err = read_json(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert!(err["message"].is_string());

    send_json(&mut ws, json!({"type": "teleport"})).await;
    assert_eq!(read_json(&mut ws).await["type"], "error");

    // The next frame after the errors is the pong, so each error was sent once.
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut ws).await["type"], "pong");
    assert_eq!(server.registry().len(), 1);
}

#[tokio::test]
async fn e2e_binary_utf8_frames_are_accepted() {
    let (url, _server) = boot_default().await;
    let mut ws = connect(&url).await;

    ws.send(Message::binary(br#"{"type":"ping"}"#.to_vec()))
        .await
        .unwrap();
    assert_eq!(read_json(&mut ws).await["type"], "pong");

    ws.send(Message::binary(vec![0xff, 0xfe, 0x00])).await.unwrap();
    assert_eq!(read_json(&mut ws).await["type"], "error");
}

#[tokio::test]
async fn e2e_reauthentication_rejected() {
    let (url, server) = boot_default().await;
    let mut ws = connect_as(&url, "1", "alice", "ADMIN").await;

    send_json(&mut ws, json!({"type": "auth", "token": token("2", "bob", "OPERATOR")})).await;
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["status"], "error");

    let report = server
        .delivery()
        .send_to_user("1", &OutboundMessage::system_notification(json!({})));
    assert_eq!(report.delivered, 1);
    let report = server
        .delivery()
        .send_to_user("2", &OutboundMessage::system_notification(json!({})));
    assert_eq!(report.matched, 0);
}

#[tokio::test]
async fn e2e_external_trigger_reaches_clients() {
    let (url, server) = boot_default().await;
    let mut ws = connect_as(&url, "1", "alice", "ADMIN").await;

    let report = server.delivery().send_to_role(
        "ADMIN",
        &OutboundMessage::system_notification(json!({"title": "Fault alarm"})),
    );
    assert_eq!(report.delivered, 1);

    let got = read_json(&mut ws).await;
    assert_eq!(got["data"]["title"], "Fault alarm");
    assert!(got["timestamp"].is_number());
}

#[tokio::test]
async fn e2e_client_close_removes_connection() {
    let (url, server) = boot_default().await;
    let mut ws = connect(&url).await;
    let _other = connect(&url).await;
    assert_eq!(server.registry().len(), 2);

    ws.close(None).await.unwrap();
    wait_for_len(&server, 1).await;
}

#[tokio::test]
async fn e2e_dropped_socket_is_removed() {
    let (url, server) = boot_default().await;
    let ws = connect(&url).await;
    drop(ws);
    wait_for_len(&server, 0).await;
}

#[tokio::test]
async fn e2e_heartbeat_arrives() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        ..ServerConfig::default()
    };
    let (url, _server) = boot_server(config).await;
    let mut ws = connect(&url).await;

    let before = now_millis();
    let hb = read_json(&mut ws).await;
    assert_eq!(hb["type"], "heartbeat");
    assert!(hb["timestamp"].as_i64().unwrap() >= before);
}

#[tokio::test]
async fn e2e_auth_timeout_closes_unauthenticated() {
    let config = ServerConfig {
        auth_timeout_secs: Some(1),
        ..ServerConfig::default()
    };
    let (url, server) = boot_server(config).await;
    let mut authed = connect_as(&url, "1", "alice", "ADMIN").await;
    let mut idle = connect(&url).await;

    let err = read_json(&mut idle).await;
    assert_eq!(err["type"], "error");
    let close = timeout(TIMEOUT, idle.next()).await.unwrap().unwrap().unwrap();
    let Message::Close(Some(frame)) = close else {
        panic!("expected close frame, got {close:?}");
    };
    assert_eq!(frame.code, CloseCode::Policy);

    wait_for_len(&server, 1).await;
    send_json(&mut authed, json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut authed).await["type"], "pong");
}

#[tokio::test]
async fn e2e_refuses_upgrade_at_capacity() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (url, _server) = boot_server(config).await;
    let _first = connect(&url).await;

    let err = connect_async(&url).await.unwrap_err();
    let tokio_tungstenite::tungstenite::Error::Http(resp) = err else {
        panic!("expected HTTP rejection, got {err:?}");
    };
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn e2e_shutdown_closes_clients() {
    let (url, server) = boot_default().await;
    let mut a = connect_as(&url, "1", "alice", "ADMIN").await;
    let mut b = connect(&url).await;

    assert!(server.stop().await);
    assert!(server.registry().is_empty());

    for ws in [&mut a, &mut b] {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        let Message::Close(Some(frame)) = msg else {
            panic!("expected close frame, got {msg:?}");
        };
        assert_eq!(frame.code, CloseCode::Away);
        assert_eq!(frame.reason.as_str(), "server shutting down");
    }
}
