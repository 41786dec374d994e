//! Integration tests for WebSocket connection, auth, presence broadcast,
//! and event fan-out.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;
type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

async fn start_test_server() -> (String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = ripple_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = ripple_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = ripple_server::state::AppState {
        db,
        jwt_secret,
        registry: Arc::new(ripple_server::ws::registry::PresenceRegistry::new()),
        data_dir,
        max_attachment_bytes: 1024 * 1024,
    };

    let app = ripple_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr)
}

/// Register a user and return (access_token, user_id).
async fn register_user(base_url: &str, username: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base_url}/api/auth/register"))
        .json(&serde_json::json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "hunter22",
            "fullName": format!("{username} tester"),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Registration failed for {username}");
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["accessToken"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

/// Run the friend-request flow and return the direct chat id.
async fn make_friends(
    base_url: &str,
    sender_token: &str,
    receiver_token: &str,
    receiver_id: &str,
) -> String {
    let client = reqwest::Client::new();
    client
        .post(format!("{base_url}/api/requests"))
        .bearer_auth(sender_token)
        .json(&serde_json::json!({"receiverId": receiver_id}))
        .send()
        .await
        .unwrap();

    let incoming: serde_json::Value = client
        .get(format!("{base_url}/api/requests/incoming"))
        .bearer_auth(receiver_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let request_id = incoming[0]["id"].as_str().unwrap();

    client
        .put(format!("{base_url}/api/requests/{request_id}"))
        .bearer_auth(receiver_token)
        .json(&serde_json::json!({"status": "approved"}))
        .send()
        .await
        .unwrap();

    let chats: serde_json::Value = client
        .get(format!("{base_url}/api/chats"))
        .bearer_auth(sender_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    chats[0]["id"].as_str().unwrap().to_string()
}

async fn connect_ws(addr: &SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Wait for the next event with the given name, skipping unrelated events.
/// Panics if nothing matches within two seconds.
async fn expect_event(read: &mut WsRead, event_name: &str) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {event_name}"))
            .expect("Stream ended")
            .expect("WebSocket error");

        if let Message::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["event"] == event_name {
                return value;
            }
        }
    }
}

/// Assert that no text event arrives within the window.
async fn expect_silence(read: &mut WsRead, window: Duration) {
    let result = tokio::time::timeout(window, read.next()).await;
    if let Ok(Some(Ok(Message::Text(text)))) = result {
        panic!("Expected no event, got: {}", text.as_str());
    }
}

#[tokio::test]
async fn test_ws_invalid_token_is_closed_with_4002() {
    let (_base_url, addr) = start_test_server().await;

    let ws_url = format!("ws://{}/ws?token=invalid_jwt_token", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket should upgrade even with invalid token");

    let (mut _write, mut read) = ws_stream.split();

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4002),
                "Expected close code 4002 (token invalid)"
            );
        }
        Some(Ok(Message::Close(None))) => {
            // Close without frame — acceptable for invalid token
        }
        other => {
            if let Some(Ok(msg)) = other {
                assert!(msg.is_close(), "Expected close message, got: {:?}", msg);
            }
        }
    }
}

#[tokio::test]
async fn test_presence_broadcast_tracks_connect_and_disconnect() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, alice_id) = register_user(&base_url, "alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob").await;

    let (_alice_write, mut alice_read) = connect_ws(&addr, &alice_token).await;

    // Alice's own registration reaches her: she is in the online set
    let event = expect_event(&mut alice_read, "getOnlineUsers").await;
    let online: Vec<String> = serde_json::from_value(event["data"].clone()).unwrap();
    assert_eq!(online, vec![alice_id.clone()]);

    // Bob connects: both see the grown set
    let (mut bob_write, mut bob_read) = connect_ws(&addr, &bob_token).await;

    let event = expect_event(&mut alice_read, "getOnlineUsers").await;
    let mut online: Vec<String> = serde_json::from_value(event["data"].clone()).unwrap();
    online.sort();
    let mut expected = vec![alice_id.clone(), bob_id.clone()];
    expected.sort();
    assert_eq!(online, expected);

    let event = expect_event(&mut bob_read, "getOnlineUsers").await;
    let online: Vec<String> = serde_json::from_value(event["data"].clone()).unwrap();
    assert!(online.contains(&bob_id));

    // Bob disconnects: Alice sees him gone
    bob_write.send(Message::Close(None)).await.unwrap();
    drop(bob_write);
    drop(bob_read);

    let event = expect_event(&mut alice_read, "getOnlineUsers").await;
    let online: Vec<String> = serde_json::from_value(event["data"].clone()).unwrap();
    assert_eq!(online, vec![alice_id]);
}

#[tokio::test]
async fn test_new_message_reaches_recipient_but_not_sender() {
    let (base_url, addr) = start_test_server().await;
    let client = reqwest::Client::new();
    let (alice_token, _alice_id) = register_user(&base_url, "alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob").await;
    let chat_id = make_friends(&base_url, &alice_token, &bob_token, &bob_id).await;

    let (_alice_write, mut alice_read) = connect_ws(&addr, &alice_token).await;
    expect_event(&mut alice_read, "getOnlineUsers").await;
    let (_bob_write, mut bob_read) = connect_ws(&addr, &bob_token).await;
    expect_event(&mut bob_read, "getOnlineUsers").await;
    // Bob's connect also re-broadcast presence to Alice
    expect_event(&mut alice_read, "getOnlineUsers").await;

    let form = reqwest::multipart::Form::new().text("message", "hi bob");
    let resp = client
        .post(format!("{base_url}/api/chats/{chat_id}/messages"))
        .bearer_auth(&alice_token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Bob receives the full message; Alice only gets her request response
    let event = expect_event(&mut bob_read, "newMessage").await;
    assert_eq!(event["data"]["chatId"], chat_id);
    assert_eq!(event["data"]["message"], "hi bob");

    expect_silence(&mut alice_read, Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_typing_and_seen_events_relay_between_participants() {
    let (base_url, addr) = start_test_server().await;
    let client = reqwest::Client::new();
    let (alice_token, alice_id) = register_user(&base_url, "alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob").await;
    let chat_id = make_friends(&base_url, &alice_token, &bob_token, &bob_id).await;

    let (mut alice_write, mut alice_read) = connect_ws(&addr, &alice_token).await;
    expect_event(&mut alice_read, "getOnlineUsers").await;
    let (mut bob_write, mut bob_read) = connect_ws(&addr, &bob_token).await;
    expect_event(&mut bob_read, "getOnlineUsers").await;
    // Bob's connect also re-broadcast presence to Alice
    expect_event(&mut alice_read, "getOnlineUsers").await;

    // Alice starts typing over the socket
    let frame = serde_json::json!({"event": "typing", "data": {"chatId": chat_id}});
    alice_write
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();

    let event = expect_event(&mut bob_read, "typing").await;
    assert_eq!(event["data"]["chatId"], chat_id);
    assert_eq!(event["data"]["userId"], alice_id);

    // ...and stops
    let frame = serde_json::json!({"event": "typingStopped", "data": {"chatId": chat_id}});
    alice_write
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();

    let event = expect_event(&mut bob_read, "typingStopped").await;
    assert_eq!(event["data"]["userId"], alice_id);

    // Typing never echoes back to the sender
    expect_silence(&mut alice_read, Duration::from_millis(300)).await;

    // Alice sends a message, Bob marks it seen over the socket
    let form = reqwest::multipart::Form::new().text("message", "read me");
    client
        .post(format!("{base_url}/api/chats/{chat_id}/messages"))
        .bearer_auth(&alice_token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    expect_event(&mut bob_read, "newMessage").await;

    let frame = serde_json::json!({"event": "messagesSeen", "data": {"chatId": chat_id}});
    bob_write
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();

    let event = expect_event(&mut alice_read, "messagesSeen").await;
    assert_eq!(event["data"]["chatId"], chat_id);
    assert_eq!(event["data"]["userId"], bob_id);

    // The receipt is durable: history now shows Bob in readBy
    let history: serde_json::Value = client
        .get(format!("{base_url}/api/chats/{chat_id}/messages"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        history["messages"][0]["readBy"],
        serde_json::json!([bob_id])
    );
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, _alice_id) = register_user(&base_url, "alice").await;

    let (mut write, mut read) = connect_ws(&addr, &alice_token).await;
    expect_event(&mut read, "getOnlineUsers").await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");

    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => {
            panic!("Expected Pong message, got: {:?}", other);
        }
    }
}
