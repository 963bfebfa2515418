//! End-to-end tests: the real router on a random port, REST through
//! reqwest and the gateway through tokio-tungstenite clients.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parley_api::AppStateInner;
use parley_db::Database;
use parley_gateway::GatewayConfig;

const SECRET: &str = "integration-test-secret";

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_test_server() -> SocketAddr {
    let db = Arc::new(Database::open_in_memory().expect("in-memory db"));
    let state = Arc::new(AppStateInner::new(db, SECRET.to_string(), GatewayConfig::default()));
    let app = parley_server::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct TestUser {
    id: u64,
    token: String,
}

async fn register_user(addr: SocketAddr, username: &str) -> TestUser {
    let resp = reqwest::Client::new()
        .post(format!("http://{}/auth/register", addr))
        .json(&json!({ "username": username, "password": "correct-horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let body: Value = resp.json().await.unwrap();
    TestUser {
        id: body["user_id"].as_u64().unwrap(),
        token: body["token"].as_str().unwrap().to_string(),
    }
}

/// A gateway client that understands newline-coalesced frames and lets a
/// test wait for a specific envelope while skipping unrelated ones.
struct Client {
    ws: Ws,
    pending: VecDeque<Value>,
}

impl Client {
    async fn connect(addr: SocketAddr, user: &TestUser) -> Self {
        let url = format!("ws://{}/ws?token={}", addr, user.token);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
        Self {
            ws,
            pending: VecDeque::new(),
        }
    }

    async fn send(&mut self, frame: Value) {
        self.ws.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    async fn read_more(&mut self) {
        let msg = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("transport error");

        if let Message::Text(text) = msg {
            for line in text.as_str().split('\n') {
                self.pending.push_back(serde_json::from_str(line).expect("frame is json"));
            }
        }
    }

    async fn expect<F>(&mut self, pred: F) -> Value
    where
        F: Fn(&Value) -> bool,
    {
        loop {
            if let Some(pos) = self.pending.iter().position(&pred) {
                return self.pending.remove(pos).unwrap();
            }
            self.read_more().await;
        }
    }

    /// Every frame up to and including the first of type `kind`, in arrival
    /// order.
    async fn frames_until(&mut self, kind: &str) -> Vec<Value> {
        let mut seen = Vec::new();
        loop {
            while let Some(frame) = self.pending.pop_front() {
                let done = frame["type"] == kind;
                seen.push(frame);
                if done {
                    return seen;
                }
            }
            self.read_more().await;
        }
    }

    async fn expect_type(&mut self, kind: &str) -> Value {
        self.expect(|v| v["type"] == kind).await
    }

    async fn expect_status(&mut self, user_id: u64, online: bool) -> Value {
        self.expect(|v| v["type"] == "user_status" && v["user_id"] == user_id && v["online"] == online)
            .await
    }
}

async fn api_get(addr: SocketAddr, path: &str, token: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://{}{}", addr, path))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn upgrade_without_valid_token_is_rejected() {
    let addr = start_test_server().await;

    for url in [
        format!("ws://{}/ws?token=not-a-jwt", addr),
        format!("ws://{}/ws", addr),
    ] {
        match tokio_tungstenite::connect_async(url).await {
            Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 401),
            other => panic!("expected 401, got {:?}", other.map(|(_, r)| r.status())),
        }
    }
}

#[tokio::test]
async fn online_message_reaches_both_parties_with_same_id() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    let bob = register_user(addr, "bob").await;

    let mut a = Client::connect(addr, &alice).await;
    let mut b = Client::connect(addr, &bob).await;
    a.expect_status(bob.id, true).await;

    a.send(json!({ "type": "send_message", "receiver_id": bob.id, "content": "hi bob" }))
        .await;

    let echo = a.expect_type("new_message").await;
    let delivered = b.expect_type("new_message").await;

    assert_eq!(echo, delivered);
    assert_eq!(echo["message"]["content"], "hi bob");
    assert_eq!(echo["message"]["sender_id"], alice.id);
    assert_eq!(echo["message"]["receiver_id"], bob.id);
    assert_eq!(echo["message"]["sender"]["username"], "alice");
}

#[tokio::test]
async fn offline_receiver_gets_message_later_and_sender_gets_echo() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    let bob = register_user(addr, "bob").await;

    let mut a = Client::connect(addr, &alice).await;
    a.send(json!({ "type": "send_message", "receiver_id": bob.id, "content": "while you were out" }))
        .await;

    let echo = a.expect_type("new_message").await;
    let id = echo["message"]["id"].as_u64().unwrap();

    let history: Value = api_get(addr, &format!("/api/messages/{}", alice.id), &bob.token)
        .await
        .json()
        .await
        .unwrap();
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], id);

    // Fetching marked it read for bob.
    let chats: Value = api_get(addr, "/api/chats", &bob.token).await.json().await.unwrap();
    assert_eq!(chats[0]["unread_count"], 0);
    assert_eq!(chats[0]["user"]["id"], alice.id);
    assert_eq!(chats[0]["user"]["online"], true);
}

#[tokio::test]
async fn self_send_is_rejected_and_nothing_is_stored() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;

    let mut a = Client::connect(addr, &alice).await;
    a.send(json!({ "type": "send_message", "receiver_id": alice.id, "content": "me, myself" }))
        .await;

    let err = a.expect_type("error").await;
    assert_eq!(err["error"], "Cannot send a message to yourself");

    let chats: Value = api_get(addr, "/api/chats", &alice.token).await.json().await.unwrap();
    assert_eq!(chats, json!([]));
}

#[tokio::test]
async fn presence_follows_connect_and_disconnect() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    let bob = register_user(addr, "bob").await;

    let mut a = Client::connect(addr, &alice).await;
    a.expect_status(alice.id, true).await;

    let mut b = Client::connect(addr, &bob).await;
    // Snapshot of who was already there.
    b.expect_status(alice.id, true).await;
    a.expect_status(bob.id, true).await;

    let online: Value = api_get(addr, &format!("/api/users/{}/online", bob.id), &alice.token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(online, json!({ "user_id": bob.id, "online": true }));

    b.ws.close(None).await.unwrap();
    a.expect_status(bob.id, false).await;

    let online: Value = api_get(addr, &format!("/api/users/{}/online", bob.id), &alice.token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(online["online"], false);
}

#[tokio::test]
async fn typing_is_forwarded_and_unknown_frames_are_ignored() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    let bob = register_user(addr, "bob").await;

    let mut a = Client::connect(addr, &alice).await;
    let mut b = Client::connect(addr, &bob).await;
    a.expect_status(bob.id, true).await;

    a.send(json!({ "type": "dance" })).await;
    a.send(json!({ "type": "typing", "receiver_id": bob.id })).await;
    a.send(json!({ "type": "stop_typing", "receiver_id": bob.id })).await;

    let typing = b.expect_type("typing").await;
    assert_eq!(typing, json!({ "type": "typing", "user_id": alice.id }));
    let stop = b.expect_type("stop_typing").await;
    assert_eq!(stop, json!({ "type": "stop_typing", "user_id": alice.id }));
}

#[tokio::test]
async fn reply_across_conversations_is_rejected() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    let bob = register_user(addr, "bob").await;
    let carol = register_user(addr, "carol").await;

    let mut a = Client::connect(addr, &alice).await;
    a.send(json!({ "type": "send_message", "receiver_id": bob.id, "content": "for bob" }))
        .await;
    let original = a.expect_type("new_message").await;
    let original_id = original["message"]["id"].as_u64().unwrap();

    a.send(json!({
        "type": "send_message",
        "receiver_id": carol.id,
        "content": "quoting bob's chat",
        "reply_to_id": original_id,
    }))
    .await;
    let err = a.expect_type("error").await;
    assert_eq!(err["error"], "Message being replied to is not part of this conversation");

    a.send(json!({
        "type": "send_message",
        "receiver_id": bob.id,
        "content": "following up",
        "reply_to_id": original_id,
    }))
    .await;
    let reply = a.expect_type("new_message").await;
    assert_eq!(reply["message"]["reply_to"]["id"], original_id);
    assert_eq!(reply["message"]["reply_to"]["content"], "for bob");
}

#[tokio::test]
async fn edit_and_delete_for_everyone_notify_both_sides() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    let bob = register_user(addr, "bob").await;
    let http = reqwest::Client::new();

    let mut a = Client::connect(addr, &alice).await;
    let mut b = Client::connect(addr, &bob).await;
    a.expect_status(bob.id, true).await;

    a.send(json!({ "type": "send_message", "receiver_id": bob.id, "content": "tpyo" }))
        .await;
    let id = a.expect_type("new_message").await["message"]["id"].as_u64().unwrap();
    b.expect_type("new_message").await;

    // Only the sender may edit.
    let resp = http
        .put(format!("http://{}/api/messages/{}", addr, id))
        .bearer_auth(&bob.token)
        .json(&json!({ "content": "hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = http
        .put(format!("http://{}/api/messages/{}", addr, id))
        .bearer_auth(&alice.token)
        .json(&json!({ "content": "typo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(b.expect_type("message_edited").await["message"]["content"], "typo");
    a.expect_type("message_edited").await;

    let resp = http
        .delete(format!("http://{}/api/messages/{}", addr, id))
        .bearer_auth(&alice.token)
        .json(&json!({ "delete_for": "all" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(b.expect_type("message_deleted").await["message_id"], id);
    assert_eq!(a.expect_type("message_deleted").await["message_id"], id);

    let history: Value = api_get(addr, &format!("/api/messages/{}", alice.id), &bob.token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn rest_surface_requires_a_bearer_token() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    register_user(addr, "alfred").await;

    let resp = reqwest::get(format!("http://{}/api/chats", addr)).await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = api_get(addr, "/api/users/search?username=a", &alice.token).await;
    assert_eq!(resp.status(), 400);

    let found: Value = api_get(addr, "/api/users/search?username=al", &alice.token)
        .await
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = found
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alfred"]);
}

#[tokio::test]
async fn chat_delete_for_everyone_keeps_partners_own_messages() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    let bob = register_user(addr, "bob").await;

    let mut a = Client::connect(addr, &alice).await;
    let mut b = Client::connect(addr, &bob).await;
    a.expect_status(bob.id, true).await;

    a.send(json!({ "type": "send_message", "receiver_id": bob.id, "content": "from alice" }))
        .await;
    b.expect_type("new_message").await;
    b.send(json!({ "type": "send_message", "receiver_id": alice.id, "content": "from bob" }))
        .await;
    a.expect(|v| v["type"] == "new_message" && v["message"]["content"] == "from bob")
        .await;

    let resp = reqwest::Client::new()
        .delete(format!("http://{}/api/chats/{}", addr, alice.id))
        .bearer_auth(&bob.token)
        .json(&json!({ "delete_for": "all" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let notice = a.expect_type("chat_deleted").await;
    assert_eq!(notice["other_user_id"], bob.id);

    let bob_view: Value = api_get(addr, &format!("/api/messages/{}", alice.id), &bob.token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(bob_view, json!([]));

    // Bob could only retract what he sent.
    let alice_view: Value = api_get(addr, &format!("/api/messages/{}", bob.id), &alice.token)
        .await
        .json()
        .await
        .unwrap();
    let contents: Vec<&str> = alice_view
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["from alice"]);
}

#[tokio::test]
async fn edit_is_not_announced_to_a_receiver_who_hid_the_message() {
    let addr = start_test_server().await;
    let alice = register_user(addr, "alice").await;
    let bob = register_user(addr, "bob").await;
    let http = reqwest::Client::new();

    let mut a = Client::connect(addr, &alice).await;
    let mut b = Client::connect(addr, &bob).await;
    a.expect_status(bob.id, true).await;

    a.send(json!({ "type": "send_message", "receiver_id": bob.id, "content": "first" }))
        .await;
    let id = b.expect_type("new_message").await["message"]["id"].as_u64().unwrap();

    let resp = http
        .delete(format!("http://{}/api/messages/{}", addr, id))
        .bearer_auth(&bob.token)
        .json(&json!({ "delete_for": "me" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = http
        .put(format!("http://{}/api/messages/{}", addr, id))
        .bearer_auth(&alice.token)
        .json(&json!({ "content": "first, edited" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    a.expect_type("message_edited").await;

    // Anything queued for bob before this marker would have arrived first.
    a.send(json!({ "type": "send_message", "receiver_id": bob.id, "content": "marker" }))
        .await;
    let frames = b.frames_until("new_message").await;
    assert!(frames.iter().all(|f| f["type"] != "message_edited"), "{:?}", frames);
    assert_eq!(frames.last().unwrap()["message"]["content"], "marker");
}
