//! Drives the relay router end to end with an in-memory store and gateway.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use talkie_api::{AppState, AppStateInner, router, router_with_limit};
use talkie_crypto::{CryptoGateway, Key, MemoryGateway};
use talkie_db::Store;
use talkie_types::api::Envelope;
use talkie_types::models::{Message, User};

const RELAY_KEY: &str = "5E4E4E4E";

fn relay_gateway() -> MemoryGateway {
    MemoryGateway::new()
        .with_secret_key(Key::new("Relay", "relay@example.com", RELAY_KEY))
        .with_public_key(Key::new("Alice", "alice@example.com", "AAA111"))
        .with_public_key(Key::new("Bob", "bob@example.com", "BBB222"))
        .with_remote_key(Key::new("Carol", "carol@example.com", "CCC333"))
}

fn app_with_identity(identity: Option<&str>) -> (Router, AppState) {
    let state = AppStateInner::new(
        Store::open_in_memory().unwrap(),
        Arc::new(relay_gateway()),
        identity.map(str::to_string),
    );
    (router(state.clone()), state)
}

fn app() -> (Router, AppState) {
    app_with_identity(Some(RELAY_KEY))
}

struct Reply {
    status: StatusCode,
    content_type: String,
    body: Vec<u8>,
}

impl Reply {
    fn envelope<T: serde::de::DeserializeOwned>(&self) -> Envelope<T> {
        assert_eq!(self.content_type, "application/json");
        serde_json::from_slice(&self.body).unwrap()
    }
}

async fn call(app: &Router, req: Request<Body>) -> Reply {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let content_type = res
        .headers()
        .get(CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let body = res.into_body().collect().await.unwrap().to_bytes().to_vec();
    Reply {
        status,
        content_type,
        body,
    }
}

fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn register(app: &Router, name: &str, fingerprint: &str) -> User {
    let user = User::new(name, format!("{}@example.com", name.to_lowercase()), fingerprint);
    let reply = call(app, post_json("/register", &user)).await;
    assert_eq!(reply.status, StatusCode::OK);
    reply.envelope::<User>().data.unwrap()
}

async fn send(app: &Router, from: &User, to: &User, content: &[u8]) -> i64 {
    let msg = Message::new(from.clone(), to.clone(), content.to_vec());
    let reply = call(app, post_json("/send", &msg)).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    reply.envelope::<i64>().data.unwrap()
}

#[tokio::test]
async fn register_json_assigns_user_id() {
    let (app, _) = app();
    let alice = register(&app, "Alice", "AAA111").await;
    assert!(alice.user_id > 0);
    assert_eq!(alice.fingerprint, "AAA111");
    assert_eq!(alice.email, "alice@example.com");
}

#[tokio::test]
async fn register_accepts_form_fields() {
    let (app, state) = app();
    let req = Request::builder()
        .method("POST")
        .uri("/register")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("name=Bob&email=bob%40example.com&key=BBB222"))
        .unwrap();

    let reply = call(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    let bob = reply.envelope::<User>().data.unwrap();
    assert_eq!(bob.email, "bob@example.com");
    assert_eq!(state.store.find_user_by_fingerprint("BBB222").unwrap(), bob);
}

#[tokio::test]
async fn re_registering_keeps_the_same_id() {
    let (app, _) = app();
    let first = register(&app, "Alice", "AAA111").await;
    let second = register(&app, "Alice", "AAA111").await;
    assert_eq!(first.user_id, second.user_id);
}

#[tokio::test]
async fn register_fetches_unknown_keys() {
    let (app, state) = app();
    assert!(state.gateway.list_public_keys("CCC333").unwrap().is_empty());

    register(&app, "Carol", "CCC333").await;
    assert_eq!(state.gateway.list_public_keys("CCC333").unwrap().len(), 1);
}

#[tokio::test]
async fn register_fails_when_key_cannot_be_fetched() {
    let (app, state) = app();
    let user = User::new("Zed", "zed@example.com", "ZZZ999");
    let reply = call(&app, post_json("/register", &user)).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    let env = reply.envelope::<User>();
    assert!(!env.success);
    assert!(env.error.unwrap().contains("ZZZ999"));
    assert!(state.store.find_user_by_fingerprint("ZZZ999").is_err());
}

#[tokio::test]
async fn register_without_key_is_rejected() {
    let (app, _) = app();
    let reply = call(&app, post_json("/register", &serde_json::json!({ "name": "Nobody", "key": "" }))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(!reply.envelope::<User>().success);
}

#[tokio::test]
async fn send_requires_json() {
    let (app, _) = app();
    let req = Request::builder()
        .method("POST")
        .uri("/send")
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();

    let reply = call(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let env = reply.envelope::<i64>();
    assert!(!env.success);
    assert!(env.error.is_some());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (_, state) = app();
    let app = router_with_limit(state, 1024);
    let alice = register(&app, "Alice", "AAA111").await;
    let bob = register(&app, "Bob", "BBB222").await;

    let msg = Message::new(alice, bob, vec![7u8; 4096]);
    let reply = call(&app, post_json("/send", &msg)).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(reply.envelope::<i64>().error.as_deref(), Some("request body too large"));
}

#[tokio::test]
async fn send_to_unregistered_recipient_is_rejected() {
    let (app, _) = app();
    let alice = register(&app, "Alice", "AAA111").await;
    let ghost = User::new("Ghost", "ghost@example.com", "GGG000");

    let reply = call(&app, post_json("/send", &Message::new(alice, ghost, b"boo".to_vec()))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(!reply.envelope::<i64>().success);
}

#[tokio::test]
async fn plaintext_listing() {
    let (app, _) = app();
    let alice = register(&app, "Alice", "AAA111").await;
    let bob = register(&app, "Bob", "BBB222").await;
    let id = send(&app, &alice, &bob, b"hello").await;

    let reply = call(&app, get("/messages?key=BBB222")).await;
    assert_eq!(reply.status, StatusCode::OK);
    let messages = reply.envelope::<Vec<Message>>().data.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_id, id);
    assert_eq!(messages[0].content, b"hello");
    assert_eq!(messages[0].from, alice);
    assert!(!messages[0].played);
}

#[tokio::test]
async fn encrypted_listing_is_opaque_to_everyone_but_the_owner() {
    let (app, _) = app();
    let alice = register(&app, "Alice", "AAA111").await;
    let bob = register(&app, "Bob", "BBB222").await;
    send(&app, &alice, &bob, b"hello").await;

    let reply = call(&app, get("/messages?key=BBB222&encrypt=1")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.content_type, "application/octet-stream");

    let alices = MemoryGateway::new().with_secret_key(Key::new("Alice", "alice@example.com", "AAA111"));
    assert!(alices.decrypt("AAA111", &mut reply.body.as_slice()).is_err());

    let bobs = MemoryGateway::new().with_secret_key(Key::new("Bob", "bob@example.com", "BBB222"));
    let plain = bobs.decrypt("BBB222", &mut reply.body.as_slice()).unwrap();
    let env: Envelope<Vec<Message>> = serde_json::from_slice(&plain).unwrap();
    assert!(env.success);
    assert_eq!(env.data.unwrap()[0].content, b"hello");
}

#[tokio::test]
async fn encrypted_listing_without_relay_identity_is_a_json_error() {
    let (app, _) = app_with_identity(None);
    register(&app, "Bob", "BBB222").await;

    let reply = call(&app, get("/messages?key=BBB222&encrypt=1")).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!reply.envelope::<Vec<Message>>().success);
}

#[tokio::test]
async fn listing_for_unknown_user_is_not_found() {
    let (app, _) = app();
    let reply = call(&app, get("/messages?key=NOPE")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    let env = reply.envelope::<Vec<Message>>();
    assert_eq!(env.error.as_deref(), Some("user NOPE not found"));
}

#[tokio::test]
async fn listing_without_key_is_bad_request() {
    let (app, _) = app();
    let reply = call(&app, get("/messages")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(!reply.envelope::<Vec<Message>>().success);
}

#[tokio::test]
async fn download_returns_raw_content() {
    let (app, _) = app();
    let alice = register(&app, "Alice", "AAA111").await;
    let bob = register(&app, "Bob", "BBB222").await;
    let payload = [0u8, 159, 146, 150, 255];
    let id = send(&app, &alice, &bob, &payload).await;

    let reply = call(&app, get(&format!("/m?id={}", id))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.content_type, "application/octet-stream");
    assert_eq!(reply.body, payload);
}

#[tokio::test]
async fn download_of_missing_message_is_a_json_error() {
    let (app, _) = app();
    let reply = call(&app, get("/m?id=404")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.envelope::<()>().error.as_deref(), Some("message 404 not found"));
}

#[tokio::test]
async fn closed_store_reports_unavailable() {
    let (app, state) = app();
    state.store.close();

    let reply = call(&app, get("/messages?key=BBB222")).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.envelope::<Vec<Message>>().error.as_deref(), Some("store not open"));

    let reply = call(&app, get("/health")).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = app();
    let reply = call(&app, get("/health")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.envelope::<String>().data.as_deref(), Some("ok"));
}
