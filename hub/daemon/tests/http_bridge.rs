//! HTTP bridge tests
//!
//! Requests go straight into the router with `tower::ServiceExt::oneshot`;
//! devices are attached in-process with recording sinks.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use hub_core::test_utils::RecordingSink;
use hub_core::{ConnectionRegistry, NotificationDispatcher, SharedSecret, API_KEY_HEADER};
use hub_daemon::http::HTTP_SERVICE_NAME;
use hub_daemon::{router, HttpState};

const KEY: &str = "test-secret";

fn app_with_secret(secret: Option<&str>) -> (Router, ConnectionRegistry, NotificationDispatcher) {
    let registry = ConnectionRegistry::new();
    let dispatcher = NotificationDispatcher::new(registry.clone());
    let state = HttpState::new(
        dispatcher.clone(),
        SharedSecret::new(secret.map(str::to_string)),
    );
    (router(state), registry, dispatcher)
}

fn app() -> (Router, ConnectionRegistry, NotificationDispatcher) {
    app_with_secret(Some(KEY))
}

fn post(uri: &str, key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    builder.body(Body::empty()).unwrap()
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_missing_secret_is_server_error() {
    let (app, _, _) = app_with_secret(None);
    let (status, body) = call(app, get("/stats", Some(KEY))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Server configuration error"}));
}

#[tokio::test]
async fn test_missing_header_is_unauthorized() {
    let (app, _, _) = app();
    let (status, body) = call(app, get("/stats", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Missing X-API-KEY header"}));
}

#[tokio::test]
async fn test_wrong_key_is_unauthorized() {
    let (app, _, _) = app();
    let (status, body) = call(app, get("/stats", Some("nope"))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Invalid API key"}));
}

#[tokio::test]
async fn test_auth_runs_before_body_parsing() {
    let (app, _, _) = app();
    let (status, _) = call(app, post("/send", None, &json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// /send
// =============================================================================

#[tokio::test]
async fn test_send_delivers_to_attached_devices() {
    let (app, registry, _) = app();
    registry.register("alice", "phone", "push").unwrap();
    registry.register("alice", "laptop", "push").unwrap();
    let phone = RecordingSink::new();
    registry.attach_stream("alice", "phone", phone.clone()).unwrap();

    let request = post(
        "/send",
        Some(KEY),
        &json!({"client_id": "alice", "title": "Hello", "message": "World"}),
    );
    let (status, body) = call(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sent");
    assert_eq!(body["delivered"], 1);
    assert_eq!(body["total"], 2);
    assert_eq!(body["inactive"], 1);

    let sent = phone.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Hello");
    assert_eq!(sent[0].service_name, HTTP_SERVICE_NAME);
    assert_eq!(body["notification_id"], sent[0].id.as_str());
}

#[tokio::test]
async fn test_send_without_streams_is_server_error() {
    let (app, registry, _) = app();
    registry.register("bob", "tablet", "push").unwrap();

    let request = post(
        "/send",
        Some(KEY),
        &json!({"client_id": "bob", "title": "t", "message": "m"}),
    );
    let (status, body) = call(app, request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("bob"));
}

#[tokio::test]
async fn test_send_requires_client_id() {
    let (app, _, _) = app();
    let request = post(
        "/send",
        Some(KEY),
        &json!({"client_id": "", "title": "t", "message": "m"}),
    );
    let (status, body) = call(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "client_id is required"}));
}

#[tokio::test]
async fn test_send_rejects_malformed_json() {
    let (app, _, _) = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/send")
        .header(header::CONTENT_TYPE, "application/json")
        .header(API_KEY_HEADER, KEY)
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = call(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

// =============================================================================
// /broadcast and /stats
// =============================================================================

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let (app, registry, _) = app();
    let sinks: Vec<_> = [("c1", "d1"), ("c2", "d1"), ("c2", "d2")]
        .into_iter()
        .map(|(client, device)| {
            registry.register(client, device, "svc").unwrap();
            let sink = RecordingSink::new();
            registry.attach_stream(client, device, sink.clone()).unwrap();
            sink
        })
        .collect();

    let request = post(
        "/broadcast",
        Some(KEY),
        &json!({"title": "Maintenance", "message": "Tonight"}),
    );
    let (status, body) = call(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["delivered"], 3);
    assert!(sinks.iter().all(|s| s.notification_count() == 1));
}

#[tokio::test]
async fn test_broadcast_with_no_devices_is_ok() {
    let (app, _, _) = app();
    let (status, body) = call(
        app,
        post("/broadcast", Some(KEY), &json!({"title": "t", "message": "m"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_stats_reports_registry_and_dispatch_counters() {
    let (app, registry, dispatcher) = app();
    registry.register("bob", "tablet", "push").unwrap();
    registry.register("alice", "phone", "push").unwrap();
    registry
        .attach_stream("alice", "phone", RecordingSink::new())
        .unwrap();
    dispatcher
        .send_to_client(&hub_core::Notification::new("alice", "t", "m", "svc"))
        .await
        .unwrap();

    let (status, body) = call(app, get("/stats", Some(KEY))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["client_count"], 2);
    assert_eq!(body["device_count"], 2);
    assert_eq!(body["active_streams"], 1);
    assert_eq!(body["client_ids"], json!(["alice", "bob"]));
    assert_eq!(body["dispatch"]["dispatches"], 1);
    assert_eq!(body["dispatch"]["delivered"], 1);
}
