//! Client tests against a mock sidecar.
//!
//! The mock is an axum router on an ephemeral port that answers the way the
//! sidecar does: JSON bodies, `ETag` on state reads, and
//! `{"errorCode", "message"}` on failures.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::{Value, json};

use daprfn_client::DaprClient;
use daprfn_core::{BindingMessage, ErrorKind, PubSubEvent, StateRecord};

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<(String, Value)>>>,
}

async fn save_state(
    State(captured): State<Captured>,
    Path(store): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    captured.bodies.lock().unwrap().push((format!("state/{store}"), value));
    StatusCode::NO_CONTENT
}

async fn get_state(Path((store, key)): Path<(String, String)>) -> impl IntoResponse {
    match (store.as_str(), key.as_str()) {
        ("statestore", "order") => (
            StatusCode::OK,
            [("etag", "7")],
            r#"{"id":1}"#.to_string(),
        )
            .into_response(),
        ("statestore", _) => StatusCode::NO_CONTENT.into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            r#"{"errorCode":"ERR_STATE_STORE_NOT_FOUND","message":"state store missing is not found"}"#,
        )
            .into_response(),
    }
}

async fn get_secret(
    Path((store, key)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    if store == "empty" {
        return StatusCode::NOT_FOUND.into_response();
    }
    let mut secret = serde_json::Map::new();
    secret.insert(key, json!("s3cr3t"));
    secret.insert("query".to_string(), json!(query));
    axum::Json(Value::Object(secret)).into_response()
}

async fn publish(
    State(captured): State<Captured>,
    Path((pubsub, topic)): Path<(String, String)>,
    body: Bytes,
) -> impl IntoResponse {
    let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    captured
        .bodies
        .lock()
        .unwrap()
        .push((format!("publish/{pubsub}/{topic}"), value));
    StatusCode::NO_CONTENT
}

async fn binding(
    State(captured): State<Captured>,
    Path(name): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    captured.bodies.lock().unwrap().push((format!("bindings/{name}"), value));
    (StatusCode::OK, "done")
}

async fn invoke(method: Method, Path((app, name)): Path<(String, String)>, body: Bytes) -> impl IntoResponse {
    format!("{method} {app}/{name} {}", String::from_utf8_lossy(&body))
}

async fn start_mock_sidecar() -> (SocketAddr, Captured) {
    let captured = Captured::default();
    let app = Router::new()
        .route("/v1.0/state/{store}", post(save_state))
        .route("/v1.0/state/{store}/{key}", get(get_state))
        .route("/v1.0/secrets/{store}/{key}", get(get_secret))
        .route("/v1.0/publish/{pubsub}/{topic}", post(publish))
        .route("/v1.0/bindings/{name}", post(binding))
        .route("/v1.0/invoke/{app}/method/{name}", axum::routing::any(invoke))
        .route("/v1.0/metadata", get(|| async { axum::Json(json!({"id": "app"})) }))
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, captured)
}

async fn unused_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn save_state_posts_record_array() {
    let (addr, captured) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));

    let records = vec![
        StateRecord::new("a", json!(1)),
        StateRecord::new("b", json!({"x": true})).with_etag("2"),
    ];
    client.save_state("statestore", &records).await.unwrap();

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0].0, "state/statestore");
    assert_eq!(
        bodies[0].1,
        json!([{"key": "a", "value": 1}, {"key": "b", "value": {"x": true}, "etag": "2"}])
    );
}

#[tokio::test]
async fn get_state_returns_value_and_etag() {
    let (addr, _) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));

    let record = client.get_state("statestore", "order").await.unwrap();
    assert_eq!(record.value, json!({"id": 1}));
    assert_eq!(record.etag.as_deref(), Some("7"));
}

#[tokio::test]
async fn missing_state_value_is_resource_does_not_exist() {
    let (addr, _) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));

    let record = client.get_state("statestore", "nope").await.unwrap();
    assert!(record.is_empty());

    let err = client.get_state_value("statestore", "nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceDoesNotExist);
}

#[tokio::test]
async fn sidecar_error_body_is_classified() {
    let (addr, _) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));

    let err = client.get_state("missing", "k").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamRequestFailed);
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(err.error_code(), "ERR_STATE_STORE_NOT_FOUND");
    assert_eq!(err.message(), "state store missing is not found");
}

#[tokio::test]
async fn secret_with_metadata_query() {
    let (addr, _) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));

    let secret = client
        .get_secret("vault", "db", Some("metadata.namespace=prod"))
        .await
        .unwrap();
    assert_eq!(secret["db"], json!("s3cr3t"));
    assert_eq!(secret["query"], json!("metadata.namespace=prod"));
}

#[tokio::test]
async fn empty_secret_store_is_not_found_and_missing_sidecar_is_unreachable() {
    let (addr, _) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));
    let not_found = client.get_secret("empty", "db", None).await.unwrap_err();
    assert_eq!(not_found.kind(), ErrorKind::ResourceDoesNotExist);
    assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

    let port = unused_port().await;
    let client = DaprClient::new(format!("http://127.0.0.1:{port}"));
    let unreachable = client.get_secret("vault", "db", None).await.unwrap_err();
    assert_eq!(unreachable.kind(), ErrorKind::SidecarUnreachable);
    assert_eq!(unreachable.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_ne!(unreachable.kind(), not_found.kind());
}

#[tokio::test]
async fn publish_and_binding_bodies() {
    let (addr, captured) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));

    client
        .publish_event("pubsub", "orders", Some(&json!({"id": 3})))
        .await
        .unwrap();

    let message = BindingMessage::new(json!("hello"))
        .with_binding("queue")
        .with_operation("create");
    let reply = client.send_to_binding(&message).await.unwrap();
    assert_eq!(&reply[..], b"done");

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies[0], ("publish/pubsub/orders".to_string(), json!({"id": 3})));
    assert_eq!(
        bodies[1],
        ("bindings/queue".to_string(), json!({"data": "hello", "operation": "create"}))
    );
}

#[tokio::test]
async fn publish_event_target_comes_from_event_or_defaults() {
    let (addr, captured) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));

    let mut event = PubSubEvent::new(json!({"n": 1}));
    event.topic = Some("returns".to_string());
    client.publish(&event, Some("pubsub"), Some("orders")).await.unwrap();

    let err = client
        .publish(&PubSubEvent::new(json!(1)), None, Some("orders"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0], ("publish/pubsub/returns".to_string(), json!({"n": 1})));
}

#[tokio::test]
async fn invoke_method_uses_verb() {
    let (addr, _) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));

    let reply = client
        .invoke_method("billing", "charge", Method::PUT, Some(&json!(5)))
        .await
        .unwrap();
    assert_eq!(&reply[..], b"PUT billing/charge 5");
}

#[tokio::test]
async fn metadata_document() {
    let (addr, _) = start_mock_sidecar().await;
    let client = DaprClient::new(format!("http://{addr}"));
    assert_eq!(client.get_metadata().await.unwrap()["id"], json!("app"));
}
