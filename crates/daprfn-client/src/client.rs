//! Sidecar HTTP client.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use daprfn_core::error::codes;
use daprfn_core::{BindingMessage, DaprConfig, DaprError, DaprResult, PubSubEvent, StateRecord};

use crate::failure::{check_status, transport_error};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A successful sidecar response, fully buffered.
#[derive(Debug, Clone)]
pub struct SidecarResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Client for the sidecar's HTTP API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct DaprClient {
    base_address: String,
    http: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl DaprClient {
    /// Create a client for the sidecar at `base_address` (e.g. `http://localhost:3500`).
    pub fn new(base_address: impl Into<String>) -> Self {
        let base_address = base_address.into().trim_end_matches('/').to_string();
        Self {
            base_address,
            http: Client::builder(TokioExecutor::new()).build_http(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client for the sidecar named in `config`.
    pub fn from_config(config: &DaprConfig) -> Self {
        Self::new(config.sidecar_http_address())
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_address(&self) -> &str {
        &self.base_address
    }

    // ── State ──────────────────────────────────────────────────────

    /// Save a batch of records to a state store.
    pub async fn save_state(&self, store: &str, records: &[StateRecord]) -> DaprResult<()> {
        let body = to_json_body(records)?;
        let path = format!("/v1.0/state/{}", escape_segment(store));
        self.send(Method::POST, &path, Some(body)).await?;
        Ok(())
    }

    /// Read one key. An absent key yields an empty record, not an error.
    pub async fn get_state(&self, store: &str, key: &str) -> DaprResult<StateRecord> {
        let path = format!(
            "/v1.0/state/{}/{}",
            escape_segment(store),
            escape_segment(key)
        );
        let response = self.send(Method::GET, &path, None).await?;
        let etag = response
            .headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());
        Ok(StateRecord::from_response(key, response.body, etag))
    }

    /// Read one key and fail with `ResourceDoesNotExist` when it has no value.
    pub async fn get_state_value(&self, store: &str, key: &str) -> DaprResult<Value> {
        let record = self.get_state(store, key).await?;
        if record.is_empty() {
            return Err(DaprError::resource_does_not_exist(
                codes::ERR_DOES_NOT_EXIST,
                format!(
                    "Failed getting state with key {key} from state store {store}: state {key} not found."
                ),
            ));
        }
        Ok(record.value)
    }

    // ── Service invocation ─────────────────────────────────────────

    /// Invoke a method on another app through the sidecar.
    pub async fn invoke_method(
        &self,
        app_id: &str,
        method_name: &str,
        verb: Method,
        body: Option<&Value>,
    ) -> DaprResult<Bytes> {
        let body = body.map(to_json_body).transpose()?;
        let path = format!(
            "/v1.0/invoke/{}/method/{}",
            escape_segment(app_id),
            method_name.trim_start_matches('/')
        );
        let response = self.send(verb, &path, body).await?;
        Ok(response.body)
    }

    // ── Pub/sub ────────────────────────────────────────────────────

    /// Publish an event to a topic.
    pub async fn publish_event(
        &self,
        pubsub_name: &str,
        topic: &str,
        payload: Option<&Value>,
    ) -> DaprResult<()> {
        let body = payload.map(to_json_body).transpose()?;
        let path = format!(
            "/v1.0/publish/{}/{}",
            escape_segment(pubsub_name),
            escape_segment(topic)
        );
        self.send(Method::POST, &path, body).await?;
        Ok(())
    }

    /// Publish an event whose pub/sub and topic may come from defaults.
    pub async fn publish(
        &self,
        event: &PubSubEvent,
        default_pubsub: Option<&str>,
        default_topic: Option<&str>,
    ) -> DaprResult<()> {
        let (pubsub_name, topic) = event
            .resolve_target(default_pubsub, default_topic)
            .ok_or_else(|| {
                DaprError::bad_request(
                    "No pub/sub name or topic was found. Configure them on the binding or in the event.",
                )
            })?;
        self.publish_event(pubsub_name, topic, Some(&event.payload)).await
    }

    // ── Output bindings ────────────────────────────────────────────

    /// Send a message to an output binding. The binding is named on the message.
    pub async fn send_to_binding(&self, message: &BindingMessage) -> DaprResult<Bytes> {
        let binding = message
            .binding_name
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| DaprError::bad_request("No binding name was specified."))?;
        let body = to_json_body(message)?;
        let path = format!("/v1.0/bindings/{}", escape_segment(binding));
        let response = self.send(Method::POST, &path, Some(body)).await?;
        Ok(response.body)
    }

    // ── Secrets ────────────────────────────────────────────────────

    /// Fetch a secret. `metadata` is appended verbatim as the query string.
    pub async fn get_secret(
        &self,
        store: &str,
        key: &str,
        metadata: Option<&str>,
    ) -> DaprResult<Value> {
        if store.is_empty() {
            return Err(DaprError::bad_request("No secret store name was specified."));
        }
        if key.is_empty() {
            return Err(DaprError::bad_request("No secret key was specified."));
        }

        let mut path = format!(
            "/v1.0/secrets/{}/{}",
            escape_segment(store),
            escape_segment(key)
        );
        if let Some(query) = metadata.map(|m| m.trim_start_matches('?')).filter(|m| !m.is_empty()) {
            path.push('?');
            path.push_str(query);
        }

        let response = self.send(Method::GET, &path, None).await?;
        parse_json(&response.body)
    }

    // ── Metadata ───────────────────────────────────────────────────

    /// Fetch the sidecar's metadata document.
    pub async fn get_metadata(&self) -> DaprResult<Value> {
        let response = self.send(Method::GET, "/v1.0/metadata", None).await?;
        parse_json(&response.body)
    }

    // ── Transport ──────────────────────────────────────────────────

    /// Send a request and classify the outcome.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> DaprResult<SidecarResponse> {
        let uri = format!("{}{}", self.base_address, path);
        debug!(%method, %uri, "calling Dapr sidecar");

        let mut builder = Request::builder().method(method).uri(&uri);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| DaprError::bad_request(format!("invalid sidecar request: {e}")).with_source(e))?;

        let exchange = async {
            let response = self.http.request(request).await.map_err(transport_error)?;
            let (parts, incoming) = response.into_parts();
            let body = incoming
                .collect()
                .await
                .map_err(|e| {
                    DaprError::request_failed(format!("failed to read sidecar response: {e}"))
                        .with_source(e)
                })?
                .to_bytes();
            Ok::<_, DaprError>(SidecarResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                DaprError::request_failed(format!(
                    "request to Dapr sidecar timed out after {:?}",
                    self.timeout
                ))
            })??;

        check_status(response.status, &response.body)?;
        Ok(response)
    }
}

impl std::fmt::Debug for DaprClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaprClient")
            .field("base_address", &self.base_address)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn to_json_body<T: Serialize + ?Sized>(value: &T) -> DaprResult<Bytes> {
    serde_json::to_vec(value).map(Bytes::from).map_err(|e| {
        DaprError::bad_request(format!("Failed to serialize. Reason: {e}")).with_source(e)
    })
}

fn parse_json(body: &Bytes) -> DaprResult<Value> {
    serde_json::from_slice(body).map_err(|e| {
        DaprError::request_failed(format!("sidecar returned invalid JSON: {e}")).with_source(e)
    })
}

/// Percent-encode characters that would change the meaning of a URL path segment.
fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
