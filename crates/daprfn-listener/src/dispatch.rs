//! Per-trigger dispatch: convert the request, invoke the function, write
//! the outcome back.

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::convert::{self, ConvertError, PayloadFormat};
use crate::function::{Function, FunctionError, InvocationOutput};
use crate::invocation::{BindingData, InvocationContext};
use crate::trigger::TriggerKind;

/// Invokes one function for requests routed to its trigger.
pub struct DispatchHandler {
    function: Function,
    trigger: TriggerKind,
    format: PayloadFormat,
    binding_values: Vec<(String, Value)>,
}

impl DispatchHandler {
    pub fn new(function: Function, trigger: TriggerKind) -> Self {
        let format = match trigger {
            TriggerKind::Topic => PayloadFormat::TopicEnvelope,
            TriggerKind::Binding | TriggerKind::ServiceInvocation => PayloadFormat::Plain,
        };
        Self {
            function,
            trigger,
            format,
            binding_values: Vec::new(),
        }
    }

    /// A value exposed to binding expressions on every invocation.
    pub fn with_binding_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.binding_values.push((name.into(), value));
        self
    }

    pub fn function_name(&self) -> &str {
        self.function.name()
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    /// Handle one request. Always produces a response; if the caller has
    /// already gone away the future is dropped and the function task is
    /// aborted instead.
    pub async fn dispatch(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let function = self.function.name();
        let content_length = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        debug!(
            function,
            trigger = %self.trigger,
            method = %parts.method,
            path = %parts.uri.path(),
            "dispatching request"
        );

        let converted =
            match convert::convert_request(body, content_length, self.function.shape(), self.format).await {
                Ok(converted) => converted,
                Err(e) => return self.conversion_failed(e),
            };

        let mut binding_data = BindingData::default();
        for (name, value) in &self.binding_values {
            binding_data.insert(name, value.clone());
        }
        for (name, value) in converted.attributes {
            binding_data.insert(&name, value);
        }
        binding_data.insert(self.function.parameter(), converted.json.unwrap_or(Value::Null));

        let ctx = InvocationContext {
            function: function.to_string(),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            value: converted.value,
            binding_data,
        };

        let handler = self.function.handler();
        let mut task = tokio::spawn(handler(ctx));
        let guard = AbortOnDrop::new(task.abort_handle(), function);
        let joined = (&mut task).await;
        guard.disarm();

        match joined {
            Ok(Ok(output)) => render_output(output),
            Ok(Err(e)) => render_error(function, e),
            Err(join) => {
                error!(function, error = %join, "function task did not complete");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Function invocation failed: {join}"),
                )
                    .into_response()
            }
        }
    }

    fn conversion_failed(&self, err: ConvertError) -> Response {
        let function = self.function.name();
        if err.is_aborted() {
            // An empty 400 is the answer for a body that fails mid-read; hyper
            // drops it when the peer has already gone.
            warn!(
                function,
                error = %err,
                "request body could not be read (caller likely disconnected); answering 400 without a body"
            );
            return StatusCode::BAD_REQUEST.into_response();
        }

        debug!(function, error = %err, "request body conversion failed");
        (
            StatusCode::BAD_REQUEST,
            format!(
                "Failed to convert request body to {}: {err}",
                self.function.shape().name()
            ),
        )
            .into_response()
    }
}

impl std::fmt::Debug for DispatchHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandler")
            .field("function", &self.function.name())
            .field("trigger", &self.trigger)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Aborts the function task if the dispatch future is dropped before the
/// task finishes, which is what happens when the caller disconnects.
struct AbortOnDrop<'a> {
    handle: Option<AbortHandle>,
    function: &'a str,
}

impl<'a> AbortOnDrop<'a> {
    fn new(handle: AbortHandle, function: &'a str) -> Self {
        Self {
            handle: Some(handle),
            function,
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for AbortOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(function = self.function, "caller disconnected; cancelling function invocation");
            handle.abort();
        }
    }
}

fn render_output(output: Option<InvocationOutput>) -> Response {
    match output {
        None => StatusCode::OK.into_response(),
        Some(InvocationOutput::Json(value)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            value.to_string(),
        )
            .into_response(),
        Some(InvocationOutput::Bytes(bytes)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))],
            bytes,
        )
            .into_response(),
        Some(InvocationOutput::Stream(body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))],
            body,
        )
            .into_response(),
    }
}

fn render_error(function: &str, err: FunctionError) -> Response {
    if let Some(dapr) = err.dapr_error() {
        warn!(
            function,
            status = %dapr.status(),
            code = dapr.error_code(),
            "function failed with sidecar error"
        );
        return (error_status(dapr.status()), dapr.message().to_string()).into_response();
    }

    match err {
        FunctionError::Cancelled => {
            warn!(function, "function invocation was cancelled");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Function invocation was cancelled".to_string(),
            )
                .into_response()
        }
        other => {
            error!(function, error = %other, "function invocation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Function invocation failed: {other}"),
            )
                .into_response()
        }
    }
}

/// Sidecar statuses pass through only when they are 4xx or 5xx.
fn error_status(status: StatusCode) -> StatusCode {
    if status.is_client_error() || status.is_server_error() {
        status
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
