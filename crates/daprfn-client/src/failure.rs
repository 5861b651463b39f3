//! Mapping of sidecar responses and transport failures onto [`DaprError`].

use std::error::Error as StdError;
use std::io;

use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;
use tracing::warn;

use daprfn_core::error::codes;
use daprfn_core::{DaprError, DaprResult, ErrorKind};

const NOT_FOUND_MESSAGE: &str = "The requested Dapr resource is not properly configured.";
const NO_MESSAGE: &str = "No meaningful error message is returned.";
const INVALID_BODY_MESSAGE: &str =
    "The returned error message from Dapr Service is not a valid JSON Object.";

/// Turn a non-success sidecar response into a classified error.
///
/// The sidecar reports failures as `{"errorCode": "...", "message": "..."}`.
/// A 404 keeps its own code and message when present; any other status
/// keeps the raw status code.
pub fn check_status(status: StatusCode, body: &Bytes) -> DaprResult<()> {
    if status.is_success() {
        return Ok(());
    }

    warn!(%status, "Dapr sidecar returned an error");

    let mut error_code = None;
    let mut message = None;

    if !body.is_empty() {
        match serde_json::from_slice::<Value>(body) {
            Ok(parsed) => {
                error_code = text_field(&parsed, "errorCode");
                message = text_field(&parsed, "message");
            }
            Err(e) if status != StatusCode::NOT_FOUND => {
                return Err(DaprError::new(
                    ErrorKind::Unknown,
                    status,
                    codes::ERR_UNKNOWN,
                    INVALID_BODY_MESSAGE,
                )
                .with_source(e));
            }
            Err(_) => {}
        }
    }

    if status == StatusCode::NOT_FOUND {
        return Err(DaprError::resource_does_not_exist(
            error_code.unwrap_or_else(|| codes::ERR_DAPR_RESOURCE_DOES_NOT_EXIST.to_string()),
            message.unwrap_or_else(|| NOT_FOUND_MESSAGE.to_string()),
        ));
    }

    Err(DaprError::new(
        ErrorKind::UpstreamRequestFailed,
        status,
        error_code.unwrap_or_else(|| codes::ERR_UNKNOWN.to_string()),
        message.unwrap_or_else(|| NO_MESSAGE.to_string()),
    ))
}

/// Classify a transport failure (the request never got a response).
pub fn transport_error(err: hyper_util::client::legacy::Error) -> DaprError {
    if is_connection_refused(&err) {
        return DaprError::sidecar_unreachable().with_source(err);
    }
    DaprError::request_failed(format!("request to Dapr sidecar failed: {err}")).with_source(err)
}

/// Walk the error chain looking for `ECONNREFUSED`.
pub fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn text_field(value: &Value, name: &str) -> Option<String> {
    match value.get(name)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
