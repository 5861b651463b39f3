//! Error taxonomy shared by inbound dispatch and outbound sidecar calls.

use std::error::Error as StdError;

use http::StatusCode;
use thiserror::Error;

/// Result type alias for sidecar-facing operations.
pub type DaprResult<T> = Result<T, DaprError>;

/// Error codes carried on the wire and in [`DaprError::error_code`].
pub mod codes {
    pub const ERR_DAPR_SIDECAR_DOES_NOT_EXIST: &str = "ERR_DAPR_SIDECAR_DOES_NOT_EXIST";
    pub const ERR_DAPR_REQUEST_FAILED: &str = "ERR_DAPR_REQUEST_FAILED";
    pub const ERR_DAPR_RESOURCE_DOES_NOT_EXIST: &str = "ERR_DAPR_RESOURCE_DOES_NOT_EXIST";
    pub const ERR_DAPR_BAD_REQUEST: &str = "ERR_DAPR_BAD_REQUEST";
    pub const ERR_DOES_NOT_EXIST: &str = "ERR_DOES_NOT_EXIST";
    pub const ERR_UNKNOWN: &str = "ERR_UNKNOWN";
}

/// Closed classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request could not be serialized or its payload was malformed.
    BadRequest,
    /// The sidecar answered 404 for the requested resource.
    ResourceDoesNotExist,
    /// The sidecar process refused the connection; it is most likely not running.
    SidecarUnreachable,
    /// The sidecar answered with a non-success status, or the transport failed.
    UpstreamRequestFailed,
    /// The sidecar's error response could not be interpreted.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ResourceDoesNotExist => "resource_does_not_exist",
            ErrorKind::SidecarUnreachable => "sidecar_unreachable",
            ErrorKind::UpstreamRequestFailed => "upstream_request_failed",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error carrying an HTTP status and a sidecar error code.
///
/// When one of these escapes a function, the dispatch handler mirrors
/// `status` and `message` onto the callback response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DaprError {
    kind: ErrorKind,
    status: StatusCode,
    code: String,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl DaprError {
    /// Build an error with every field explicit.
    pub fn new(
        kind: ErrorKind,
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status,
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::BadRequest,
            StatusCode::BAD_REQUEST,
            codes::ERR_DAPR_BAD_REQUEST,
            message,
        )
    }

    pub fn resource_does_not_exist(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ResourceDoesNotExist,
            StatusCode::NOT_FOUND,
            code,
            message,
        )
    }

    /// The sidecar refused the connection.
    pub fn sidecar_unreachable() -> Self {
        Self::new(
            ErrorKind::SidecarUnreachable,
            StatusCode::SERVICE_UNAVAILABLE,
            codes::ERR_DAPR_SIDECAR_DOES_NOT_EXIST,
            "Dapr sidecar is not present; start the sidecar or check DAPR_HTTP_PORT/DAPR_HTTP_HOST.",
        )
    }

    /// A transport or sidecar failure that is not otherwise classified.
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UpstreamRequestFailed,
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::ERR_DAPR_REQUEST_FAILED,
            message,
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn error_code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure points at infrastructure (no sidecar) rather than
    /// the request itself.
    pub fn is_sidecar_unreachable(&self) -> bool {
        self.kind == ErrorKind::SidecarUnreachable
    }
}
