//! Error types for listener configuration and lifecycle.

use std::net::SocketAddr;

use http::Method;
use thiserror::Error;

/// Result type alias for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Errors raised while registering triggers or starting/stopping the server.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("route {method} {path} is already registered")]
    DuplicateRoute { method: Method, path: String },

    #[error("cannot add listeners after the host has been started")]
    LateRegistration,

    #[error("invalid trigger configuration: {0}")]
    InvalidTrigger(String),

    #[error("failed to bind Dapr callback listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener state transition failed: expected {expected}, found {found}")]
    StateConflict {
        expected: &'static str,
        found: &'static str,
    },
}
