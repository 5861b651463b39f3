//! daprfn-client: outbound calls from functions to the Dapr sidecar.
//!
//! Every call goes through one HTTP/1.1 connection pool and one failure
//! path: a non-success status is turned into a classified
//! [`DaprError`](daprfn_core::DaprError), and a refused connection is
//! reported as [`ErrorKind::SidecarUnreachable`](daprfn_core::ErrorKind)
//! so "the sidecar is not running" can be told apart from a bad request.
//!
//! | Operation | Sidecar endpoint |
//! |---|---|
//! | `save_state` | `POST /v1.0/state/{store}` |
//! | `get_state` | `GET /v1.0/state/{store}/{key}` |
//! | `invoke_method` | `{verb} /v1.0/invoke/{app}/method/{method}` |
//! | `publish_event` | `POST /v1.0/publish/{pubsub}/{topic}` |
//! | `send_to_binding` | `POST /v1.0/bindings/{binding}` |
//! | `get_secret` | `GET /v1.0/secrets/{store}/{key}?{metadata}` |
//! | `get_metadata` | `GET /v1.0/metadata` |

pub mod client;
pub mod failure;

pub use client::{DaprClient, SidecarResponse};
