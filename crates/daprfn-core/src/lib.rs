//! daprfn-core: shared building blocks for the Dapr function bridge.
//!
//! Both halves of the bridge depend on this crate: the inbound callback
//! listener (`daprfn-listener`) and the outbound sidecar client
//! (`daprfn-client`). It holds the error taxonomy they share, the
//! environment-driven configuration, and the JSON wire types exchanged
//! with the sidecar.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DaprConfig, Settings};
pub use error::{DaprError, DaprResult, ErrorKind};
pub use types::*;
