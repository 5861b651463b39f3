//! daprfn-listener: embedded callback listener for the Dapr sidecar.
//!
//! Functions are bound to triggers ([`Trigger`]); each bound trigger
//! contributes routes to one shared [`DaprServiceListener`]. The listener
//! starts its HTTP server on the first trigger start and stops it when the
//! last trigger stops.
//!
//! Inbound requests are matched against the route table, converted into
//! the function's declared [`DestinationShape`], and the function's result
//! or error is written back as the response.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use daprfn_core::{DaprConfig, Settings};
//! use daprfn_listener::{DaprServiceListener, DestinationShape, Function, InvocationOutput, Trigger};
//!
//! let listener = DaprServiceListener::new(DaprConfig::from_env());
//! let echo = Function::new("echo", DestinationShape::GenericJson, |ctx| async move {
//!     Ok(ctx.value.as_json().cloned().map(InvocationOutput::Json))
//! });
//! let handle = Trigger::service_invocation().bind(echo, &listener, &Settings::from_env())?;
//! handle.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod convert;
pub mod dispatch;
pub mod error;
pub mod function;
pub mod invocation;
pub mod listener;
pub mod registry;
pub mod route;
pub mod server;
pub mod shape;
pub mod sidecar_check;
pub mod trigger;

pub use convert::{ConvertError, PayloadFormat};
pub use dispatch::DispatchHandler;
pub use error::{ListenerError, ListenerResult};
pub use function::{Function, FunctionError, FunctionResult, InvocationOutput};
pub use invocation::{BindingData, InvocationContext, InvocationValue};
pub use listener::{DaprServiceListener, RegisteredListener, ServerState};
pub use registry::TopicRegistry;
pub use route::{ListenerId, Route, RouteTable};
pub use shape::{DestinationShape, PrimitiveKind, Schema};
pub use trigger::{Trigger, TriggerHandle, TriggerKind};
