//! Functions: the downstream handlers triggers invoke.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use daprfn_core::DaprError;

use crate::invocation::{InvocationContext, InvocationValue};
use crate::shape::DestinationShape;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What a function hands back for the response body.
pub enum InvocationOutput {
    /// Serialized as the JSON response body.
    Json(Value),
    /// Written as-is.
    Bytes(Bytes),
    /// Streamed as-is.
    Stream(Body),
}

impl InvocationOutput {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, FunctionError> {
        serde_json::to_value(value)
            .map(InvocationOutput::Json)
            .map_err(|e| FunctionError::Other(e.into()))
    }
}

impl std::fmt::Debug for InvocationOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationOutput::Json(v) => f.debug_tuple("Json").field(v).finish(),
            InvocationOutput::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            InvocationOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Ways a function invocation can fail.
///
/// Cancellation is its own variant so it is never rendered like a
/// sidecar error.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("function invocation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Dapr(#[from] DaprError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FunctionError {
    /// The sidecar error carried by this failure, directly or inside `Other`.
    pub fn dapr_error(&self) -> Option<&DaprError> {
        match self {
            FunctionError::Dapr(e) => Some(e),
            FunctionError::Other(e) => e.downcast_ref::<DaprError>(),
            FunctionError::Cancelled => None,
        }
    }
}

pub type FunctionResult = Result<Option<InvocationOutput>, FunctionError>;

/// Type-erased function body.
pub type FunctionHandler = Arc<dyn Fn(InvocationContext) -> BoxFuture<FunctionResult> + Send + Sync>;

/// A named function plus the shape its input is converted to.
#[derive(Clone)]
pub struct Function {
    name: String,
    parameter: String,
    shape: DestinationShape,
    handler: FunctionHandler,
}

impl Function {
    /// Wrap an async closure that receives the whole invocation context.
    pub fn new<F, Fut>(name: impl Into<String>, shape: DestinationShape, f: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FunctionResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            parameter: "input".to_string(),
            shape,
            handler: Arc::new(move |ctx: InvocationContext| -> BoxFuture<FunctionResult> {
                Box::pin(f(ctx))
            }),
        }
    }

    /// Wrap an async closure over a deserialized `T` whose result is
    /// serialized back as JSON. `()` results produce an empty body.
    pub fn typed<T, R, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        T: DeserializeOwned + Default + Send + 'static,
        R: Serialize + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FunctionError>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, DestinationShape::structured::<T>(), move |ctx| {
            let f = f.clone();
            async move {
                let input = match ctx.value.into_structured::<T>() {
                    Ok(input) => input,
                    Err(other) => {
                        return Err(FunctionError::Other(anyhow::anyhow!(
                            "expected {} input, got {}",
                            std::any::type_name::<T>(),
                            other.kind()
                        )));
                    }
                };
                let output = f(input).await?;
                let value = serde_json::to_value(&output).map_err(|e| FunctionError::Other(e.into()))?;
                Ok(match value {
                    Value::Null => None,
                    value => Some(InvocationOutput::Json(value)),
                })
            }
        })
    }

    /// Name the input for binding expressions (defaults to `input`).
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = parameter.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn shape(&self) -> &DestinationShape {
        &self.shape
    }

    pub fn handler(&self) -> FunctionHandler {
        self.handler.clone()
    }

    /// Run the function directly.
    pub async fn call(&self, ctx: InvocationContext) -> FunctionResult {
        (self.handler)(ctx).await
    }

    /// Run the function on a bare value.
    pub async fn call_with(&self, value: InvocationValue) -> FunctionResult {
        self.call(InvocationContext::from_value(self.name.clone(), value)).await
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("parameter", &self.parameter)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}
