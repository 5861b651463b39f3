//! Per-request invocation values handed to functions.

use std::any::Any;
use std::collections::HashMap;

use axum::body::Body;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use serde_json::Value;

use daprfn_core::TopicEnvelope;

/// A request body after conversion to the trigger's destination shape.
pub enum InvocationValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
    Stream(Body),
    Json(Value),
    Structured(Box<dyn Any + Send>),
    Envelope(TopicEnvelope),
}

impl InvocationValue {
    /// Take a structured value out as `T`; hands the value back on mismatch.
    pub fn into_structured<T: 'static>(self) -> Result<T, InvocationValue> {
        match self {
            InvocationValue::Structured(boxed) => boxed
                .downcast::<T>()
                .map(|t| *t)
                .map_err(InvocationValue::Structured),
            other => Err(other),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            InvocationValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            InvocationValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            InvocationValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InvocationValue::Null => "null",
            InvocationValue::Bool(_) => "bool",
            InvocationValue::Integer(_) => "integer",
            InvocationValue::Float(_) => "float",
            InvocationValue::Text(_) => "text",
            InvocationValue::Bytes(_) => "bytes",
            InvocationValue::Stream(_) => "stream",
            InvocationValue::Json(_) => "json",
            InvocationValue::Structured(_) => "structured",
            InvocationValue::Envelope(_) => "envelope",
        }
    }
}

impl std::fmt::Debug for InvocationValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationValue::Null => f.write_str("Null"),
            InvocationValue::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            InvocationValue::Integer(n) => f.debug_tuple("Integer").field(n).finish(),
            InvocationValue::Float(x) => f.debug_tuple("Float").field(x).finish(),
            InvocationValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
            InvocationValue::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            InvocationValue::Stream(_) => f.write_str("Stream(..)"),
            InvocationValue::Json(v) => f.debug_tuple("Json").field(v).finish(),
            InvocationValue::Structured(_) => f.write_str("Structured(..)"),
            InvocationValue::Envelope(e) => f.debug_tuple("Envelope").field(e).finish(),
        }
    }
}

/// Named values available to binding expressions. Lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingData {
    values: HashMap<String, Value>,
}

impl BindingData {
    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything a function sees about one inbound request.
#[derive(Debug)]
pub struct InvocationContext {
    pub function: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub value: InvocationValue,
    pub binding_data: BindingData,
}

impl InvocationContext {
    /// Context with just a value, for calling functions outside the listener.
    pub fn from_value(function: impl Into<String>, value: InvocationValue) -> Self {
        Self {
            function: function.into(),
            method: Method::POST,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            value,
            binding_data: BindingData::default(),
        }
    }
}
