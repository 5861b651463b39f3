//! Destination shapes a trigger can bind its input to.

use std::any::Any;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Scalar destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Bool,
    Integer,
    Float,
    Text,
}

impl PrimitiveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Text => "text",
        }
    }
}

type DecodeFn = fn(Value) -> Result<Box<dyn Any + Send>, serde_json::Error>;
type ZeroFn = fn() -> Box<dyn Any + Send>;

/// Type-erased decoder for a user-defined structure.
#[derive(Clone, Copy)]
pub struct Schema {
    type_name: &'static str,
    decode: DecodeFn,
    zero: ZeroFn,
}

impl Schema {
    /// Schema for `T`; `T::default()` is the zero value for empty bodies.
    pub fn of<T>() -> Self
    where
        T: DeserializeOwned + Default + Send + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            decode: |value| {
                serde_json::from_value::<T>(value).map(|t| Box::new(t) as Box<dyn Any + Send>)
            },
            zero: || Box::new(T::default()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn decode(&self, value: Value) -> Result<Box<dyn Any + Send>, serde_json::Error> {
        (self.decode)(value)
    }

    pub fn zero(&self) -> Box<dyn Any + Send> {
        (self.zero)()
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Schema").field(&self.type_name).finish()
    }
}

/// What a trigger's input is converted into before the function runs.
#[derive(Debug, Clone)]
pub enum DestinationShape {
    Primitive(PrimitiveKind),
    /// Whole body buffered into bytes.
    RawBytes,
    /// Body handed over unread.
    RawStream,
    /// Parsed JSON tree.
    GenericJson,
    Structured(Schema),
    /// The full pub/sub envelope instead of its `data` field.
    TopicEnvelope,
}

impl DestinationShape {
    pub fn structured<T>() -> Self
    where
        T: DeserializeOwned + Default + Send + 'static,
    {
        DestinationShape::Structured(Schema::of::<T>())
    }

    pub fn text() -> Self {
        DestinationShape::Primitive(PrimitiveKind::Text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DestinationShape::Primitive(kind) => kind.as_str(),
            DestinationShape::RawBytes => "bytes",
            DestinationShape::RawStream => "stream",
            DestinationShape::GenericJson => "json",
            DestinationShape::Structured(schema) => schema.type_name(),
            DestinationShape::TopicEnvelope => "topic envelope",
        }
    }
}
