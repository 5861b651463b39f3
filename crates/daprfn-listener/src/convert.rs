//! Binding converter: request body → destination shape.
//!
//! Rules apply in order and the first match wins:
//!
//! 1. empty body → the shape's zero value
//! 2. raw stream → body handed over unread
//! 3. raw bytes → body buffered
//! 4. otherwise parse JSON, then
//!    - generic JSON → the parsed tree
//!    - text → the string, or the compact JSON text of a non-string root
//!    - anything else → deserialize into the shape
//!
//! Topic deliveries arrive wrapped in a CloudEvents envelope. Unless the
//! destination is the envelope itself, the rules run on its `data` field.

use axum::body::Body;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use daprfn_core::TopicEnvelope;

use crate::invocation::InvocationValue;
use crate::shape::{DestinationShape, PrimitiveKind};

/// How the request body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Plain,
    TopicEnvelope,
}

/// A body that could not be turned into the destination shape.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("cannot convert JSON {found} to {expected}")]
    Mismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("failed to deserialize request body into {type_name}: {source}")]
    Deserialize {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),
}

impl ConvertError {
    /// The body could not be read, most likely because the caller went away.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ConvertError::Body(_))
    }
}

/// A converted body plus what binding expressions may see of it.
#[derive(Debug)]
pub struct Converted {
    pub value: InvocationValue,
    /// JSON form of the value, when it has one.
    pub json: Option<Value>,
    /// Envelope attributes for topic deliveries (`id`, `topic`, `pubsubname`).
    pub attributes: Vec<(String, Value)>,
}

impl Converted {
    fn new(value: InvocationValue, json: Option<Value>) -> Self {
        Self {
            value,
            json,
            attributes: Vec::new(),
        }
    }
}

/// Convert an inbound request body.
///
/// `content_length` is the declared length, if any; a declared zero means
/// the body is not read at all.
pub async fn convert_request(
    body: Body,
    content_length: Option<u64>,
    shape: &DestinationShape,
    format: PayloadFormat,
) -> Result<Converted, ConvertError> {
    if content_length == Some(0) {
        return Ok(zero_value(shape));
    }

    if format == PayloadFormat::Plain && matches!(shape, DestinationShape::RawStream) {
        return Ok(Converted::new(InvocationValue::Stream(body), None));
    }

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(ConvertError::Body)?;

    match format {
        PayloadFormat::Plain => convert_bytes(bytes, shape),
        PayloadFormat::TopicEnvelope => convert_topic_bytes(bytes, shape),
    }
}

/// Convert a fully buffered body.
pub fn convert_bytes(bytes: Bytes, shape: &DestinationShape) -> Result<Converted, ConvertError> {
    if bytes.is_empty() {
        return Ok(zero_value(shape));
    }

    match shape {
        DestinationShape::RawStream => Ok(Converted::new(
            InvocationValue::Stream(Body::from(bytes)),
            None,
        )),
        DestinationShape::RawBytes => Ok(Converted::new(InvocationValue::Bytes(bytes), None)),
        _ => convert_json(parse(&bytes)?, shape),
    }
}

/// Convert a buffered pub/sub delivery.
pub fn convert_topic_bytes(bytes: Bytes, shape: &DestinationShape) -> Result<Converted, ConvertError> {
    if bytes.is_empty() {
        return Ok(zero_value(shape));
    }

    let root = parse(&bytes)?;
    let attributes = envelope_attributes(&root);

    let mut converted = match (shape, root) {
        (DestinationShape::TopicEnvelope, root) => convert_json(root, shape)?,
        (_, Value::Object(mut map)) if map.contains_key("data") => {
            match map.remove("data").unwrap_or(Value::Null) {
                Value::Null => zero_value(shape),
                data => convert_json(data, shape)?,
            }
        }
        (_, root) => convert_json(root, shape)?,
    };
    converted.attributes = attributes;
    Ok(converted)
}

/// Convert an already-parsed JSON value.
pub fn convert_json(value: Value, shape: &DestinationShape) -> Result<Converted, ConvertError> {
    let converted = match shape {
        DestinationShape::GenericJson => {
            Converted::new(InvocationValue::Json(value.clone()), Some(value))
        }
        DestinationShape::Primitive(PrimitiveKind::Text) => {
            let text = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Converted::new(InvocationValue::Text(text), Some(value))
        }
        DestinationShape::Primitive(kind) => {
            let primitive = coerce_primitive(*kind, &value)?;
            Converted::new(primitive, Some(value))
        }
        DestinationShape::RawBytes => {
            Converted::new(InvocationValue::Bytes(json_bytes(&value)), None)
        }
        DestinationShape::RawStream => Converted::new(
            InvocationValue::Stream(Body::from(json_bytes(&value))),
            None,
        ),
        DestinationShape::Structured(schema) => {
            let decoded = schema
                .decode(value.clone())
                .map_err(|source| ConvertError::Deserialize {
                    type_name: schema.type_name(),
                    source,
                })?;
            Converted::new(InvocationValue::Structured(decoded), Some(value))
        }
        DestinationShape::TopicEnvelope => {
            if !value.is_object() {
                return Err(ConvertError::Mismatch {
                    expected: "topic envelope",
                    found: json_kind(&value),
                });
            }
            let envelope: TopicEnvelope = serde_json::from_value(value.clone()).map_err(|source| {
                ConvertError::Deserialize {
                    type_name: "TopicEnvelope",
                    source,
                }
            })?;
            Converted::new(InvocationValue::Envelope(envelope), Some(value))
        }
    };
    Ok(converted)
}

/// Zero value of a shape, used for empty bodies.
pub fn zero_value(shape: &DestinationShape) -> Converted {
    let value = match shape {
        DestinationShape::Primitive(PrimitiveKind::Bool) => InvocationValue::Bool(false),
        DestinationShape::Primitive(PrimitiveKind::Integer) => InvocationValue::Integer(0),
        DestinationShape::Primitive(PrimitiveKind::Float) => InvocationValue::Float(0.0),
        DestinationShape::Primitive(PrimitiveKind::Text) => InvocationValue::Null,
        DestinationShape::RawBytes => InvocationValue::Bytes(Bytes::new()),
        DestinationShape::RawStream => InvocationValue::Stream(Body::empty()),
        DestinationShape::GenericJson => InvocationValue::Json(Value::Null),
        DestinationShape::Structured(schema) => InvocationValue::Structured(schema.zero()),
        DestinationShape::TopicEnvelope => InvocationValue::Envelope(TopicEnvelope::default()),
    };
    Converted::new(value, None)
}

fn parse(bytes: &[u8]) -> Result<Value, ConvertError> {
    serde_json::from_slice(bytes).map_err(ConvertError::InvalidJson)
}

/// Scalars convert directly; an object carrying a `value` member (the
/// state-record shape) converts through that member.
fn coerce_primitive(kind: PrimitiveKind, value: &Value) -> Result<InvocationValue, ConvertError> {
    let target = match value {
        Value::Object(map) => map.get("value").unwrap_or(value),
        other => other,
    };

    let mismatch = || ConvertError::Mismatch {
        expected: kind.as_str(),
        found: json_kind(target),
    };

    match (kind, target) {
        (PrimitiveKind::Bool, Value::Null) => Ok(InvocationValue::Bool(false)),
        (PrimitiveKind::Integer, Value::Null) => Ok(InvocationValue::Integer(0)),
        (PrimitiveKind::Float, Value::Null) => Ok(InvocationValue::Float(0.0)),

        (PrimitiveKind::Bool, Value::Bool(b)) => Ok(InvocationValue::Bool(*b)),
        (PrimitiveKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(InvocationValue::Bool(true)),
            "false" => Ok(InvocationValue::Bool(false)),
            _ => Err(mismatch()),
        },

        // Whole floats inside the open i64 range only; the bounds round to
        // +-2^63 as f64 and would otherwise saturate.
        (PrimitiveKind::Integer, Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|_| n.is_f64())
                    .filter(|f| f.fract() == 0.0 && *f > i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(InvocationValue::Integer)
            .ok_or_else(mismatch),
        (PrimitiveKind::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(InvocationValue::Integer)
            .map_err(|_| mismatch()),

        (PrimitiveKind::Float, Value::Number(n)) => {
            n.as_f64().map(InvocationValue::Float).ok_or_else(mismatch)
        }
        (PrimitiveKind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(InvocationValue::Float)
            .map_err(|_| mismatch()),

        _ => Err(mismatch()),
    }
}

fn json_bytes(value: &Value) -> Bytes {
    match value {
        Value::String(s) => Bytes::from(s.clone().into_bytes()),
        other => Bytes::from(other.to_string().into_bytes()),
    }
}

fn envelope_attributes(root: &Value) -> Vec<(String, Value)> {
    ["id", "topic", "pubsubname"]
        .into_iter()
        .filter_map(|name| {
            root.get(name)
                .filter(|v| v.is_string())
                .map(|v| (name.to_string(), v.clone()))
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    struct Order {
        id: u32,
        #[serde(default)]
        items: Vec<String>,
    }

    fn bytes(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn empty_body_gives_zero_values() {
        let order = convert_bytes(Bytes::new(), &DestinationShape::structured::<Order>())
            .unwrap()
            .value
            .into_structured::<Order>()
            .unwrap();
        assert_eq!(order, Order::default());

        let n = convert_bytes(Bytes::new(), &DestinationShape::Primitive(PrimitiveKind::Integer))
            .unwrap();
        assert_eq!(n.value.as_i64(), Some(0));

        let text = convert_bytes(Bytes::new(), &DestinationShape::text()).unwrap();
        assert!(matches!(text.value, InvocationValue::Null));

        let json = convert_bytes(Bytes::new(), &DestinationShape::GenericJson).unwrap();
        assert_eq!(json.value.as_json(), Some(&Value::Null));
    }

    #[tokio::test]
    async fn declared_zero_length_is_not_read() {
        let converted = convert_request(
            Body::from("ignored"),
            Some(0),
            &DestinationShape::RawBytes,
            PayloadFormat::Plain,
        )
        .await
        .unwrap();
        assert!(matches!(converted.value, InvocationValue::Bytes(b) if b.is_empty()));
    }

    #[tokio::test]
    async fn raw_stream_is_passed_through_unread() {
        let converted = convert_request(
            Body::from("not json at all"),
            None,
            &DestinationShape::RawStream,
            PayloadFormat::Plain,
        )
        .await
        .unwrap();
        let InvocationValue::Stream(body) = converted.value else {
            panic!("expected stream");
        };
        let read = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&read[..], b"not json at all");
    }

    #[test]
    fn raw_bytes_are_buffered_verbatim() {
        let converted = convert_bytes(bytes("\u{1}binary"), &DestinationShape::RawBytes).unwrap();
        assert!(matches!(converted.value, InvocationValue::Bytes(b) if &b[..] == b"\x01binary"));
    }

    #[test]
    fn generic_json_is_the_parsed_tree() {
        let converted = convert_bytes(bytes(r#"{"a":[1,2,{"b":null}]}"#), &DestinationShape::GenericJson)
            .unwrap();
        assert_eq!(converted.value.as_json(), Some(&json!({"a": [1, 2, {"b": null}]})));
    }

    #[test]
    fn text_from_non_string_root_is_compact_json() {
        let converted = convert_bytes(bytes("{ \"a\" : 1 }"), &DestinationShape::text()).unwrap();
        assert_eq!(converted.value.as_text(), Some(r#"{"a":1}"#));

        let converted = convert_bytes(bytes("\"plain\""), &DestinationShape::text()).unwrap();
        assert_eq!(converted.value.as_text(), Some("plain"));
    }

    #[test]
    fn integer_from_state_record_shape() {
        let shape = DestinationShape::Primitive(PrimitiveKind::Integer);
        let converted = convert_bytes(bytes(r#"{"value":42}"#), &shape).unwrap();
        assert_eq!(converted.value.as_i64(), Some(42));

        let converted = convert_bytes(bytes("42"), &shape).unwrap();
        assert_eq!(converted.value.as_i64(), Some(42));

        let converted = convert_bytes(bytes("\"17\""), &shape).unwrap();
        assert_eq!(converted.value.as_i64(), Some(17));
    }

    #[test]
    fn integer_rejects_fractions_and_objects() {
        let shape = DestinationShape::Primitive(PrimitiveKind::Integer);
        assert!(matches!(
            convert_bytes(bytes("1.5"), &shape),
            Err(ConvertError::Mismatch { .. })
        ));
        assert!(matches!(
            convert_bytes(bytes(r#"{"other":1}"#), &shape),
            Err(ConvertError::Mismatch { .. })
        ));
    }

    #[test]
    fn integer_out_of_range_is_rejected_not_clamped() {
        let shape = DestinationShape::Primitive(PrimitiveKind::Integer);
        for input in [
            "9223372036854775808",
            "9223372036854775900",
            "18446744073709551615",
            "-9223372036854775809",
            "9.3e18",
            r#"{"value":9223372036854775808}"#,
        ] {
            assert!(
                matches!(convert_bytes(bytes(input), &shape), Err(ConvertError::Mismatch { .. })),
                "{input} should not convert"
            );
        }

        let max = convert_bytes(bytes("9223372036854775807"), &shape).unwrap().value;
        assert!(matches!(max, InvocationValue::Integer(i64::MAX)));
        let min = convert_bytes(bytes("-9223372036854775808"), &shape).unwrap().value;
        assert!(matches!(min, InvocationValue::Integer(i64::MIN)));
        let whole = convert_bytes(bytes("4.0"), &shape).unwrap().value;
        assert!(matches!(whole, InvocationValue::Integer(4)));
    }

    #[test]
    fn bool_and_float() {
        let b = convert_bytes(bytes("\"TRUE\""), &DestinationShape::Primitive(PrimitiveKind::Bool))
            .unwrap();
        assert!(matches!(b.value, InvocationValue::Bool(true)));

        let f = convert_bytes(bytes("2.5"), &DestinationShape::Primitive(PrimitiveKind::Float))
            .unwrap();
        assert!(matches!(f.value, InvocationValue::Float(x) if x == 2.5));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = convert_bytes(bytes("{not json"), &DestinationShape::structured::<Order>())
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidJson(_)));
        assert!(!err.is_aborted());
    }

    #[test]
    fn structure_mismatch_is_a_deserialize_error() {
        let err = convert_bytes(bytes(r#"{"id":"seven"}"#), &DestinationShape::structured::<Order>())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Deserialize { .. }));
    }

    #[test]
    fn topic_data_is_unwrapped() {
        let body = bytes(
            r#"{"id":"e1","topic":"orders","pubsubname":"pubsub","data":{"id":9,"items":["x"]}}"#,
        );
        let converted = convert_topic_bytes(body, &DestinationShape::structured::<Order>()).unwrap();
        assert_eq!(
            converted.attributes,
            vec![
                ("id".to_string(), json!("e1")),
                ("topic".to_string(), json!("orders")),
                ("pubsubname".to_string(), json!("pubsub")),
            ]
        );
        let order = converted.value.into_structured::<Order>().unwrap();
        assert_eq!(order, Order { id: 9, items: vec!["x".into()] });
    }

    #[test]
    fn topic_envelope_destination_gets_everything() {
        let body = bytes(r#"{"id":"e1","specversion":"1.0","data":"hi"}"#);
        let converted = convert_topic_bytes(body, &DestinationShape::TopicEnvelope).unwrap();
        let InvocationValue::Envelope(envelope) = converted.value else {
            panic!("expected envelope");
        };
        assert_eq!(envelope.id.as_deref(), Some("e1"));
        assert_eq!(envelope.data, json!("hi"));
    }

    #[test]
    fn topic_without_data_falls_back_to_root() {
        let converted = convert_topic_bytes(bytes(r#"{"id":3}"#), &DestinationShape::structured::<Order>())
            .unwrap();
        assert_eq!(converted.value.into_structured::<Order>().unwrap().id, 3);
    }

    #[test]
    fn topic_null_data_is_zero_value() {
        let converted = convert_topic_bytes(
            bytes(r#"{"id":"e","data":null}"#),
            &DestinationShape::Primitive(PrimitiveKind::Integer),
        )
        .unwrap();
        assert_eq!(converted.value.as_i64(), Some(0));
    }

    #[test]
    fn topic_string_data_to_bytes() {
        let converted = convert_topic_bytes(bytes(r#"{"data":"raw text"}"#), &DestinationShape::RawBytes)
            .unwrap();
        assert!(matches!(converted.value, InvocationValue::Bytes(b) if &b[..] == b"raw text"));
    }
}
