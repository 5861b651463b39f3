//! JSON wire types exchanged with the sidecar.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Topic subscriptions ────────────────────────────────────────

/// A `(pubsub, topic, route)` triple advertised on `/dapr/subscribe`.
///
/// Pub/sub and topic names compare exactly; routes compare ASCII
/// case-insensitively because inbound routing is case-insensitive. The
/// route keeps its registered casing for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSubscription {
    #[serde(rename = "pubsubname")]
    pub pubsub_name: String,
    pub topic: String,
    pub route: String,
}

impl TopicSubscription {
    pub fn new(
        pubsub_name: impl Into<String>,
        topic: impl Into<String>,
        route: impl Into<String>,
    ) -> Self {
        Self {
            pubsub_name: pubsub_name.into(),
            topic: topic.into(),
            route: route.into(),
        }
    }
}

impl PartialEq for TopicSubscription {
    fn eq(&self, other: &Self) -> bool {
        self.pubsub_name == other.pubsub_name
            && self.topic == other.topic
            && self.route.eq_ignore_ascii_case(&other.route)
    }
}

impl Eq for TopicSubscription {}

impl Hash for TopicSubscription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pubsub_name.hash(state);
        self.topic.hash(state);
        self.route.to_ascii_lowercase().hash(state);
    }
}

// ── Pub/sub envelope ───────────────────────────────────────────

/// CloudEvents envelope the sidecar wraps around every topic delivery.
///
/// Only the attributes this crate reads are typed; everything else lands
/// in `extensions` so the envelope round-trips intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specversion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsubname: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

/// Outbound publish request with optional routing overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubEvent {
    #[serde(rename = "pubsubname", default, skip_serializing_if = "Option::is_none")]
    pub pubsub_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub payload: Value,
}

impl PubSubEvent {
    pub fn new(payload: Value) -> Self {
        Self {
            pubsub_name: None,
            topic: None,
            payload,
        }
    }

    /// Fill in pub/sub and topic from defaults when the event does not name them.
    pub fn resolve_target<'a>(
        &'a self,
        default_pubsub: Option<&'a str>,
        default_topic: Option<&'a str>,
    ) -> Option<(&'a str, &'a str)> {
        let pubsub = self.pubsub_name.as_deref().or(default_pubsub)?;
        let topic = self.topic.as_deref().or(default_topic)?;
        Some((pubsub, topic))
    }
}

// ── State ──────────────────────────────────────────────────────

/// A state store entry, as saved or as read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Raw response body when the record was read from the sidecar.
    #[serde(skip)]
    pub raw: Bytes,
}

impl StateRecord {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            etag: None,
            raw: Bytes::new(),
        }
    }

    pub fn with_etag(self, etag: impl Into<String>) -> Self {
        Self {
            etag: Some(etag.into()),
            ..self
        }
    }

    /// Build a record from a state read response.
    ///
    /// A body that is not JSON is kept as a JSON string so callers still
    /// see the value.
    pub fn from_response(key: impl Into<String>, raw: Bytes, etag: Option<String>) -> Self {
        let value = if raw.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&raw)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&raw).into_owned()))
        };
        Self {
            key: key.into(),
            value,
            etag,
            raw,
        }
    }

    /// Whether the sidecar returned no content for the key.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.value.is_null()
    }
}

// ── Output bindings ────────────────────────────────────────────

/// Message sent to an output binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingMessage {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    /// Target binding; travels in the URL, not the body.
    #[serde(skip)]
    pub binding_name: Option<String>,
}

impl BindingMessage {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            operation: None,
            metadata: None,
            binding_name: None,
        }
    }

    pub fn with_binding(self, name: impl Into<String>) -> Self {
        Self {
            binding_name: Some(name.into()),
            ..self
        }
    }

    pub fn with_operation(self, operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..self
        }
    }
}
