//! Wire message types.
//!
//! Defines the [`Message`] value object exchanged over the socket and the
//! [`Feature`] namespace discriminator.
//!
//! # Format
//!
//! One JSON document per text frame, no length-prefixing:
//!
//! ```json
//! {
//!   "id": "uuid",
//!   "type": "message",
//!   "feature": "chat",
//!   "payload": { ... },
//!   "timestamp": 1715000000000,
//!   "metadata": { "sentAt": 1715000000000 },
//!   "priority": 0
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};

use super::MessageId;

// ============================================================================
// Constants
// ============================================================================

/// Metadata key carrying the sender-side timestamp used for latency sampling.
pub const META_SENT_AT: &str = "sentAt";

/// Message type used for heartbeat frames.
pub const TYPE_HEARTBEAT: &str = "heartbeat";

// ============================================================================
// Feature
// ============================================================================

/// Logical namespace for messages and connections.
///
/// Known namespaces get dedicated variants; anything else round-trips
/// through [`Feature::Custom`]. Serializes as the plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Chat conversations and direct messages.
    Chat,
    /// User notifications and badges.
    Notification,
    /// Activity feed, posts and comments.
    Feed,
    /// Search and index updates.
    Search,
    /// Engine-internal traffic (heartbeats, pings).
    System,
    /// Any other namespace.
    Custom(String),
}

impl Feature {
    /// Returns the wire name of this feature.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::Notification => "notification",
            Self::Feed => "feed",
            Self::Search => "search",
            Self::System => "system",
            Self::Custom(name) => name,
        }
    }

    /// Parses a feature from its wire name. Never fails; unknown names
    /// become [`Feature::Custom`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "chat" => Self::Chat,
            "notification" => Self::Notification,
            "feed" => Self::Feed,
            "search" => Self::Search,
            "system" => Self::System,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Returns `true` if the wire name is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Feature {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Feature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name.is_empty() {
            return Err(de::Error::custom("feature must be non-empty"));
        }
        Ok(Self::parse(&name))
    }
}

// ============================================================================
// Message
// ============================================================================

/// An immutable value object exchanged over the wire.
///
/// Invariant: `id`, `type`, and `feature` are non-empty. A message failing
/// [`Message::validate`] must not be routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id, generated at creation when absent.
    pub id: MessageId,

    /// Type discriminator (`heartbeat`, `message`, `update`, ...).
    #[serde(rename = "type")]
    pub message_type: String,

    /// Feature namespace.
    pub feature: Feature,

    /// Opaque structured payload.
    #[serde(default)]
    pub payload: Value,

    /// Creation instant, milliseconds since the Unix epoch.
    pub timestamp: u64,

    /// Open key/value map; may carry [`META_SENT_AT`] for latency sampling.
    #[serde(default)]
    pub metadata: FxHashMap<String, Value>,

    /// Higher = more urgent. Used for load-balancing tie-breaks, not for
    /// wire ordering.
    #[serde(default)]
    pub priority: i32,
}

// ============================================================================
// Message - Constructors
// ============================================================================

impl Message {
    /// Creates a message with a generated id and the current timestamp.
    #[must_use]
    pub fn new(feature: Feature, message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: MessageId::generate(),
            message_type: message_type.into(),
            feature,
            payload,
            timestamp: now_millis(),
            metadata: FxHashMap::default(),
            priority: 0,
        }
    }

    /// Creates a `system`/`heartbeat` message stamped with [`META_SENT_AT`].
    #[must_use]
    pub fn heartbeat() -> Self {
        let now = now_millis();
        Self::new(Feature::System, TYPE_HEARTBEAT, Value::Null)
            .with_metadata(META_SENT_AT, Value::from(now))
    }

    /// Replaces the generated id.
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the priority.
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Inserts a metadata entry.
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Message - Accessors
// ============================================================================

impl Message {
    /// Checks the structural invariant: id, type and feature non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] naming the violated field.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::invalid_message("empty id"));
        }
        if self.message_type.is_empty() {
            return Err(Error::invalid_message("empty type"));
        }
        if self.feature.is_empty() {
            return Err(Error::invalid_message("empty feature"));
        }
        Ok(())
    }

    /// Returns the `sentAt` metadata timestamp, when present and numeric.
    #[must_use]
    pub fn sent_at(&self) -> Option<u64> {
        self.metadata.get(META_SENT_AT).and_then(Value::as_u64)
    }

    /// Returns message age in milliseconds relative to now.
    ///
    /// Clamps to zero when clocks disagree.
    #[must_use]
    pub fn age_millis(&self) -> u64 {
        now_millis().saturating_sub(self.timestamp)
    }

    /// Serializes to the wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] on failure.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a message from its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the frame is not a valid message.
    pub fn from_wire(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Milliseconds since the Unix epoch.
#[must_use]
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_new_fills_id_and_timestamp() {
        let msg = Message::new(Feature::Chat, "message", json!({"text": "hi"}));
        assert!(!msg.id.is_empty());
        assert!(msg.timestamp > 0);
        assert_eq!(msg.priority, 0);
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn test_validate_ok() {
        let msg = Message::new(Feature::Feed, "update", Value::Null);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_type() {
        let msg = Message::new(Feature::Feed, "", Value::Null);
        let err = msg.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidMessage { .. }));
    }

    #[test]
    fn test_validate_empty_id() {
        let msg = Message::new(Feature::Feed, "update", Value::Null).with_id("");
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_validate_empty_feature() {
        let msg = Message::new(Feature::Custom(String::new()), "update", Value::Null);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_heartbeat_shape() {
        let hb = Message::heartbeat();
        assert_eq!(hb.feature, Feature::System);
        assert_eq!(hb.message_type, TYPE_HEARTBEAT);
        assert!(hb.sent_at().is_some());
    }

    #[test]
    fn test_feature_parse_known() {
        assert_eq!(Feature::parse("chat"), Feature::Chat);
        assert_eq!(Feature::parse("notification"), Feature::Notification);
        assert_eq!(Feature::parse("feed"), Feature::Feed);
        assert_eq!(Feature::parse("search"), Feature::Search);
        assert_eq!(Feature::parse("system"), Feature::System);
    }

    #[test]
    fn test_feature_parse_custom() {
        let f = Feature::parse("presence");
        assert_eq!(f, Feature::Custom("presence".to_string()));
        assert_eq!(f.as_str(), "presence");
    }

    #[test]
    fn test_feature_serializes_as_string() {
        let json = serde_json::to_string(&Feature::Chat).unwrap();
        assert_eq!(json, "\"chat\"");
    }

    #[test]
    fn test_wire_round_trip_lossless() {
        let msg = Message::new(Feature::Chat, "message", json!({"text": "hello", "n": 3}))
            .with_priority(7)
            .with_metadata(META_SENT_AT, Value::from(1_715_000_000_000_u64))
            .with_metadata("traceId", Value::from("abc"));

        let frame = msg.to_wire().unwrap();
        let back = Message::from_wire(&frame).unwrap();

        assert_eq!(back.id, msg.id);
        assert_eq!(back.message_type, msg.message_type);
        assert_eq!(back.feature, msg.feature);
        assert_eq!(back.payload, msg.payload);
        assert_eq!(back.timestamp, msg.timestamp);
        assert_eq!(back.metadata, msg.metadata);
    }

    #[test]
    fn test_wire_type_field_name() {
        let msg = Message::new(Feature::System, "heartbeat", Value::Null);
        let frame = msg.to_wire().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["feature"], "system");
    }

    #[test]
    fn test_from_wire_defaults() {
        let frame = r#"{"id":"m1","type":"update","feature":"feed","timestamp":1}"#;
        let msg = Message::from_wire(frame).unwrap();
        assert_eq!(msg.payload, Value::Null);
        assert!(msg.metadata.is_empty());
        assert_eq!(msg.priority, 0);
    }

    #[test]
    fn test_from_wire_rejects_empty_feature() {
        let frame = r#"{"id":"m1","type":"update","feature":"","timestamp":1}"#;
        assert!(Message::from_wire(frame).is_err());
    }

    #[test]
    fn test_sent_at_non_numeric_ignored() {
        let msg = Message::new(Feature::Chat, "message", Value::Null)
            .with_metadata(META_SENT_AT, Value::from("not-a-number"));
        assert_eq!(msg.sent_at(), None);
    }
}
