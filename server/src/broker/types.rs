use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Application property that carries the dead-letter reason when the broker
/// field itself is empty.
pub const DEAD_LETTER_REASON_PROPERTY: &str = "DeadLetterReason";
pub const DEAD_LETTER_ERROR_DESCRIPTION_PROPERTY: &str = "DeadLetterErrorDescription";

/// Typed value of an application property.
///
/// Mirrors the AMQP simple types so a cloned message carries each property
/// with the same wire type it was received with.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
    Float(f32),
    Double(f64),
    Char(char),
    String(String),
    Symbol(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl PropertyValue {
    /// Text content of string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "null"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Byte(v) => write!(f, "{v}"),
            PropertyValue::Short(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Long(v) => write!(f, "{v}"),
            PropertyValue::UByte(v) => write!(f, "{v}"),
            PropertyValue::UShort(v) => write!(f, "{v}"),
            PropertyValue::UInt(v) => write!(f, "{v}"),
            PropertyValue::ULong(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::Char(v) => write!(f, "{v}"),
            PropertyValue::String(v) | PropertyValue::Symbol(v) => write!(f, "{v}"),
            PropertyValue::Uuid(v) => write!(f, "{v}"),
            PropertyValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            PropertyValue::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PropertyValue::Null => serializer.serialize_unit(),
            PropertyValue::Bool(v) => serializer.serialize_bool(*v),
            PropertyValue::Byte(v) => serializer.serialize_i8(*v),
            PropertyValue::Short(v) => serializer.serialize_i16(*v),
            PropertyValue::Int(v) => serializer.serialize_i32(*v),
            PropertyValue::Long(v) => serializer.serialize_i64(*v),
            PropertyValue::UByte(v) => serializer.serialize_u8(*v),
            PropertyValue::UShort(v) => serializer.serialize_u16(*v),
            PropertyValue::UInt(v) => serializer.serialize_u32(*v),
            PropertyValue::ULong(v) => serializer.serialize_u64(*v),
            PropertyValue::Float(v) => serializer.serialize_f32(*v),
            PropertyValue::Double(v) => serializer.serialize_f64(*v),
            other => serializer.collect_str(other),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Long(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

/// How a receiver takes messages from its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Browse only; nothing is locked or removed
    PeekOnly,
    /// Received messages are locked until completed, dead-lettered or released
    PeekLock,
    /// Received messages are removed immediately
    ReceiveAndDelete,
}

/// A message as delivered by the broker, either peeked or received.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub to: Option<String>,
    pub session_id: Option<String>,
    pub partition_key: Option<String>,
    pub reply_to: Option<String>,
    pub reply_to_session_id: Option<String>,
    pub transaction_partition_key: Option<String>,
    pub body: Vec<u8>,
    pub delivery_count: u32,
    pub sequence_number: i64,
    pub time_to_live: Option<Duration>,
    pub enqueued_time: Option<DateTime<Utc>>,
    pub application_properties: BTreeMap<String, PropertyValue>,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_error_description: Option<String>,
    /// Set by peek-lock receives; identifies the lock for settlement
    pub lock_token: Option<Uuid>,
}

/// A message to be sent.
///
/// Built either from plain text or by cloning a received message, which keeps
/// the payload, the application properties and the standard envelope fields
/// while leaving delivery metadata (sequence number, enqueue time, delivery
/// count) to the broker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub to: Option<String>,
    pub session_id: Option<String>,
    pub partition_key: Option<String>,
    pub reply_to: Option<String>,
    pub reply_to_session_id: Option<String>,
    pub transaction_partition_key: Option<String>,
    pub time_to_live: Option<Duration>,
    pub application_properties: BTreeMap<String, PropertyValue>,
}

impl OutgoingMessage {
    pub fn from_text(content: &str) -> Self {
        Self {
            body: content.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    pub fn clone_from_received(source: &ReceivedMessage) -> Self {
        Self {
            body: source.body.clone(),
            message_id: source.message_id.clone(),
            correlation_id: source.correlation_id.clone(),
            content_type: source.content_type.clone(),
            subject: source.subject.clone(),
            to: source.to.clone(),
            session_id: source.session_id.clone(),
            partition_key: source.partition_key.clone(),
            reply_to: source.reply_to.clone(),
            reply_to_session_id: source.reply_to_session_id.clone(),
            transaction_partition_key: source.transaction_partition_key.clone(),
            time_to_live: source.time_to_live,
            application_properties: source.application_properties.clone(),
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeadLetterOptions {
    pub reason: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceProperties {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Live counts of an entity, independent of what is loaded locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeInfo {
    pub message_count: u64,
    pub dlq_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicProperties {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionProperties {
    pub topic_name: String,
    pub name: String,
    pub runtime: RuntimeInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueProperties {
    pub name: String,
    pub runtime: RuntimeInfo,
}

/// One page of a management listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_keeps_envelope_and_drops_delivery_metadata() {
        let source = ReceivedMessage {
            message_id: Some("order-1".into()),
            correlation_id: Some("corr".into()),
            content_type: Some("application/json".into()),
            subject: Some("created".into()),
            to: Some("billing".into()),
            session_id: Some("s-1".into()),
            partition_key: Some("s-1".into()),
            reply_to: Some("replies".into()),
            reply_to_session_id: Some("r-1".into()),
            transaction_partition_key: Some("tx".into()),
            body: br#"{"id":1}"#.to_vec(),
            delivery_count: 7,
            sequence_number: 42,
            time_to_live: Some(Duration::from_secs(300)),
            application_properties: BTreeMap::from([
                ("tenant".into(), "a".into()),
                ("attempt".into(), PropertyValue::Int(3)),
            ]),
            lock_token: Some(Uuid::new_v4()),
            ..Default::default()
        };

        let clone = OutgoingMessage::clone_from_received(&source);
        assert_eq!(clone.body, source.body);
        assert_eq!(clone.message_id, source.message_id);
        assert_eq!(clone.correlation_id, source.correlation_id);
        assert_eq!(clone.content_type, source.content_type);
        assert_eq!(clone.subject, source.subject);
        assert_eq!(clone.to, source.to);
        assert_eq!(clone.session_id, source.session_id);
        assert_eq!(clone.partition_key, source.partition_key);
        assert_eq!(clone.reply_to, source.reply_to);
        assert_eq!(clone.reply_to_session_id, source.reply_to_session_id);
        assert_eq!(clone.transaction_partition_key, source.transaction_partition_key);
        assert_eq!(clone.time_to_live, source.time_to_live);
        assert_eq!(clone.application_properties, source.application_properties);
    }

    #[test]
    fn property_values_render_and_serialize_by_type() {
        let props = BTreeMap::from([
            ("count".to_string(), PropertyValue::Long(5)),
            ("flag".to_string(), PropertyValue::Bool(true)),
            ("name".to_string(), PropertyValue::from("x")),
            ("raw".to_string(), PropertyValue::Binary(vec![1, 2, 3])),
        ]);
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"count": 5, "flag": true, "name": "x", "raw": "<3 bytes>"})
        );
        assert_eq!(PropertyValue::Symbol("s".into()).as_str(), Some("s"));
        assert_eq!(PropertyValue::Int(1).as_str(), None);
        assert_eq!(PropertyValue::Long(-2).to_string(), "-2");
    }

    #[test]
    fn text_message_has_only_a_body() {
        let message = OutgoingMessage::from_text("hello");
        assert_eq!(message.body, b"hello");
        assert!(message.message_id.is_none());
        assert!(message.application_properties.is_empty());
    }
}
