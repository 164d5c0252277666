use crate::broker::{DEAD_LETTER_REASON_PROPERTY, OutgoingMessage, PropertyValue, ReceivedMessage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::ser::Serializer;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Immutable snapshot of one broker message at fetch time.
///
/// The sequence number is the only stable handle for finding a specific
/// dead-letter message again; message ids may repeat across redeliveries.
#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct Message {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub body: BodyData,
    /// Body length in bytes
    pub size: usize,
    pub delivery_count: u32,
    pub sequence_number: i64,
    #[serde(serialize_with = "serialize_ttl")]
    pub time_to_live: Option<Duration>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub application_properties: BTreeMap<String, PropertyValue>,
    /// Empty when the message was never dead-lettered
    pub dead_letter_reason: String,
    pub is_dlq: bool,
    /// Original wire form, kept so resubmission can rebuild the message
    #[serde(skip)]
    source: ReceivedMessage,
}

impl Message {
    pub fn from_received(received: ReceivedMessage, is_dlq: bool) -> Self {
        let dead_letter_reason = received
            .dead_letter_reason
            .clone()
            .filter(|reason| !reason.is_empty())
            .or_else(|| {
                received
                    .application_properties
                    .get(DEAD_LETTER_REASON_PROPERTY)
                    .and_then(PropertyValue::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        Self {
            message_id: received.message_id.clone().unwrap_or_default(),
            correlation_id: received.correlation_id.clone(),
            content_type: received.content_type.clone(),
            subject: received.subject.clone(),
            body: BodyData::parse(&received.body),
            size: received.body.len(),
            delivery_count: received.delivery_count,
            sequence_number: received.sequence_number,
            time_to_live: received.time_to_live,
            enqueued_at: received.enqueued_time,
            application_properties: received.application_properties.clone(),
            dead_letter_reason,
            is_dlq,
            source: ReceivedMessage {
                lock_token: None,
                ..received
            },
        }
    }

    pub fn convert_all(messages: Vec<ReceivedMessage>, is_dlq: bool) -> Vec<Message> {
        messages
            .into_iter()
            .map(|received| Message::from_received(received, is_dlq))
            .collect()
    }

    /// Body as text, exactly as received.
    pub fn content(&self) -> String {
        String::from_utf8_lossy(&self.source.body).into_owned()
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.source.body
    }

    pub fn source(&self) -> &ReceivedMessage {
        &self.source
    }

    /// A sendable copy preserving payload, properties and envelope fields.
    pub fn to_outgoing(&self) -> OutgoingMessage {
        OutgoingMessage::clone_from_received(&self.source)
    }
}

/// Message body: structured when it parses as JSON, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyData {
    ValidJson(Value),
    RawString(String),
}

impl BodyData {
    pub fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(val) => BodyData::ValidJson(val),
            Err(_) => BodyData::RawString(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Display form; JSON is pretty-printed.
    pub fn display(&self) -> String {
        match self {
            BodyData::ValidJson(val) => {
                serde_json::to_string_pretty(val).unwrap_or_else(|_| val.to_string())
            }
            BodyData::RawString(s) => s.clone(),
        }
    }
}

impl Serialize for BodyData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BodyData::ValidJson(val) => val.serialize(serializer),
            BodyData::RawString(s) => serializer.serialize_str(s),
        }
    }
}

fn serialize_ttl<S>(ttl: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match ttl {
        Some(d) => serializer.serialize_some(&d.as_secs()),
        None => serializer.serialize_none(),
    }
}
