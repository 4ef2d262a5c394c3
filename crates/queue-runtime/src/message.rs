//! Message types for queue and topic operations including addressing identifiers.

use crate::error::{SerializationError, ValidationError};
use crate::provider::ProviderType;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use url::Url;

/// Attribute carrying the human-readable event type used for routing.
pub const EVENT_TYPE_ATTRIBUTE: &str = "eventType";

/// Attribute that suppresses trace-context injection when set to `"true"`.
pub const NO_TRACING_ATTRIBUTE: &str = "noTracing";

/// Scheme used by the in-memory provider for queue URLs.
pub const MEMORY_SCHEME: &str = "memory";

// ============================================================================
// Addressing Identifiers
// ============================================================================

/// Validated absolute URL of a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueUrl(Url);

impl QueueUrl {
    /// Create new queue URL with validation
    pub fn new(url: &str) -> Result<Self, ValidationError> {
        let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidFormat {
            field: "queue_url".to_string(),
            message: e.to_string(),
        })?;

        let queue = Self(parsed);
        if queue.short_name().is_none() {
            return Err(ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: format!("'{}' does not name a queue", url),
            });
        }

        Ok(queue)
    }

    /// Build the URL the in-memory provider uses for a queue name
    pub fn in_memory(name: &str) -> Result<Self, ValidationError> {
        Self::new(&format!("{}://{}", MEMORY_SCHEME, name))
    }

    /// Queue name: last non-empty path segment, or the host for in-memory URLs
    pub fn short_name(&self) -> Option<&str> {
        if self.0.scheme() == MEMORY_SCHEME {
            return self.0.host_str().filter(|h| !h.is_empty());
        }

        self.0
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
    }

    /// Check whether this URL addresses an in-memory queue
    pub fn is_in_memory(&self) -> bool {
        self.0.scheme() == MEMORY_SCHEME
    }

    /// FIFO queues are identified by the `.fifo` suffix
    pub fn is_fifo(&self) -> bool {
        self.short_name().is_some_and(|n| n.ends_with(".fifo"))
    }

    /// Get URL as string
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get parsed URL
    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueUrl {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for QueueUrl {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<QueueUrl> for String {
    fn from(value: QueueUrl) -> Self {
        value.0.to_string()
    }
}

/// Validated ARN-style topic identifier (`arn:partition:service:region:account:name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicArn(String);

impl TopicArn {
    /// Create new topic ARN with validation
    pub fn new(arn: String) -> Result<Self, ValidationError> {
        let segments: Vec<&str> = arn.split(':').collect();
        if segments.len() < 6 || segments[0] != "arn" {
            return Err(ValidationError::InvalidFormat {
                field: "topic_arn".to_string(),
                message: format!("'{}' is not of the form arn:partition:service:region:account:name", arn),
            });
        }

        if segments.last().is_some_and(|s| s.is_empty()) {
            return Err(ValidationError::InvalidFormat {
                field: "topic_arn".to_string(),
                message: "topic name segment is empty".to_string(),
            });
        }

        Ok(Self(arn))
    }

    /// Build the ARN the in-memory provider uses for a topic name
    pub fn in_memory(name: &str) -> Result<Self, ValidationError> {
        Self::new(format!("arn:{}:sns:local:0:{}", MEMORY_SCHEME, name))
    }

    /// Topic name: last colon-delimited segment
    pub fn short_name(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or_default()
    }

    /// Check whether this ARN addresses an in-memory topic
    pub fn is_in_memory(&self) -> bool {
        self.0.split(':').nth(1) == Some(MEMORY_SCHEME)
    }

    /// Region segment of the ARN
    pub fn region(&self) -> &str {
        self.0.split(':').nth(3).unwrap_or_default()
    }

    /// Get ARN as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicArn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TopicArn {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for TopicArn {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicArn> for String {
    fn from(value: TopicArn) -> Self {
        value.0
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create timestamp from milliseconds since the Unix epoch
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Attributes
// ============================================================================

/// Typed message attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MessageAttribute {
    String(String),
    Number(String),
    Binary(#[serde(with = "bytes_serde")] Bytes),
}

impl MessageAttribute {
    /// Transport data type name
    pub fn data_type(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Number(_) => "Number",
            Self::Binary(_) => "Binary",
        }
    }

    /// String value for String and Number attributes
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) | Self::Number(value) => Some(value),
            Self::Binary(_) => None,
        }
    }

    /// Value rendered as text; binary values are base64 encoded
    pub fn to_wire_value(&self) -> String {
        match self {
            Self::String(value) | Self::Number(value) => value.clone(),
            Self::Binary(bytes) => general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Parse a `{type, value}` pair as the transports render it.
    ///
    /// Custom type suffixes (`String.json`, `Number.int`) map onto their base type.
    pub fn from_wire(key: &str, data_type: &str, value: &str) -> Result<Self, SerializationError> {
        let base_type = data_type.split('.').next().unwrap_or_default();
        match base_type {
            "String" => Ok(Self::String(value.to_string())),
            "Number" => Ok(Self::Number(value.to_string())),
            "Binary" => general_purpose::STANDARD
                .decode(value)
                .map(|decoded| Self::Binary(Bytes::from(decoded)))
                .map_err(|_| SerializationError::InvalidAttribute {
                    key: key.to_string(),
                }),
            _ => Err(SerializationError::InvalidAttribute {
                key: key.to_string(),
            }),
        }
    }
}

impl From<&str> for MessageAttribute {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MessageAttribute {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

fn string_attribute<'a>(
    attributes: &'a HashMap<String, MessageAttribute>,
    key: &str,
) -> Option<&'a str> {
    match attributes.get(key) {
        Some(MessageAttribute::String(value)) => Some(value.as_str()),
        _ => None,
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub attributes: HashMap<String, MessageAttribute>,
    pub message_group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            attributes: HashMap::new(),
            message_group_id: None,
            deduplication_id: None,
        }
    }

    /// Add typed message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: MessageAttribute) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Add string message attribute
    pub fn with_string_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(key.into(), MessageAttribute::String(value.into()));
        self
    }

    /// Add message group ID for ordered (FIFO) delivery
    pub fn with_message_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.message_group_id = Some(group_id.into());
        self
    }

    /// Add deduplication ID for FIFO delivery
    pub fn with_deduplication_id(mut self, deduplication_id: impl Into<String>) -> Self {
        self.deduplication_id = Some(deduplication_id.into());
        self
    }

    /// Value of the `eventType` attribute, if present and string-typed
    pub fn event_type(&self) -> Option<&str> {
        string_attribute(&self.attributes, EVENT_TYPE_ATTRIBUTE)
    }

    /// Whether the message opted out of trace-context injection
    pub fn tracing_disabled(&self) -> bool {
        string_attribute(&self.attributes, NO_TRACING_ATTRIBUTE) == Some("true")
    }
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub attributes: HashMap<String, MessageAttribute>,
    pub message_group_id: Option<String>,
    pub receipt_handle: ReceiptHandle,
    pub receive_count: u32,
    pub sent_at: Timestamp,
}

impl ReceivedMessage {
    /// Convert back to Message (for forwarding/redriving)
    pub fn message(&self) -> Message {
        Message {
            body: self.body.clone(),
            attributes: self.attributes.clone(),
            message_group_id: self.message_group_id.clone(),
            deduplication_id: None, // Transport assigns a fresh one on resend
        }
    }

    /// Value of the `eventType` attribute, if present and string-typed
    pub fn event_type(&self) -> Option<&str> {
        string_attribute(&self.attributes, EVENT_TYPE_ATTRIBUTE)
    }
}

/// Opaque token for deleting received messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    handle: String,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String, provider_type: ProviderType) -> Self {
        Self {
            handle,
            provider_type,
        }
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

// ============================================================================
// Topic Notification Envelope
// ============================================================================

/// JSON envelope a topic wraps around a message when delivering to a
/// subscribed queue without raw delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    pub message_id: String,
    pub topic_arn: String,
    pub message: String,
    #[serde(default)]
    pub message_attributes: HashMap<String, EnvelopeAttribute>,
}

/// Attribute entry inside a [`NotificationEnvelope`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvelopeAttribute {
    #[serde(rename = "Type")]
    pub data_type: String,
    pub value: String,
}

impl NotificationEnvelope {
    pub const NOTIFICATION: &'static str = "Notification";

    /// Wrap a published message. The body must be UTF-8 text.
    pub fn wrap(
        message_id: &MessageId,
        topic: &TopicArn,
        message: &Message,
    ) -> Result<Self, SerializationError> {
        let text = std::str::from_utf8(&message.body)
            .map_err(|_| SerializationError::InvalidUtf8)?
            .to_string();

        let message_attributes = message
            .attributes
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    EnvelopeAttribute {
                        data_type: value.data_type().to_string(),
                        value: value.to_wire_value(),
                    },
                )
            })
            .collect();

        Ok(Self {
            kind: Self::NOTIFICATION.to_string(),
            message_id: message_id.to_string(),
            topic_arn: topic.to_string(),
            message: text,
            message_attributes,
        })
    }

    /// Parse an envelope from a received body
    pub fn parse(body: &[u8]) -> Result<Self, SerializationError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Serialize to the JSON body delivered to subscribers
    pub fn to_body(&self) -> Result<Bytes, SerializationError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode the envelope's attributes into typed message attributes
    pub fn attributes(&self) -> Result<HashMap<String, MessageAttribute>, SerializationError> {
        self.message_attributes
            .iter()
            .map(|(key, entry)| {
                MessageAttribute::from_wire(key, &entry.data_type, &entry.value)
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
