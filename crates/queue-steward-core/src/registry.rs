//! # Queue/Topic Registry
//!
//! Immutable mapping from logical identifiers to bound queue and topic clients.
//!
//! The registry is assembled once at startup through a [`RegistryBuilder`].
//! Registration fails on a duplicate identifier instead of replacing the
//! earlier binding, so configuration mistakes surface before the first message
//! is handled. After [`RegistryBuilder::build`] nothing is added or removed,
//! which makes a shared `Arc<Registry>` safe to read from any task.
//!
//! Queue and topic identifiers live in separate maps; a queue and a topic may
//! share an identifier because every lookup is typed by kind.

use queue_runtime::{QueueClient, QueueUrl, TopicArn, TopicClient};
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

// ============================================================================
// BindingId
// ============================================================================

/// Logical identifier of a queue or topic binding.
///
/// Valid identifiers are non-empty and use only lowercase ASCII letters,
/// digits, hyphens and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct BindingId(String);

impl BindingId {
    /// Create a new identifier, validating its characters.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidId`] if the value is empty or contains
    /// characters outside `[a-z0-9_-]`.
    pub fn new(value: impl Into<String>) -> Result<Self, RegistryError> {
        let value = value.into();
        if value.is_empty() {
            return Err(RegistryError::InvalidId {
                value,
                reason: "identifier must not be empty".to_string(),
            });
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(RegistryError::InvalidId {
                value,
                reason: "use lowercase alphanumeric, hyphens, or underscores".to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for BindingId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<BindingId> for String {
    fn from(value: BindingId) -> Self {
        value.0
    }
}

// ============================================================================
// Bindings
// ============================================================================

/// Dead letter queue paired with a main queue
#[derive(Clone)]
pub struct DeadLetterBinding {
    /// Client for the DLQ; may be the same client as the main queue's
    pub client: Arc<dyn QueueClient>,
    pub url: QueueUrl,
    pub name: String,
}

/// Live handles and addressing for one logical queue.
///
/// A DLQ is either fully bound (client, URL and name) or absent.
#[derive(Clone)]
pub struct QueueBinding {
    pub id: BindingId,
    pub client: Arc<dyn QueueClient>,
    pub queue_url: QueueUrl,
    pub dead_letter: Option<DeadLetterBinding>,
}

impl QueueBinding {
    /// Binding without a dead letter queue
    pub fn new(id: BindingId, client: Arc<dyn QueueClient>, queue_url: QueueUrl) -> Self {
        Self {
            id,
            client,
            queue_url,
            dead_letter: None,
        }
    }

    /// Attach a dead letter queue
    pub fn with_dead_letter(
        mut self,
        client: Arc<dyn QueueClient>,
        url: QueueUrl,
        name: impl Into<String>,
    ) -> Self {
        self.dead_letter = Some(DeadLetterBinding {
            client,
            url,
            name: name.into(),
        });
        self
    }

    /// Queue name taken from the URL
    pub fn queue_name(&self) -> &str {
        self.queue_url.short_name().unwrap_or_default()
    }

    pub fn has_dead_letter(&self) -> bool {
        self.dead_letter.is_some()
    }
}

impl fmt::Debug for QueueBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueBinding")
            .field("id", &self.id)
            .field("queue_url", &self.queue_url.as_str())
            .field("provider", &self.client.provider_type())
            .field(
                "dead_letter_url",
                &self.dead_letter.as_ref().map(|d| d.url.as_str()),
            )
            .finish()
    }
}

/// Live handle and addressing for one logical topic
#[derive(Clone)]
pub struct TopicBinding {
    pub id: BindingId,
    pub client: Arc<dyn TopicClient>,
    pub arn: TopicArn,
}

impl TopicBinding {
    pub fn new(id: BindingId, client: Arc<dyn TopicClient>, arn: TopicArn) -> Self {
        Self { id, client, arn }
    }
}

impl fmt::Debug for TopicBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicBinding")
            .field("id", &self.id)
            .field("arn", &self.arn.as_str())
            .field("provider", &self.client.provider_type())
            .finish()
    }
}

/// Serializable description of a registered queue for diagnostic collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub id: String,
    pub queue_name: String,
    pub queue_url: String,
    pub provider: String,
    pub dead_letter_queue: Option<String>,
    pub dead_letter_url: Option<String>,
    /// Approximate visible plus in-flight messages, when inspected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_depth: Option<u64>,
}

impl QueueSummary {
    fn from_binding(binding: &QueueBinding) -> Self {
        Self {
            id: binding.id.to_string(),
            queue_name: binding.queue_name().to_string(),
            queue_url: binding.queue_url.to_string(),
            provider: binding.client.provider_type().to_string(),
            dead_letter_queue: binding.dead_letter.as_ref().map(|d| d.name.clone()),
            dead_letter_url: binding.dead_letter.as_ref().map(|d| d.url.to_string()),
            depth: None,
            dead_letter_depth: None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Registry construction and lookup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Identifier '{id}' is already registered as a {kind}")]
    DuplicateId { id: String, kind: &'static str },

    #[error("No queue is registered under '{id}'")]
    MissingQueue { id: String },

    #[error("No topic is registered under '{id}'")]
    MissingTopic { id: String },

    #[error("Invalid identifier '{value}': {reason}")]
    InvalidId { value: String, reason: String },
}

// ============================================================================
// Builder and Registry
// ============================================================================

/// Mutable staging area for bindings; consumed by [`RegistryBuilder::build`]
#[derive(Default)]
pub struct RegistryBuilder {
    queues: BTreeMap<BindingId, QueueBinding>,
    topics: BTreeMap<BindingId, TopicBinding>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue binding under its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if a queue with the same
    /// identifier exists; the builder is left unchanged.
    pub fn register_queue(&mut self, binding: QueueBinding) -> Result<&mut Self, RegistryError> {
        if self.queues.contains_key(&binding.id) {
            warn!(id = %binding.id, "Rejected duplicate queue registration");
            return Err(RegistryError::DuplicateId {
                id: binding.id.to_string(),
                kind: "queue",
            });
        }

        debug!(
            id = %binding.id,
            queue_url = %binding.queue_url,
            dead_letter = binding.has_dead_letter(),
            "Registered queue"
        );
        self.queues.insert(binding.id.clone(), binding);
        Ok(self)
    }

    /// Register a topic binding under its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if a topic with the same
    /// identifier exists; the builder is left unchanged.
    pub fn register_topic(&mut self, binding: TopicBinding) -> Result<&mut Self, RegistryError> {
        if self.topics.contains_key(&binding.id) {
            warn!(id = %binding.id, "Rejected duplicate topic registration");
            return Err(RegistryError::DuplicateId {
                id: binding.id.to_string(),
                kind: "topic",
            });
        }

        debug!(id = %binding.id, arn = %binding.arn, "Registered topic");
        self.topics.insert(binding.id.clone(), binding);
        Ok(self)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Freeze the registered bindings
    pub fn build(self) -> Registry {
        Registry {
            queues: self.queues,
            topics: self.topics,
        }
    }
}

/// Immutable queue and topic bindings, ordered by identifier
pub struct Registry {
    queues: BTreeMap<BindingId, QueueBinding>,
    topics: BTreeMap<BindingId, TopicBinding>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up a queue binding.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingQueue`] for an unregistered identifier.
    pub fn resolve_queue(&self, id: &str) -> Result<&QueueBinding, RegistryError> {
        self.queues
            .get(id)
            .ok_or_else(|| RegistryError::MissingQueue { id: id.to_string() })
    }

    /// Look up a topic binding.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingTopic`] for an unregistered identifier.
    pub fn resolve_topic(&self, id: &str) -> Result<&TopicBinding, RegistryError> {
        self.topics
            .get(id)
            .ok_or_else(|| RegistryError::MissingTopic { id: id.to_string() })
    }

    /// All queue bindings in identifier order
    pub fn list_queues(&self) -> impl Iterator<Item = &QueueBinding> {
        self.queues.values()
    }

    /// All topic bindings in identifier order
    pub fn list_topics(&self) -> impl Iterator<Item = &TopicBinding> {
        self.topics.values()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty() && self.topics.is_empty()
    }

    /// Static description of every queue
    pub fn summaries(&self) -> Vec<QueueSummary> {
        self.list_queues().map(QueueSummary::from_binding).collect()
    }

    /// Describe every queue including current depths.
    ///
    /// A depth that cannot be read is reported as `None` and logged.
    pub async fn inspect_queues(&self) -> Vec<QueueSummary> {
        let mut summaries = Vec::with_capacity(self.queues.len());
        for binding in self.list_queues() {
            let mut summary = QueueSummary::from_binding(binding);
            summary.depth = approximate_depth(binding.client.as_ref(), &binding.queue_url).await;
            if let Some(dead_letter) = &binding.dead_letter {
                summary.dead_letter_depth =
                    approximate_depth(dead_letter.client.as_ref(), &dead_letter.url).await;
            }
            summaries.push(summary);
        }
        summaries
    }
}

async fn approximate_depth(client: &dyn QueueClient, url: &QueueUrl) -> Option<u64> {
    match client.approximate_message_count(url).await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(queue_url = %url, error = %e, "Could not read queue depth");
            None
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("topics", &self.topics.keys().collect::<Vec<_>>())
            .finish()
    }
}
