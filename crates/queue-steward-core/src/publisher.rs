//! Publishing domain events to a well-known registered queue.
//!
//! Audit and notification collaborators only need to name the queue they
//! write to. The [`EventPublisher`] resolves it once, at construction, so a
//! missing registration surfaces at startup rather than on the first event.

use crate::registry::{BindingId, Registry, RegistryError};
use bytes::Bytes;
use queue_runtime::{Message, MessageId, QueueClient, QueueError, QueueUrl, EVENT_TYPE_ATTRIBUTE};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

/// An event that can be published to a queue.
///
/// The event type becomes the `eventType` attribute of the message and the
/// serialized event its JSON body.
pub trait DomainEvent: Serialize {
    fn event_type(&self) -> &str;
}

/// Errors raised while publishing an event
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to serialize event '{event_type}': {source}")]
    Serialization {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to publish event to queue '{queue_id}': {source}")]
    Queue {
        queue_id: BindingId,
        #[source]
        source: QueueError,
    },
}

impl PublishError {
    /// Whether retrying the same publish may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Queue { source, .. } => source.is_transient(),
            Self::Registry(_) | Self::Serialization { .. } => false,
        }
    }
}

/// Publishes events to one registered queue
#[derive(Clone)]
pub struct EventPublisher {
    queue_id: BindingId,
    client: Arc<dyn QueueClient>,
    queue_url: QueueUrl,
}

impl EventPublisher {
    /// Bind a publisher to the queue registered under `queue_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Registry`] when no such queue is registered.
    pub fn new(registry: &Registry, queue_id: &str) -> Result<Self, PublishError> {
        let binding = registry.resolve_queue(queue_id)?;
        Ok(Self {
            queue_id: binding.id.clone(),
            client: binding.client.clone(),
            queue_url: binding.queue_url.clone(),
        })
    }

    pub fn queue_id(&self) -> &BindingId {
        &self.queue_id
    }

    pub fn queue_url(&self) -> &QueueUrl {
        &self.queue_url
    }

    /// Serialize `event` and send it to the bound queue
    pub async fn publish<E: DomainEvent>(&self, event: &E) -> Result<MessageId, PublishError> {
        let message = Self::to_message(event)?;
        let event_type = event.event_type();

        match self.client.send_message(&self.queue_url, message).await {
            Ok(message_id) => {
                debug!(
                    queue_id = %self.queue_id,
                    event_type,
                    message_id = %message_id,
                    "Event published"
                );
                Ok(message_id)
            }
            Err(source) => {
                warn!(
                    queue_id = %self.queue_id,
                    event_type,
                    error = %source,
                    "Event publish failed"
                );
                Err(PublishError::Queue {
                    queue_id: self.queue_id.clone(),
                    source,
                })
            }
        }
    }

    fn to_message<E: DomainEvent>(event: &E) -> Result<Message, PublishError> {
        let body = serde_json::to_vec(event).map_err(|source| PublishError::Serialization {
            event_type: event.event_type().to_string(),
            source,
        })?;

        Ok(Message::new(Bytes::from(body))
            .with_string_attribute(EVENT_TYPE_ATTRIBUTE, event.event_type()))
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("queue_id", &self.queue_id)
            .field("queue_url", &self.queue_url)
            .finish()
    }
}
