//! In-memory queue and topic provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory broker that:
//! - Implements visibility timeouts for received messages
//! - Emulates a max-receive-count redrive policy into a dead letter queue
//! - Fans topic publishes out to subscribed queues, raw or enveloped
//! - Provides thread-safe concurrent access
//!
//! Queues are keyed by their `memory://name` URL and topics by their
//! `arn:memory:sns:local:0:name` ARN.

use crate::client::{QueueProvider, TopicProvider};
use crate::error::{ConfigurationError, QueueError};
use crate::message::{
    Message, MessageAttribute, MessageId, NotificationEnvelope, QueueUrl, ReceiptHandle,
    ReceivedMessage, Timestamp, TopicArn,
};
use crate::provider::{InMemorySettings, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues and topics
#[derive(Default)]
struct BrokerStorage {
    queues: HashMap<QueueUrl, InMemoryQueue>,
    topics: HashMap<TopicArn, Vec<Subscription>>,
}

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Visible messages in arrival order
    messages: VecDeque<StoredMessage>,
    /// Received messages keyed by receipt handle
    in_flight: HashMap<String, InFlightMessage>,
    redrive_policy: Option<RedrivePolicy>,
}

impl InMemoryQueue {
    /// Return expired in-flight messages to the visible queue
    fn release_expired(&mut self) {
        let now = Timestamp::now();
        let mut expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        expired.sort();

        for receipt in expired {
            if let Some(in_flight) = self.in_flight.remove(&receipt) {
                self.messages.push_back(in_flight.message);
            }
        }
    }
}

/// A message stored in a queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, MessageAttribute>,
    message_group_id: Option<String>,
    sent_at: Timestamp,
    receive_count: u32,
}

impl StoredMessage {
    fn from_message(message: &Message, message_id: MessageId) -> Self {
        Self {
            message_id,
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            message_group_id: message.message_group_id.clone(),
            sent_at: Timestamp::now(),
            receive_count: 0,
        }
    }
}

/// A message currently being processed
struct InFlightMessage {
    message: StoredMessage,
    visible_at: Timestamp,
}

/// Transport-side policy moving repeatedly received messages to a dead letter queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_url: QueueUrl,
    pub max_receive_count: u32,
}

/// Subscription of a queue to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscription {
    queue_url: QueueUrl,
    raw_delivery: bool,
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// Shared in-memory broker holding every queue and topic.
///
/// Cloning the broker shares the same storage.
#[derive(Clone)]
pub struct InMemoryBroker {
    storage: Arc<RwLock<BrokerStorage>>,
    settings: InMemorySettings,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(InMemorySettings::default())
    }
}

fn lock_poisoned() -> QueueError {
    QueueError::ProviderError {
        provider: ProviderType::InMemory.to_string(),
        code: "LockPoisoned".to_string(),
        message: "broker storage lock was poisoned".to_string(),
    }
}

fn queue_not_found(url: &QueueUrl) -> QueueError {
    QueueError::QueueNotFound {
        queue_name: url.to_string(),
    }
}

impl InMemoryBroker {
    /// Create new broker with settings
    pub fn new(settings: InMemorySettings) -> Self {
        Self {
            storage: Arc::new(RwLock::new(BrokerStorage::default())),
            settings,
        }
    }

    pub fn settings(&self) -> &InMemorySettings {
        &self.settings
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BrokerStorage>, QueueError> {
        self.storage.read().map_err(|_| lock_poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BrokerStorage>, QueueError> {
        self.storage.write().map_err(|_| lock_poisoned())
    }

    fn visibility_timeout(&self) -> Duration {
        Duration::seconds(self.settings.visibility_timeout_seconds as i64)
    }

    /// Create a queue (idempotent) and return its URL
    pub fn create_queue(&self, name: &str) -> Result<QueueUrl, QueueError> {
        let url = QueueUrl::in_memory(name)?;
        let mut storage = self.write()?;
        if !storage.queues.contains_key(&url) {
            storage.queues.insert(url.clone(), InMemoryQueue::default());
            info!(queue = %url, "Created in-memory queue");
        }
        Ok(url)
    }

    /// Check whether a queue exists
    pub fn has_queue(&self, url: &QueueUrl) -> bool {
        self.read()
            .map(|storage| storage.queues.contains_key(url))
            .unwrap_or(false)
    }

    /// Attach a redrive policy to a queue; the dead letter queue must exist
    pub fn set_redrive_policy(
        &self,
        queue: &QueueUrl,
        policy: RedrivePolicy,
    ) -> Result<(), QueueError> {
        if policy.max_receive_count == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_receive_count must be at least 1".to_string(),
            }
            .into());
        }

        let mut storage = self.write()?;
        if !storage.queues.contains_key(&policy.dead_letter_url) {
            return Err(queue_not_found(&policy.dead_letter_url));
        }

        let state = storage
            .queues
            .get_mut(queue)
            .ok_or_else(|| queue_not_found(queue))?;
        state.redrive_policy = Some(policy);
        Ok(())
    }

    /// Create a topic (idempotent) and return its ARN
    pub fn create_topic(&self, name: &str) -> Result<TopicArn, QueueError> {
        let arn = TopicArn::in_memory(name)?;
        let mut storage = self.write()?;
        storage.topics.entry(arn.clone()).or_default();
        Ok(arn)
    }

    /// Subscribe a queue to a topic
    pub fn subscribe(
        &self,
        topic: &TopicArn,
        queue: &QueueUrl,
        raw_delivery: bool,
    ) -> Result<(), QueueError> {
        let mut storage = self.write()?;
        if !storage.queues.contains_key(queue) {
            return Err(queue_not_found(queue));
        }

        let subscriptions = storage
            .topics
            .get_mut(topic)
            .ok_or_else(|| QueueError::TopicNotFound {
                topic: topic.to_string(),
            })?;
        subscriptions.push(Subscription {
            queue_url: queue.clone(),
            raw_delivery,
        });
        Ok(())
    }

    fn enqueue(
        storage: &mut BrokerStorage,
        url: &QueueUrl,
        message: &Message,
        message_id: MessageId,
    ) -> Result<(), QueueError> {
        let state = storage
            .queues
            .get_mut(url)
            .ok_or_else(|| queue_not_found(url))?;
        state
            .messages
            .push_back(StoredMessage::from_message(message, message_id));
        Ok(())
    }

    fn check_size(message: &Message) -> Result<(), QueueError> {
        let max_size = ProviderType::InMemory.max_message_size();
        if message.body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size,
            });
        }
        Ok(())
    }

    /// Append a message to a queue
    pub fn send(&self, url: &QueueUrl, message: &Message) -> Result<MessageId, QueueError> {
        Self::check_size(message)?;
        let message_id = MessageId::new();
        let mut storage = self.write()?;
        Self::enqueue(&mut storage, url, message, message_id.clone())?;
        Ok(message_id)
    }

    /// Append several messages to a queue; all or nothing
    pub fn send_batch(
        &self,
        url: &QueueUrl,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError> {
        for message in messages {
            Self::check_size(message)?;
        }

        let mut storage = self.write()?;
        let state = storage
            .queues
            .get_mut(url)
            .ok_or_else(|| queue_not_found(url))?;

        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            let message_id = MessageId::new();
            state
                .messages
                .push_back(StoredMessage::from_message(message, message_id.clone()));
            ids.push(message_id);
        }
        Ok(ids)
    }

    /// Receive up to `max_messages` visible messages, hiding them for the
    /// visibility timeout. Messages received more often than the queue's redrive
    /// policy allows are moved to its dead letter queue instead.
    pub fn receive(
        &self,
        url: &QueueUrl,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let visible_at =
            Timestamp::from_datetime(Timestamp::now().as_datetime() + self.visibility_timeout());
        let mut storage = self.write()?;
        let state = storage
            .queues
            .get_mut(url)
            .ok_or_else(|| queue_not_found(url))?;
        state.release_expired();

        let mut received = Vec::new();
        let mut dead_lettered = Vec::new();
        while received.len() < max_messages as usize {
            let Some(mut stored) = state.messages.pop_front() else {
                break;
            };
            stored.receive_count += 1;

            if let Some(policy) = &state.redrive_policy {
                if stored.receive_count > policy.max_receive_count {
                    dead_lettered.push((policy.dead_letter_url.clone(), stored));
                    continue;
                }
            }

            let receipt = uuid::Uuid::new_v4().to_string();
            received.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                body: stored.body.clone(),
                attributes: stored.attributes.clone(),
                message_group_id: stored.message_group_id.clone(),
                receipt_handle: ReceiptHandle::new(receipt.clone(), ProviderType::InMemory),
                receive_count: stored.receive_count,
                sent_at: stored.sent_at,
            });
            state.in_flight.insert(
                receipt,
                InFlightMessage {
                    message: stored,
                    visible_at,
                },
            );
        }

        for (dead_letter_url, mut stored) in dead_lettered {
            debug!(
                queue = %url,
                dead_letter_queue = %dead_letter_url,
                message_id = %stored.message_id,
                "Moving message to dead letter queue"
            );
            stored.receive_count = 0;
            let dlq = storage
                .queues
                .get_mut(&dead_letter_url)
                .ok_or_else(|| queue_not_found(&dead_letter_url))?;
            dlq.messages.push_back(stored);
        }

        Ok(received)
    }

    /// Delete an in-flight message by receipt
    pub fn delete(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut storage = self.write()?;
        let state = storage
            .queues
            .get_mut(url)
            .ok_or_else(|| queue_not_found(url))?;

        state
            .in_flight
            .remove(receipt.handle())
            .map(|_| ())
            .ok_or_else(|| QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            })
    }

    /// Visible plus in-flight message count
    pub fn message_count(&self, url: &QueueUrl) -> Result<u64, QueueError> {
        let storage = self.read()?;
        let state = storage.queues.get(url).ok_or_else(|| queue_not_found(url))?;
        Ok((state.messages.len() + state.in_flight.len()) as u64)
    }

    /// Fan a message out to every subscription of a topic
    pub fn publish(&self, topic: &TopicArn, message: &Message) -> Result<MessageId, QueueError> {
        Self::check_size(message)?;
        let message_id = MessageId::new();
        let mut storage = self.write()?;
        let subscriptions =
            storage
                .topics
                .get(topic)
                .cloned()
                .ok_or_else(|| QueueError::TopicNotFound {
                    topic: topic.to_string(),
                })?;

        for subscription in &subscriptions {
            if subscription.raw_delivery {
                Self::enqueue(
                    &mut storage,
                    &subscription.queue_url,
                    message,
                    MessageId::new(),
                )?;
            } else {
                let envelope = NotificationEnvelope::wrap(&message_id, topic, message)?;
                let wrapped = Message::new(envelope.to_body()?);
                Self::enqueue(
                    &mut storage,
                    &subscription.queue_url,
                    &wrapped,
                    MessageId::new(),
                )?;
            }
        }

        debug!(
            topic = %topic,
            subscriptions = subscriptions.len(),
            "Published message to in-memory topic"
        );
        Ok(message_id)
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
#[derive(Clone, Default)]
pub struct InMemoryProvider {
    broker: InMemoryBroker,
}

impl InMemoryProvider {
    /// Create new in-memory provider over a broker
    pub fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueUrl,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        self.broker.send(queue, message)
    }

    async fn send_messages(
        &self,
        queue: &QueueUrl,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError> {
        self.broker.send_batch(queue, messages)
    }

    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
        _wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        // No long polling: an empty queue answers immediately
        self.broker.receive(queue, max_messages)
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.broker.delete(queue, receipt)
    }

    async fn approximate_message_count(&self, queue: &QueueUrl) -> Result<u64, QueueError> {
        self.broker.message_count(queue)
    }

    async fn resolve_queue_url(&self, name: &str) -> Result<QueueUrl, QueueError> {
        self.broker.create_queue(name)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> u32 {
        ProviderType::InMemory.max_batch_size()
    }
}

// ============================================================================
// InMemoryTopicProvider
// ============================================================================

/// In-memory topic provider implementation
#[derive(Clone, Default)]
pub struct InMemoryTopicProvider {
    broker: InMemoryBroker,
}

impl InMemoryTopicProvider {
    /// Create new in-memory topic provider over a broker
    pub fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl TopicProvider for InMemoryTopicProvider {
    async fn publish(&self, topic: &TopicArn, message: &Message) -> Result<MessageId, QueueError> {
        self.broker.publish(topic, message)
    }

    async fn publish_batch(
        &self,
        topic: &TopicArn,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError> {
        messages
            .iter()
            .map(|message| self.broker.publish(topic, message))
            .collect()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> u32 {
        ProviderType::InMemory.max_batch_size()
    }
}
