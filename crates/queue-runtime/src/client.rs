//! Client traits and implementations for queue and topic operations.

use crate::error::{ConfigurationError, QueueError};
use crate::intercept::{with_context, Destination, Outcome, PublishChain};
use crate::message::{Message, MessageId, QueueUrl, ReceiptHandle, ReceivedMessage, TopicArn};
use crate::provider::{ProviderSettings, ProviderType};
use crate::providers::{
    AwsSnsProvider, AwsSqsProvider, InMemoryBroker, InMemoryProvider, InMemoryTopicProvider,
};
use async_trait::async_trait;
use chrono::Duration;
use opentelemetry::Context;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Main interface for queue operations across all providers
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Send single message to queue
    async fn send_message(&self, queue: &QueueUrl, message: Message)
        -> Result<MessageId, QueueError>;

    /// Send multiple messages in one call
    async fn send_messages(
        &self,
        queue: &QueueUrl,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Receive up to `max_messages`, waiting at most `wait` for the first one
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Remove a received message permanently
    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Visible plus in-flight messages on the queue
    async fn approximate_message_count(&self, queue: &QueueUrl) -> Result<u64, QueueError>;

    /// Resolve a queue name to its URL
    async fn resolve_queue_url(&self, name: &str) -> Result<QueueUrl, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum batch size
    fn max_batch_size(&self) -> u32;
}

/// Interface implemented by specific queue providers (AWS, in-memory)
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Send single message
    async fn send_message(&self, queue: &QueueUrl, message: &Message)
        -> Result<MessageId, QueueError>;

    /// Send multiple messages
    async fn send_messages(
        &self,
        queue: &QueueUrl,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Receive multiple messages
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete a received message
    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Approximate visible plus in-flight count
    async fn approximate_message_count(&self, queue: &QueueUrl) -> Result<u64, QueueError>;

    /// Resolve a queue name to its URL
    async fn resolve_queue_url(&self, name: &str) -> Result<QueueUrl, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum batch size
    fn max_batch_size(&self) -> u32;
}

/// Main interface for topic publishing across all providers
#[async_trait]
pub trait TopicClient: Send + Sync {
    /// Publish single message to topic
    async fn publish(&self, topic: &TopicArn, message: Message) -> Result<MessageId, QueueError>;

    /// Publish multiple messages in one call
    async fn publish_batch(
        &self,
        topic: &TopicArn,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Interface implemented by specific topic providers
#[async_trait]
pub trait TopicProvider: Send + Sync {
    /// Publish single message
    async fn publish(&self, topic: &TopicArn, message: &Message) -> Result<MessageId, QueueError>;

    /// Publish multiple messages
    async fn publish_batch(
        &self,
        topic: &TopicArn,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum batch size
    fn max_batch_size(&self) -> u32;
}

fn check_batch_size(len: usize, max_size: u32) -> Result<(), QueueError> {
    if len > max_size as usize {
        return Err(QueueError::BatchTooLarge {
            size: len,
            max_size: max_size as usize,
        });
    }
    Ok(())
}

// ============================================================================
// Standard Clients
// ============================================================================

/// Standard queue client: runs the publish interceptor chain around every send
pub struct StandardQueueClient {
    provider: Box<dyn QueueProvider>,
    interceptors: PublishChain,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Box<dyn QueueProvider>) -> Self {
        Self {
            provider,
            interceptors: PublishChain::new(),
        }
    }

    /// Replace the publish interceptor chain
    pub fn with_interceptors(mut self, interceptors: PublishChain) -> Self {
        self.interceptors = interceptors;
        self
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    async fn send_message(
        &self,
        queue: &QueueUrl,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        let destination = Destination::queue(queue, self.provider.provider_type());
        let mut batch = [message];
        let scope = self
            .interceptors
            .before_publish(Context::current(), &destination, &mut batch);

        let result = with_context(
            self.provider.send_message(queue, &batch[0]),
            scope.context().clone(),
        )
        .await;

        scope.close(Outcome::from_result(&result));
        result
    }

    async fn send_messages(
        &self,
        queue: &QueueUrl,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        check_batch_size(messages.len(), self.provider.max_batch_size())?;

        let destination = Destination::queue(queue, self.provider.provider_type());
        let mut batch = messages;
        let scope = self
            .interceptors
            .before_publish(Context::current(), &destination, &mut batch);

        let result = with_context(
            self.provider.send_messages(queue, &batch),
            scope.context().clone(),
        )
        .await;

        scope.close(Outcome::from_result(&result));
        result
    }

    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max_messages = max_messages.min(self.provider.max_batch_size());
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let messages = self
            .provider
            .receive_messages(queue, max_messages, wait)
            .await?;
        debug!(queue = %queue, count = messages.len(), "Received messages");
        Ok(messages)
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.provider.delete_message(queue, receipt).await
    }

    async fn approximate_message_count(&self, queue: &QueueUrl) -> Result<u64, QueueError> {
        self.provider.approximate_message_count(queue).await
    }

    async fn resolve_queue_url(&self, name: &str) -> Result<QueueUrl, QueueError> {
        self.provider.resolve_queue_url(name).await
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    fn max_batch_size(&self) -> u32 {
        self.provider.max_batch_size()
    }
}

/// Standard topic client: runs the publish interceptor chain around every publish
pub struct StandardTopicClient {
    provider: Box<dyn TopicProvider>,
    interceptors: PublishChain,
}

impl StandardTopicClient {
    /// Create new standard topic client with provider
    pub fn new(provider: Box<dyn TopicProvider>) -> Self {
        Self {
            provider,
            interceptors: PublishChain::new(),
        }
    }

    /// Replace the publish interceptor chain
    pub fn with_interceptors(mut self, interceptors: PublishChain) -> Self {
        self.interceptors = interceptors;
        self
    }
}

#[async_trait]
impl TopicClient for StandardTopicClient {
    async fn publish(&self, topic: &TopicArn, message: Message) -> Result<MessageId, QueueError> {
        let destination = Destination::topic(topic, self.provider.provider_type());
        let mut batch = [message];
        let scope = self
            .interceptors
            .before_publish(Context::current(), &destination, &mut batch);

        let result = with_context(
            self.provider.publish(topic, &batch[0]),
            scope.context().clone(),
        )
        .await;

        scope.close(Outcome::from_result(&result));
        result
    }

    async fn publish_batch(
        &self,
        topic: &TopicArn,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        check_batch_size(messages.len(), self.provider.max_batch_size())?;

        let destination = Destination::topic(topic, self.provider.provider_type());
        let mut batch = messages;
        let scope = self
            .interceptors
            .before_publish(Context::current(), &destination, &mut batch);

        let result = with_context(
            self.provider.publish_batch(topic, &batch),
            scope.context().clone(),
        )
        .await;

        scope.close(Outcome::from_result(&result));
        result
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Factory for creating queue and topic clients for one transport
pub struct ClientFactory {
    settings: ProviderSettings,
    broker: InMemoryBroker,
}

impl ClientFactory {
    /// Create factory from settings; in-memory settings get a fresh broker
    pub fn new(settings: ProviderSettings) -> Self {
        let broker = match &settings {
            ProviderSettings::InMemory(in_memory) => InMemoryBroker::new(in_memory.clone()),
            ProviderSettings::Aws(_) => InMemoryBroker::default(),
        };
        Self { settings, broker }
    }

    /// Create an in-memory factory sharing an existing broker
    pub fn with_broker(broker: InMemoryBroker) -> Self {
        Self {
            settings: ProviderSettings::InMemory(broker.settings().clone()),
            broker,
        }
    }

    /// Settings this factory builds for
    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Broker backing in-memory clients
    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Build the queue provider for these settings
    pub fn queue_provider(&self) -> Result<Box<dyn QueueProvider>, QueueError> {
        match &self.settings {
            ProviderSettings::InMemory(_) => {
                Ok(Box::new(InMemoryProvider::new(self.broker.clone())))
            }
            ProviderSettings::Aws(aws) => Ok(Box::new(AwsSqsProvider::new(aws.clone())?)),
        }
    }

    /// Build the topic provider for these settings
    pub fn topic_provider(&self) -> Result<Box<dyn TopicProvider>, QueueError> {
        match &self.settings {
            ProviderSettings::InMemory(_) => {
                Ok(Box::new(InMemoryTopicProvider::new(self.broker.clone())))
            }
            ProviderSettings::Aws(aws) => Ok(Box::new(AwsSnsProvider::new(aws.clone())?)),
        }
    }

    /// Build a queue client with the given publish interceptors
    pub fn queue_client(
        &self,
        interceptors: PublishChain,
    ) -> Result<Arc<dyn QueueClient>, QueueError> {
        let provider = self.queue_provider()?;
        Ok(Arc::new(
            StandardQueueClient::new(provider).with_interceptors(interceptors),
        ))
    }

    /// Build a topic client with the given publish interceptors
    pub fn topic_client(
        &self,
        interceptors: PublishChain,
    ) -> Result<Arc<dyn TopicClient>, QueueError> {
        let provider = self.topic_provider()?;
        Ok(Arc::new(
            StandardTopicClient::new(provider).with_interceptors(interceptors),
        ))
    }

    /// Resolve a topic name to an ARN.
    ///
    /// In-memory topics are created on demand; AWS topics must be configured by ARN.
    pub fn resolve_topic_arn(&self, name: &str) -> Result<TopicArn, QueueError> {
        match &self.settings {
            ProviderSettings::InMemory(_) => self.broker.create_topic(name),
            ProviderSettings::Aws(_) => Err(ConfigurationError::Missing {
                key: format!("arn for topic '{}'", name),
            }
            .into()),
        }
    }
}
