//! AWS SQS provider implementation using the HTTP query API.
//!
//! ## Queue Types
//!
//! ### Standard Queues
//! - At-least-once delivery with best-effort ordering
//!
//! ### FIFO Queues
//! - Identified by the `.fifo` suffix of the queue name
//! - Every message needs a message group id; a deduplication id is generated
//!   when the message does not carry one
//!
//! Message bodies are sent as UTF-8 text. Message attributes travel as
//! `MessageAttribute.N.*` parameters, binary values base64 encoded.

use crate::client::QueueProvider;
use crate::error::{QueueError, SerializationError, ValidationError};
use crate::message::{
    Message, MessageAttribute, MessageId, QueueUrl, ReceiptHandle, ReceivedMessage, Timestamp,
};
use crate::provider::{AwsSettings, ProviderType};
use crate::providers::aws::{
    decode_attribute, describe_batch_failures, encode_attributes, AwsError, AwsHttpClient,
    XmlNode,
};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

const SQS_API_VERSION: &str = "2012-11-05";

/// AWS long polling cap
const MAX_WAIT_SECONDS: i64 = 20;

/// AWS SQS queue provider implementation
///
/// ## Thread Safety
///
/// The provider is thread-safe and can be shared across async tasks using `Arc`.
/// Internal state (queue URL cache) is protected by `RwLock`.
#[derive(Debug)]
pub struct AwsSqsProvider {
    client: AwsHttpClient,
    queue_url_cache: Arc<RwLock<HashMap<String, QueueUrl>>>,
}

impl AwsSqsProvider {
    /// Create new AWS SQS provider
    ///
    /// # Errors
    ///
    /// Returns error if the region is empty, the endpoint is invalid, or no
    /// credentials can be found.
    pub fn new(settings: AwsSettings) -> Result<Self, QueueError> {
        let client = AwsHttpClient::new(&settings, "sqs", SQS_API_VERSION)
            .map_err(|e| e.to_queue_error(ProviderType::AwsSqs))?;

        Ok(Self {
            client,
            queue_url_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    async fn call(
        &self,
        action: &str,
        params: Vec<(String, String)>,
    ) -> Result<XmlNode, QueueError> {
        self.client
            .call(action, params)
            .await
            .map_err(|e| e.to_queue_error(ProviderType::AwsSqs))
    }

    /// Form parameters shared by single and batch sends, without the entry prefix
    fn message_params(queue: &QueueUrl, message: &Message) -> Result<Vec<(String, String)>, QueueError> {
        let body = std::str::from_utf8(&message.body).map_err(|_| SerializationError::InvalidUtf8)?;

        let max_size = ProviderType::AwsSqs.max_message_size();
        if body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max_size,
            });
        }

        let mut params = vec![("MessageBody".to_string(), body.to_string())];
        encode_attributes(&mut params, "MessageAttribute", &message.attributes);

        if queue.is_fifo() {
            let group_id = message
                .message_group_id
                .clone()
                .ok_or_else(|| ValidationError::Required {
                    field: "message_group_id".to_string(),
                })?;
            let deduplication_id = message
                .deduplication_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            params.push(("MessageGroupId".to_string(), group_id));
            params.push(("MessageDeduplicationId".to_string(), deduplication_id));
        }

        Ok(params)
    }

    fn parse_message(node: &XmlNode) -> Result<ReceivedMessage, AwsError> {
        let receipt = node
            .child_text("ReceiptHandle")
            .ok_or_else(|| AwsError::MalformedResponse("message without ReceiptHandle".to_string()))?;
        let message_id = node
            .child_text("MessageId")
            .and_then(|id| MessageId::from_str(id).ok())
            .unwrap_or_default();
        let body = node.child_text("Body").unwrap_or_default();

        let system: HashMap<&str, &str> = node
            .children_named("Attribute")
            .filter_map(|a| Some((a.child_text("Name")?, a.child_text("Value")?)))
            .collect();

        let mut attributes: HashMap<String, MessageAttribute> = HashMap::new();
        for entry in node.children_named("MessageAttribute") {
            let (name, value) = decode_attribute(entry)?;
            attributes.insert(name, value);
        }

        let receive_count = system
            .get("ApproximateReceiveCount")
            .and_then(|c| c.parse().ok())
            .unwrap_or(1);
        let sent_at = system
            .get("SentTimestamp")
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(Timestamp::from_millis)
            .unwrap_or_else(Timestamp::now);

        Ok(ReceivedMessage {
            message_id,
            body: bytes::Bytes::from(body.to_string()),
            attributes,
            message_group_id: system.get("MessageGroupId").map(|g| g.to_string()),
            receipt_handle: ReceiptHandle::new(receipt.to_string(), ProviderType::AwsSqs),
            receive_count,
            sent_at,
        })
    }
}

#[async_trait]
impl QueueProvider for AwsSqsProvider {
    async fn send_message(
        &self,
        queue: &QueueUrl,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let mut params = vec![("QueueUrl".to_string(), queue.to_string())];
        params.extend(Self::message_params(queue, message)?);

        let response = self.call("SendMessage", params).await?;
        let message_id = response
            .find("MessageId")
            .map(|node| node.text.as_str())
            .ok_or_else(|| {
                AwsError::MalformedResponse("MessageId not found in response".to_string())
                    .to_queue_error(ProviderType::AwsSqs)
            })?;

        Ok(MessageId::from_str(message_id)?)
    }

    async fn send_messages(
        &self,
        queue: &QueueUrl,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let max_size = self.max_batch_size() as usize;
        if messages.len() > max_size {
            return Err(QueueError::BatchTooLarge {
                size: messages.len(),
                max_size,
            });
        }

        let mut params = vec![("QueueUrl".to_string(), queue.to_string())];
        for (idx, message) in messages.iter().enumerate() {
            let prefix = format!("SendMessageBatchRequestEntry.{}", idx + 1);
            params.push((format!("{}.Id", prefix), format!("msg-{}", idx)));
            for (key, value) in Self::message_params(queue, message)? {
                params.push((format!("{}.{}", prefix, key), value));
            }
        }

        let response = self.call("SendMessageBatch", params).await?;

        let mut failures = Vec::new();
        response.find_all("BatchResultErrorEntry", &mut failures);
        if !failures.is_empty() {
            warn!(
                queue = %queue,
                failed = failures.len(),
                total = messages.len(),
                "SQS rejected batch entries"
            );
            return Err(QueueError::BatchEntriesFailed {
                failed: failures.len(),
                total: messages.len(),
                details: describe_batch_failures(&failures),
            });
        }

        let mut successes = Vec::new();
        response.find_all("SendMessageBatchResultEntry", &mut successes);
        let by_entry: HashMap<&str, &str> = successes
            .iter()
            .filter_map(|entry| Some((entry.child_text("Id")?, entry.child_text("MessageId")?)))
            .collect();

        (0..messages.len())
            .map(|idx| -> Result<MessageId, QueueError> {
                let entry_id = format!("msg-{}", idx);
                let message_id = by_entry.get(entry_id.as_str()).ok_or_else(|| {
                    AwsError::MalformedResponse(format!("no result for batch entry {}", entry_id))
                        .to_queue_error(ProviderType::AwsSqs)
                })?;
                Ok(MessageId::from_str(message_id)?)
            })
            .collect()
    }

    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let wait_time_seconds = wait.num_seconds().clamp(0, MAX_WAIT_SECONDS);
        let params = vec![
            ("QueueUrl".to_string(), queue.to_string()),
            (
                "MaxNumberOfMessages".to_string(),
                max_messages.clamp(1, self.max_batch_size()).to_string(),
            ),
            ("WaitTimeSeconds".to_string(), wait_time_seconds.to_string()),
            ("AttributeName.1".to_string(), "All".to_string()),
            ("MessageAttributeName.1".to_string(), "All".to_string()),
        ];

        let response = self.call("ReceiveMessage", params).await?;

        let mut nodes = Vec::new();
        response.find_all("Message", &mut nodes);
        let messages = nodes
            .into_iter()
            .map(Self::parse_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_queue_error(ProviderType::AwsSqs))?;

        debug!(queue = %queue, count = messages.len(), "Received SQS messages");
        Ok(messages)
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let params = vec![
            ("QueueUrl".to_string(), queue.to_string()),
            ("ReceiptHandle".to_string(), receipt.handle().to_string()),
        ];

        // DeleteMessage returns an empty result on success
        self.call("DeleteMessage", params).await?;
        Ok(())
    }

    async fn approximate_message_count(&self, queue: &QueueUrl) -> Result<u64, QueueError> {
        let params = vec![
            ("QueueUrl".to_string(), queue.to_string()),
            (
                "AttributeName.1".to_string(),
                "ApproximateNumberOfMessages".to_string(),
            ),
            (
                "AttributeName.2".to_string(),
                "ApproximateNumberOfMessagesNotVisible".to_string(),
            ),
        ];

        let response = self.call("GetQueueAttributes", params).await?;

        let mut attributes = Vec::new();
        response.find_all("Attribute", &mut attributes);
        let total = attributes
            .iter()
            .filter(|a| {
                matches!(
                    a.child_text("Name"),
                    Some("ApproximateNumberOfMessages")
                        | Some("ApproximateNumberOfMessagesNotVisible")
                )
            })
            .filter_map(|a| a.child_text("Value")?.parse::<u64>().ok())
            .sum();

        Ok(total)
    }

    async fn resolve_queue_url(&self, name: &str) -> Result<QueueUrl, QueueError> {
        {
            let cache = self.queue_url_cache.read().await;
            if let Some(url) = cache.get(name) {
                return Ok(url.clone());
            }
        }

        let params = vec![("QueueName".to_string(), name.to_string())];
        let response = self.call("GetQueueUrl", params).await?;
        let url = response
            .find("QueueUrl")
            .map(|node| node.text.trim().to_string())
            .ok_or_else(|| {
                AwsError::MalformedResponse("QueueUrl not found in response".to_string())
                    .to_queue_error(ProviderType::AwsSqs)
            })?;
        let url = QueueUrl::new(&url)?;

        let mut cache = self.queue_url_cache.write().await;
        cache.insert(name.to_string(), url.clone());

        Ok(url)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }

    fn max_batch_size(&self) -> u32 {
        ProviderType::AwsSqs.max_batch_size()
    }
}
