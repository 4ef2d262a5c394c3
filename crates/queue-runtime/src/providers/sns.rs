//! AWS SNS topic provider implementation using the HTTP query API.
//!
//! Message attributes travel as `MessageAttributes.entry.N.*` parameters.
//! FIFO topics (`.fifo` suffix) need a message group id on every publish.

use crate::client::TopicProvider;
use crate::error::{QueueError, SerializationError, ValidationError};
use crate::message::{Message, MessageId, TopicArn};
use crate::provider::{AwsSettings, ProviderType};
use crate::providers::aws::{
    describe_batch_failures, encode_attributes, AwsError, AwsHttpClient, XmlNode,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

#[cfg(test)]
#[path = "sns_tests.rs"]
mod tests;

const SNS_API_VERSION: &str = "2010-03-31";

/// AWS SNS topic provider implementation
#[derive(Debug)]
pub struct AwsSnsProvider {
    client: AwsHttpClient,
}

impl AwsSnsProvider {
    /// Create new AWS SNS provider
    pub fn new(settings: AwsSettings) -> Result<Self, QueueError> {
        let client = AwsHttpClient::new(&settings, "sns", SNS_API_VERSION)
            .map_err(|e| e.to_queue_error(ProviderType::AwsSns))?;
        Ok(Self { client })
    }

    async fn call(
        &self,
        action: &str,
        params: Vec<(String, String)>,
    ) -> Result<XmlNode, QueueError> {
        self.client
            .call(action, params)
            .await
            .map_err(|e| e.to_queue_error(ProviderType::AwsSns))
    }

    fn message_params(
        topic: &TopicArn,
        message: &Message,
    ) -> Result<Vec<(String, String)>, QueueError> {
        let body = std::str::from_utf8(&message.body).map_err(|_| SerializationError::InvalidUtf8)?;

        let max_size = ProviderType::AwsSns.max_message_size();
        if body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max_size,
            });
        }

        let mut params = vec![("Message".to_string(), body.to_string())];
        encode_attributes(&mut params, "MessageAttributes.entry", &message.attributes);

        if topic.short_name().ends_with(".fifo") {
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
}

#[async_trait]
impl TopicProvider for AwsSnsProvider {
    async fn publish(&self, topic: &TopicArn, message: &Message) -> Result<MessageId, QueueError> {
        let mut params = vec![("TopicArn".to_string(), topic.to_string())];
        params.extend(Self::message_params(topic, message)?);

        let response = self.call("Publish", params).await?;
        let message_id = response
            .find("MessageId")
            .map(|node| node.text.as_str())
            .ok_or_else(|| {
                AwsError::MalformedResponse("MessageId not found in response".to_string())
                    .to_queue_error(ProviderType::AwsSns)
            })?;

        Ok(MessageId::from_str(message_id)?)
    }

    async fn publish_batch(
        &self,
        topic: &TopicArn,
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

        let mut params = vec![("TopicArn".to_string(), topic.to_string())];
        for (idx, message) in messages.iter().enumerate() {
            let prefix = format!("PublishBatchRequestEntries.member.{}", idx + 1);
            params.push((format!("{}.Id", prefix), format!("msg-{}", idx)));
            for (key, value) in Self::message_params(topic, message)? {
                params.push((format!("{}.{}", prefix, key), value));
            }
        }

        let response = self.call("PublishBatch", params).await?;

        let failed: Vec<&XmlNode> = response
            .find("Failed")
            .map(|node| node.children_named("member").collect())
            .unwrap_or_default();
        if !failed.is_empty() {
            warn!(
                topic = %topic,
                failed = failed.len(),
                total = messages.len(),
                "SNS rejected batch entries"
            );
            return Err(QueueError::BatchEntriesFailed {
                failed: failed.len(),
                total: messages.len(),
                details: describe_batch_failures(&failed),
            });
        }

        let by_entry: HashMap<&str, &str> = response
            .find("Successful")
            .map(|node| {
                node.children_named("member")
                    .filter_map(|m| Some((m.child_text("Id")?, m.child_text("MessageId")?)))
                    .collect()
            })
            .unwrap_or_default();

        (0..messages.len())
            .map(|idx| -> Result<MessageId, QueueError> {
                let entry_id = format!("msg-{}", idx);
                let message_id = by_entry.get(entry_id.as_str()).ok_or_else(|| {
                    AwsError::MalformedResponse(format!("no result for batch entry {}", entry_id))
                        .to_queue_error(ProviderType::AwsSns)
                })?;
                Ok(MessageId::from_str(message_id)?)
            })
            .collect()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSns
    }

    fn max_batch_size(&self) -> u32 {
        ProviderType::AwsSns.max_batch_size()
    }
}
