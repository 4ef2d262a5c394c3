//! # DLQ Redrive Engine
//!
//! Moves messages from a dead letter queue back onto the queue they came from.
//!
//! ## Delivery guarantee
//!
//! Each message is published to the destination first and deleted from the
//! source only after the publish succeeded. A crash in between leaves a
//! duplicate on the destination, never a lost message (at-least-once).
//!
//! ## Failure isolation
//!
//! A failed publish or delete is recorded in [`TransferResult::failures`] and
//! the message is left on the DLQ; the pass continues with the next message. A
//! failed receive ends the pass. Within one pass each message is attempted at
//! most once, so a message that keeps failing cannot hold the loop open.
//!
//! The engine takes no locks. Concurrent passes over the same queue pair rely
//! on the transport's visibility timeout for mutual exclusion.

use crate::registry::{Registry, RegistryError};
use chrono::Duration;
use queue_runtime::{MessageId, QueueClient, QueueUrl};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "redrive_tests.rs"]
mod tests;

/// Receive batch size used when a request does not set one
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Long-poll duration used when a request does not set one
pub fn default_wait() -> Duration {
    Duration::seconds(1)
}

// ============================================================================
// Transfer Types
// ============================================================================

/// One redrive operation: source (the DLQ) to destination (the main queue)
#[derive(Clone)]
pub struct TransferRequest {
    pub source_client: Arc<dyn QueueClient>,
    pub source_url: QueueUrl,
    pub destination_client: Arc<dyn QueueClient>,
    pub destination_url: QueueUrl,
    /// Upper bound on moved messages; `None` moves everything
    pub max_messages: Option<u64>,
    pub wait: Duration,
    /// Messages requested per receive; capped by the source client's limit
    pub batch_size: u32,
}

impl TransferRequest {
    pub fn new(
        source_client: Arc<dyn QueueClient>,
        source_url: QueueUrl,
        destination_client: Arc<dyn QueueClient>,
        destination_url: QueueUrl,
    ) -> Self {
        Self {
            source_client,
            source_url,
            destination_client,
            destination_url,
            max_messages: None,
            wait: default_wait(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_max_messages(mut self, max_messages: Option<u64>) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn receive_limit(&self, moved: u64) -> u32 {
        let transport_limit = self.batch_size.min(self.source_client.max_batch_size()).max(1);
        match self.max_messages {
            Some(max) => {
                let remaining = max.saturating_sub(moved);
                transport_limit.min(u32::try_from(remaining).unwrap_or(u32::MAX))
            }
            None => transport_limit,
        }
    }
}

/// Per-message failure recorded during a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum TransferItemError {
    #[error("Publishing message {message_id} failed: {reason}")]
    Publish { message_id: String, reason: String },

    #[error("Deleting message {message_id} from the source failed: {reason}")]
    Delete { message_id: String, reason: String },

    #[error("Receiving from the source failed: {reason}")]
    Receive { reason: String },
}

/// Outcome of one transfer pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub moved_count: u64,
    /// Approximate messages left on the source; `None` when it could not be read
    pub remaining_count: Option<u64>,
    pub failures: Vec<TransferItemError>,
}

impl TransferResult {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

// ============================================================================
// Transfer
// ============================================================================

/// Move messages from `request.source_url` to `request.destination_url`.
///
/// Never fails as a whole; per-message problems are reported in the result.
pub async fn transfer(request: &TransferRequest) -> TransferResult {
    let mut result = TransferResult::default();
    if request.max_messages == Some(0) {
        return result;
    }

    info!(
        source = %request.source_url,
        destination = %request.destination_url,
        max_messages = ?request.max_messages,
        "Starting redrive"
    );

    let mut attempted_failures: HashSet<MessageId> = HashSet::new();
    'pass: loop {
        let limit = request.receive_limit(result.moved_count);
        if limit == 0 {
            break;
        }

        let messages = match request
            .source_client
            .receive_messages(&request.source_url, limit, request.wait)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(source = %request.source_url, error = %e, "Redrive receive failed; ending pass");
                result.failures.push(TransferItemError::Receive {
                    reason: e.to_string(),
                });
                break;
            }
        };

        if messages.is_empty() {
            break;
        }
        if messages
            .iter()
            .all(|m| attempted_failures.contains(&m.message_id))
        {
            debug!(source = %request.source_url, "Only previously failed messages remain");
            break;
        }

        for message in &messages {
            if request
                .max_messages
                .is_some_and(|max| result.moved_count >= max)
            {
                break 'pass;
            }
            if attempted_failures.contains(&message.message_id) {
                continue;
            }

            if let Err(e) = request
                .destination_client
                .send_message(&request.destination_url, message.message())
                .await
            {
                warn!(
                    message_id = %message.message_id,
                    destination = %request.destination_url,
                    error = %e,
                    "Redrive publish failed; message stays on the dead letter queue"
                );
                attempted_failures.insert(message.message_id.clone());
                result.failures.push(TransferItemError::Publish {
                    message_id: message.message_id.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }

            if let Err(e) = request
                .source_client
                .delete_message(&request.source_url, &message.receipt_handle)
                .await
            {
                warn!(
                    message_id = %message.message_id,
                    source = %request.source_url,
                    error = %e,
                    "Redrive delete failed; message was published and stays on the dead letter queue"
                );
                attempted_failures.insert(message.message_id.clone());
                result.failures.push(TransferItemError::Delete {
                    message_id: message.message_id.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }

            result.moved_count += 1;
        }
    }

    result.remaining_count = match request
        .source_client
        .approximate_message_count(&request.source_url)
        .await
    {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(source = %request.source_url, error = %e, "Could not read remaining count");
            None
        }
    };

    info!(
        source = %request.source_url,
        destination = %request.destination_url,
        moved = result.moved_count,
        remaining = ?result.remaining_count,
        failures = result.failures.len(),
        "Finished redrive"
    );
    result
}

// ============================================================================
// Admin Operation
// ============================================================================

/// Configuration problems that prevent a redrive from starting
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedriveError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Queue '{id}' has no dead letter queue")]
    NoDeadLetterQueue { id: String },
}

/// Per-queue results of a retry-all pass, keyed by queue identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedriveReport {
    pub results: BTreeMap<String, TransferResult>,
}

impl RedriveReport {
    pub fn total_moved(&self) -> u64 {
        self.results.values().map(|r| r.moved_count).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.results.values().any(TransferResult::has_failures)
    }
}

/// "Retry DLQ messages" admin operation over the registry
#[derive(Debug, Clone)]
pub struct DlqRedriver {
    registry: Arc<Registry>,
    wait: Duration,
    batch_size: u32,
}

impl DlqRedriver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            wait: default_wait(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Move up to `max_messages` from the DLQ of queue `queue_id` back to the queue.
    ///
    /// # Errors
    ///
    /// - [`RedriveError::Registry`] if `queue_id` is not registered
    /// - [`RedriveError::NoDeadLetterQueue`] if the queue has no DLQ
    pub async fn retry_dlq(
        &self,
        queue_id: &str,
        max_messages: Option<u64>,
    ) -> Result<TransferResult, RedriveError> {
        let binding = self.registry.resolve_queue(queue_id)?;
        let dead_letter = binding
            .dead_letter
            .as_ref()
            .ok_or_else(|| RedriveError::NoDeadLetterQueue {
                id: queue_id.to_string(),
            })?;

        let request = TransferRequest::new(
            Arc::clone(&dead_letter.client),
            dead_letter.url.clone(),
            Arc::clone(&binding.client),
            binding.queue_url.clone(),
        )
        .with_max_messages(max_messages)
        .with_wait(self.wait)
        .with_batch_size(self.batch_size);

        Ok(transfer(&request).await)
    }

    /// Retry every queue that has a DLQ, one after another.
    ///
    /// `max_messages` bounds each queue separately.
    pub async fn retry_all_dlqs(&self, max_messages: Option<u64>) -> RedriveReport {
        let mut report = RedriveReport::default();
        for binding in self.registry.list_queues() {
            if !binding.has_dead_letter() {
                debug!(id = %binding.id, "Skipping queue without dead letter queue");
                continue;
            }

            match self.retry_dlq(binding.id.as_str(), max_messages).await {
                Ok(result) => {
                    report.results.insert(binding.id.to_string(), result);
                }
                Err(e) => {
                    warn!(id = %binding.id, error = %e, "Skipping queue during retry-all");
                }
            }
        }

        info!(
            queues = report.results.len(),
            moved = report.total_moved(),
            "Finished retrying all dead letter queues"
        );
        report
    }
}
