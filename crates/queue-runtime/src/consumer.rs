//! Consumer dispatch: receive a batch, run the receive interceptors around each
//! handler invocation, and settle every message.
//!
//! A message is deleted only after its handler succeeds. Failed messages stay
//! on the queue and become visible again after the visibility timeout, so the
//! transport's max-receive-count policy eventually moves them to the DLQ.

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::intercept::{with_context, Destination, Outcome, ReceiveChain};
use crate::message::{QueueUrl, ReceivedMessage};
use async_trait::async_trait;
use chrono::Duration;
use opentelemetry::Context;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Error returned by a message handler
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message can never be processed (bad payload, unknown event type)
    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Handler failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Business logic run for every delivered message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError>;
}

/// Counts for one receive-and-dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub handled: usize,
    pub failed: usize,
}

/// Pulls messages from one queue and hands them to a [`MessageHandler`]
pub struct Consumer {
    client: Arc<dyn QueueClient>,
    queue: QueueUrl,
    interceptors: ReceiveChain,
    max_messages: u32,
    wait: Duration,
}

impl Consumer {
    /// Consumer with an empty receive chain, receiving full batches without waiting
    pub fn new(client: Arc<dyn QueueClient>, queue: QueueUrl) -> Self {
        let max_messages = client.max_batch_size();
        Self {
            client,
            queue,
            interceptors: ReceiveChain::new(),
            max_messages,
            wait: Duration::zero(),
        }
    }

    pub fn with_interceptors(mut self, interceptors: ReceiveChain) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// Long-poll duration for each receive call
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn queue(&self) -> &QueueUrl {
        &self.queue
    }

    /// Receive one batch and dispatch every message in it.
    ///
    /// # Errors
    ///
    /// Only the receive call itself fails the pass. Handler failures and
    /// failed deletes are counted in the summary.
    pub async fn poll_once(&self, handler: &dyn MessageHandler) -> Result<PollSummary, QueueError> {
        let messages = self
            .client
            .receive_messages(&self.queue, self.max_messages, self.wait)
            .await?;

        let source = Destination::queue(&self.queue, self.client.provider_type());
        let mut summary = PollSummary {
            received: messages.len(),
            ..PollSummary::default()
        };

        for message in &messages {
            let scope = self
                .interceptors
                .before_handle(Context::current(), &source, message);
            let result = with_context(handler.handle(message), scope.context().clone()).await;
            scope.close(Outcome::from_result(&result));

            match result {
                Ok(()) => match self
                    .client
                    .delete_message(&self.queue, &message.receipt_handle)
                    .await
                {
                    Ok(()) => summary.handled += 1,
                    Err(e) => {
                        warn!(
                            queue = %self.queue,
                            message_id = %message.message_id,
                            error = %e,
                            "Handled message could not be deleted and will be redelivered"
                        );
                        summary.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(
                        queue = %self.queue,
                        message_id = %message.message_id,
                        receive_count = message.receive_count,
                        error = %e,
                        "Message handler failed; leaving message for redelivery"
                    );
                    summary.failed += 1;
                }
            }
        }

        debug!(
            queue = %self.queue,
            received = summary.received,
            handled = summary.handled,
            failed = summary.failed,
            "Consumer poll finished"
        );
        Ok(summary)
    }
}
