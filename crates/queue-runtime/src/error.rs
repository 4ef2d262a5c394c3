//! Errors raised by the transport layer.
//!
//! [`QueueError`] is what every client and provider call returns. Malformed
//! input, bad settings and undecodable payloads are reported through the
//! nested [`ValidationError`], [`ConfigurationError`] and
//! [`SerializationError`].

use thiserror::Error;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

// ============================================================================
// Transport Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue URL does not address an existing queue
    #[error("Queue '{queue_name}' does not exist")]
    QueueNotFound { queue_name: String },

    #[error("Topic '{topic}' does not exist")]
    TopicNotFound { topic: String },

    /// The receipt handle is unknown, already used, or expired
    #[error("No in-flight message for receipt '{receipt}'")]
    MessageNotFound { receipt: String },

    #[error("Transport call timed out: {operation}")]
    Timeout { operation: String },

    #[error("Could not reach the transport: {message}")]
    ConnectionFailed { message: String },

    #[error("Transport rejected the credentials: {message}")]
    AuthenticationFailed { message: String },

    #[error("Message body of {size} bytes exceeds the {max_size} byte limit")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Batch of {size} messages exceeds the {max_size} message limit")]
    BatchTooLarge { size: usize, max_size: usize },

    /// Some entries of a batch call were rejected; none are retried automatically
    #[error("{failed} of {total} batch entries were rejected: {details}")]
    BatchEntriesFailed {
        failed: usize,
        total: usize,
        details: String,
    },

    /// Error code reported by the transport that has no dedicated variant
    #[error("{provider} returned {code}: {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error(transparent)]
    SerializationError(#[from] SerializationError),

    #[error(transparent)]
    ConfigurationError(#[from] ConfigurationError),

    #[error(transparent)]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Whether repeating the same call may succeed.
    ///
    /// Unclassified provider errors are mostly throttling and 5xx responses,
    /// so they count as transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionFailed { .. }
                | Self::BatchEntriesFailed { .. }
                | Self::ProviderError { .. }
        )
    }

    /// Whether the addressed queue, topic, or in-flight message is gone
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::QueueNotFound { .. } | Self::TopicNotFound { .. } | Self::MessageNotFound { .. }
        )
    }
}

// ============================================================================
// Nested Errors
// ============================================================================

/// A message or provider response could not be encoded or decoded
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Attribute '{key}' cannot be encoded for the transport")]
    InvalidAttribute { key: String },

    #[error("Unexpected transport response: {message}")]
    MalformedResponse { message: String },
}

/// Transport settings are incomplete or inconsistent
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid transport settings: {message}")]
    Invalid { message: String },

    #[error("Missing transport setting: {key}")]
    Missing { key: String },
}

/// An identifier or message field failed validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} is malformed: {message}")]
    InvalidFormat { field: String, message: String },
}
