//! # Queue Runtime
//!
//! Provider-agnostic queue and topic runtime with AWS SQS/SNS and in-memory
//! implementations.
//!
//! This library provides:
//! - URL-addressed queues and ARN-addressed topics with typed message attributes
//! - Standard clients that run an interceptor chain around every send and publish
//! - A consumer dispatch loop that runs receive interceptors around each handler
//! - An in-memory broker with visibility timeouts and max-receive-count redrive
//! - AWS providers speaking the SQS/SNS query API with Signature V4
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Messages, attributes, identifiers and receipt handles
//! - [`provider`] - Provider types and settings
//! - [`client`] - Client traits, standard clients and the client factory
//! - [`intercept`] - Publish/receive interceptor hooks and scopes
//! - [`consumer`] - Receive-and-dispatch loop
//! - [`providers`] - Transport implementations

pub mod client;
pub mod consumer;
pub mod error;
pub mod intercept;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{
    ClientFactory, QueueClient, QueueProvider, StandardQueueClient, StandardTopicClient,
    TopicClient, TopicProvider,
};
pub use consumer::{Consumer, HandlerError, MessageHandler, PollSummary};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use intercept::{
    with_context, Destination, DestinationKind, InterceptScope, InterceptorChain, Outcome,
    PublishChain, PublishInterceptor, ReceiveChain, ReceiveInterceptor,
};
pub use message::{
    Message, MessageAttribute, MessageId, NotificationEnvelope, QueueUrl, ReceiptHandle,
    ReceivedMessage, Timestamp, TopicArn, EVENT_TYPE_ATTRIBUTE, NO_TRACING_ATTRIBUTE,
};
pub use provider::{AwsSettings, InMemorySettings, ProviderSettings, ProviderType};
pub use providers::{InMemoryBroker, InMemoryProvider, InMemoryTopicProvider, RedrivePolicy};
