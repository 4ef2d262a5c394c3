//! # Queue-Steward Core
//!
//! The pieces of queue-steward that sit above the transport:
//!
//! - [`registry`]: the immutable map from logical identifiers to queue and
//!   topic bindings, each queue optionally paired with its dead letter queue
//! - [`redrive`]: moving messages from a dead letter queue back to its source
//!   queue, and the "retry DLQ" admin operations built on it
//! - [`propagation`]: interceptors that carry a distributed trace across the
//!   publish/receive boundary in message attributes
//! - [`config`] and [`bootstrap`]: loading configuration and turning it into
//!   a registry at startup
//! - [`publisher`]: publishing domain events to a well-known queue
//!
//! Transport access goes through the `queue-runtime` crate.

pub mod bootstrap;
pub mod config;
pub mod propagation;
pub mod publisher;
pub mod redrive;
pub mod registry;

pub use bootstrap::{
    build_registry, build_registry_with_broker, publish_chain, receive_chain, BootstrapError,
};
pub use config::{
    ConfigError, DeadLetterDefinition, LoggingConfig, QueueDefinition, StewardConfig,
    TopicDefinition, TracingSettings,
};
pub use propagation::{
    messaging_system, AttributeExtractor, AttributeInjector, MessageTracing,
    TracePublishInterceptor, TraceReceiveInterceptor,
};
pub use publisher::{DomainEvent, EventPublisher, PublishError};
pub use redrive::{
    transfer, DlqRedriver, RedriveError, RedriveReport, TransferItemError, TransferRequest,
    TransferResult,
};
pub use registry::{
    BindingId, DeadLetterBinding, QueueBinding, QueueSummary, Registry, RegistryBuilder,
    RegistryError, TopicBinding,
};
