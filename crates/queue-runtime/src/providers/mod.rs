//! Queue and topic provider implementations.
//!
//! This module contains concrete implementations of the `QueueProvider` and
//! `TopicProvider` traits for different transports.

pub mod aws;
pub mod memory;
pub mod sns;
pub mod sqs;

pub use aws::{AwsCredentials, AwsError, AwsV4Signer};
pub use memory::{InMemoryBroker, InMemoryProvider, InMemoryTopicProvider, RedrivePolicy};
pub use sns::AwsSnsProvider;
pub use sqs::AwsSqsProvider;
