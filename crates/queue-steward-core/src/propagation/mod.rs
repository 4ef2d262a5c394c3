//! # Trace-Context Propagation
//!
//! Interceptors that carry a distributed trace across the publish/receive
//! boundary through message attributes.
//!
//! - [`TracePublishInterceptor`] starts a producer span around each send or
//!   publish call and injects the span's context into every outgoing message.
//! - [`TraceReceiveInterceptor`] extracts that context from a delivered
//!   message and starts a consumer span that is active while the handler runs.
//!
//! Both take their tracer and propagator from an explicitly passed
//! [`MessageTracing`]; neither reads the global OpenTelemetry state. Tracing
//! is best effort: nothing in this module can fail a publish or a delivery.

use opentelemetry::global::BoxedTracer;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanRef, Status, Tracer};
use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use queue_runtime::{Destination, DestinationKind, Outcome, ProviderType};
use std::fmt;
use std::sync::Arc;

mod carrier;
mod publish;
mod receive;

pub use carrier::{AttributeExtractor, AttributeInjector};
pub use publish::TracePublishInterceptor;
pub use receive::TraceReceiveInterceptor;

#[cfg(test)]
#[path = "propagation_tests.rs"]
mod tests;

/// Span attribute naming the messaging system
pub const MESSAGING_SYSTEM: &str = "messaging.system";
/// Span attribute naming the operation (`send` or `receive`)
pub const MESSAGING_OPERATION: &str = "messaging.operation";
/// Span attribute naming the queue or topic short name
pub const MESSAGING_DESTINATION_NAME: &str = "messaging.destination.name";
pub const MESSAGING_BATCH_MESSAGE_COUNT: &str = "messaging.batch.message_count";
pub const MESSAGING_MESSAGE_ID: &str = "messaging.message.id";

/// Tracer and propagation format shared by both interceptors
#[derive(Clone)]
pub struct MessageTracing {
    tracer: Arc<BoxedTracer>,
    propagator: Arc<dyn TextMapPropagator + Send + Sync>,
}

impl MessageTracing {
    /// Tracing with the W3C trace-context propagation format
    pub fn new<T>(tracer: T) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        Self::with_propagator(tracer, TraceContextPropagator::new())
    }

    pub fn with_propagator<T, P>(tracer: T, propagator: P) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
        P: TextMapPropagator + Send + Sync + 'static,
    {
        Self {
            tracer: Arc::new(BoxedTracer::new(Box::new(tracer))),
            propagator: Arc::new(propagator),
        }
    }

    pub(crate) fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }

    pub(crate) fn propagator(&self) -> &(dyn TextMapPropagator + Send + Sync) {
        self.propagator.as_ref()
    }

    /// Attribute names the propagation format writes
    pub fn fields(&self) -> Vec<String> {
        self.propagator.fields().map(str::to_string).collect()
    }
}

impl fmt::Debug for MessageTracing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageTracing")
            .field("fields", &self.fields())
            .finish()
    }
}

/// Failures inside the propagation layer. Logged at debug level, never raised.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TracingBestEffortError {
    #[error("payload is not a notification envelope: {0}")]
    UnparseablePayload(String),

    #[error("envelope attributes could not be decoded: {0}")]
    EnvelopeAttributes(String),
}

/// `messaging.system` value for a destination
pub fn messaging_system(destination: &Destination) -> &'static str {
    match (destination.provider_type, destination.kind) {
        (ProviderType::AwsSqs, _) => "aws_sqs",
        (ProviderType::AwsSns, _) => "aws_sns",
        (ProviderType::InMemory, DestinationKind::Queue) => "memory_queue",
        (ProviderType::InMemory, DestinationKind::Topic) => "memory_topic",
    }
}

/// `"<PREFIX> <eventType>"`, or just the prefix without an event type
fn span_name(prefix: &str, event_type: Option<&str>) -> String {
    match event_type {
        Some(event_type) if !event_type.is_empty() => format!("{} {}", prefix, event_type),
        _ => prefix.to_string(),
    }
}

fn destination_attributes(destination: &Destination, operation: &'static str) -> Vec<KeyValue> {
    vec![
        KeyValue::new(MESSAGING_SYSTEM, messaging_system(destination)),
        KeyValue::new(MESSAGING_OPERATION, operation),
        KeyValue::new(MESSAGING_DESTINATION_NAME, destination.short_name.clone()),
    ]
}

/// End a span, marking it failed unless the bracketed call completed
fn finish_span(span: SpanRef<'_>, outcome: &Outcome) {
    match outcome {
        Outcome::Completed => {}
        Outcome::Failed(message) => span.set_status(Status::error(message.clone())),
        Outcome::Abandoned => span.set_status(Status::error("abandoned before completion")),
    }
    span.end();
}
