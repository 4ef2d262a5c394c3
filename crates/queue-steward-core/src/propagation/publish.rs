//! Producer-side interceptor: span per publish call, context injected per message.

use super::{destination_attributes, finish_span, span_name, MessageTracing};
use super::{AttributeInjector, MESSAGING_BATCH_MESSAGE_COUNT};
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use queue_runtime::{Destination, InterceptScope, Message, PublishInterceptor};

/// Starts a `PUBLISH` span around each send and injects its context.
///
/// A batch gets one span. Every message in it is annotated separately, except
/// messages that opted out with `noTracing = "true"`. Propagation fields a
/// forwarded or redriven message already carries are replaced, so consumers
/// link to the span that actually sent it.
#[derive(Debug, Clone)]
pub struct TracePublishInterceptor {
    tracing: MessageTracing,
}

impl TracePublishInterceptor {
    pub fn new(tracing: MessageTracing) -> Self {
        Self { tracing }
    }

    /// Event type shared by every message in the batch
    fn batch_event_type(batch: &[Message]) -> Option<&str> {
        let first = batch.first()?.event_type()?;
        batch
            .iter()
            .all(|m| m.event_type() == Some(first))
            .then_some(first)
    }

    fn inject(&self, context: &Context, message: &mut Message) {
        if message.tracing_disabled() {
            return;
        }

        self.tracing
            .propagator()
            .inject_context(context, &mut AttributeInjector(&mut message.attributes));
    }
}

impl PublishInterceptor for TracePublishInterceptor {
    fn before_publish(
        &self,
        parent: Context,
        destination: &Destination,
        batch: &mut [Message],
    ) -> InterceptScope {
        let name = span_name("PUBLISH", Self::batch_event_type(batch));
        let mut attributes = destination_attributes(destination, "send");
        if batch.len() > 1 {
            attributes.push(KeyValue::new(
                MESSAGING_BATCH_MESSAGE_COUNT,
                batch.len() as i64,
            ));
        }

        let tracer = self.tracing.tracer();
        let span = tracer
            .span_builder(name)
            .with_kind(SpanKind::Producer)
            .with_attributes(attributes)
            .start_with_context(tracer, &parent);
        let context = parent.with_span(span);

        for message in batch.iter_mut() {
            self.inject(&context, message);
        }

        let span_context = context.clone();
        InterceptScope::new(context, move |outcome| {
            finish_span(span_context.span(), outcome);
        })
    }
}
