//! Consumer-side interceptor: context extracted per delivered message.

use super::{
    destination_attributes, finish_span, span_name, AttributeExtractor, MessageTracing,
    TracingBestEffortError, MESSAGING_MESSAGE_ID,
};
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use queue_runtime::{
    Destination, InterceptScope, MessageAttribute, NotificationEnvelope, ReceiveInterceptor,
    ReceivedMessage, EVENT_TYPE_ATTRIBUTE,
};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::debug;

/// Starts a `RECEIVE` span for each delivered message, parented on the
/// context the producer injected.
///
/// Messages without propagation data get a root span. Topic deliveries wrapped
/// in a notification envelope are read through the envelope's attributes.
#[derive(Debug, Clone)]
pub struct TraceReceiveInterceptor {
    tracing: MessageTracing,
}

impl TraceReceiveInterceptor {
    pub fn new(tracing: MessageTracing) -> Self {
        Self { tracing }
    }

    /// Attributes carrying event type and propagation data for a message
    fn carrier<'a>(
        &self,
        message: &'a ReceivedMessage,
    ) -> Cow<'a, HashMap<String, MessageAttribute>> {
        let fields = self.tracing.fields();
        if fields.iter().any(|f| message.attributes.contains_key(f)) {
            return Cow::Borrowed(&message.attributes);
        }

        match Self::envelope_attributes(message) {
            Ok(Some(envelope_attributes)) => {
                let mut merged = envelope_attributes;
                for (key, value) in &message.attributes {
                    merged.insert(key.clone(), value.clone());
                }
                Cow::Owned(merged)
            }
            Ok(None) => Cow::Borrowed(&message.attributes),
            Err(e) => {
                debug!(message_id = %message.message_id, error = %e, "Ignoring trace data");
                Cow::Borrowed(&message.attributes)
            }
        }
    }

    fn envelope_attributes(
        message: &ReceivedMessage,
    ) -> Result<Option<HashMap<String, MessageAttribute>>, TracingBestEffortError> {
        if !message.body.starts_with(b"{") {
            return Ok(None);
        }

        let envelope = NotificationEnvelope::parse(&message.body)
            .map_err(|e| TracingBestEffortError::UnparseablePayload(e.to_string()))?;
        let attributes = envelope
            .attributes()
            .map_err(|e| TracingBestEffortError::EnvelopeAttributes(e.to_string()))?;
        Ok(Some(attributes))
    }
}

impl ReceiveInterceptor for TraceReceiveInterceptor {
    fn before_handle(
        &self,
        _parent: Context,
        source: &Destination,
        message: &ReceivedMessage,
    ) -> InterceptScope {
        let carrier = self.carrier(message);
        let event_type = carrier
            .get(EVENT_TYPE_ATTRIBUTE)
            .and_then(|a| match a {
                MessageAttribute::String(value) => Some(value.as_str()),
                _ => None,
            });
        let name = span_name("RECEIVE", event_type);

        // Without propagation data this stays an empty context and the span is a root
        let remote = self
            .tracing
            .propagator()
            .extract_with_context(&Context::new(), &AttributeExtractor(&carrier));

        let mut attributes = destination_attributes(source, "receive");
        attributes.push(KeyValue::new(
            MESSAGING_MESSAGE_ID,
            message.message_id.to_string(),
        ));

        let tracer = self.tracing.tracer();
        let span = tracer
            .span_builder(name)
            .with_kind(SpanKind::Consumer)
            .with_attributes(attributes)
            .start_with_context(tracer, &remote);
        let context = remote.with_span(span);

        let span_context = context.clone();
        InterceptScope::new(context, move |outcome| {
            finish_span(span_context.span(), outcome);
        })
    }
}
