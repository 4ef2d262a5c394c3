//! Message attributes as an OpenTelemetry text-map carrier.

use opentelemetry::propagation::{Extractor, Injector};
use queue_runtime::MessageAttribute;
use std::collections::HashMap;

/// Writes propagation fields into a message's attributes as `String` values
pub struct AttributeInjector<'a>(pub &'a mut HashMap<String, MessageAttribute>);

impl Injector for AttributeInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0
            .insert(key.to_string(), MessageAttribute::String(value));
    }
}

/// Reads propagation fields from message attributes.
///
/// Binary attributes are never a source of propagation data.
pub struct AttributeExtractor<'a>(pub &'a HashMap<String, MessageAttribute>);

impl Extractor for AttributeExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(MessageAttribute::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}
