//! Interceptor pipeline wrapped around outbound publishes and inbound deliveries.
//!
//! Interceptors are plain values held in an ordered [`InterceptorChain`]. Each
//! "before" hook returns an [`InterceptScope`] that owns the matching "after"
//! hook; the scope runs that hook exactly once, either when it is closed with
//! the call outcome or, failing that, when it is dropped.

use crate::message::{Message, QueueUrl, ReceivedMessage, TopicArn};
use crate::provider::ProviderType;
use opentelemetry::Context;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

#[cfg(test)]
#[path = "intercept_tests.rs"]
mod tests;

/// Name used when a destination's address carries no usable short name.
pub const UNKNOWN_DESTINATION: &str = "unknown";

// ============================================================================
// Destinations and Outcomes
// ============================================================================

/// Kind of endpoint a message is published to or received from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    Queue,
    Topic,
}

/// Where a publish goes, or where a delivered message came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub kind: DestinationKind,
    pub address: String,
    pub short_name: String,
    pub provider_type: ProviderType,
}

impl Destination {
    /// Describe a queue endpoint
    pub fn queue(url: &QueueUrl, provider_type: ProviderType) -> Self {
        Self {
            kind: DestinationKind::Queue,
            address: url.to_string(),
            short_name: url.short_name().unwrap_or(UNKNOWN_DESTINATION).to_string(),
            provider_type,
        }
    }

    /// Describe a topic endpoint
    pub fn topic(arn: &TopicArn, provider_type: ProviderType) -> Self {
        let short_name = match arn.short_name() {
            "" => UNKNOWN_DESTINATION,
            name => name,
        };

        Self {
            kind: DestinationKind::Topic,
            address: arn.to_string(),
            short_name: short_name.to_string(),
            provider_type,
        }
    }
}

/// Result of the call an interceptor scope brackets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    /// The scope was dropped without being closed (panic or cancellation)
    Abandoned,
}

impl Outcome {
    /// Map a call result onto an outcome
    pub fn from_result<T, E: std::fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

// ============================================================================
// Scopes
// ============================================================================

type ExitHook = Box<dyn FnOnce(&Outcome) + Send>;

/// Scoped resource pairing a "before" hook with its "after" hook.
///
/// [`InterceptScope::close`] passes the real outcome; dropping an unclosed scope
/// reports [`Outcome::Abandoned`]. Either way the exit hook runs once.
pub struct InterceptScope {
    context: Context,
    on_exit: Option<ExitHook>,
}

impl InterceptScope {
    /// Scope with no exit hook that hands `context` through unchanged
    pub fn pass_through(context: Context) -> Self {
        Self {
            context,
            on_exit: None,
        }
    }

    /// Scope that makes `context` active and runs `on_exit` when finished
    pub fn new(context: Context, on_exit: impl FnOnce(&Outcome) + Send + 'static) -> Self {
        Self {
            context,
            on_exit: Some(Box::new(on_exit)),
        }
    }

    /// Context to make active while the bracketed call runs
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Finish the scope with the outcome of the bracketed call
    pub fn close(mut self, outcome: Outcome) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit(&outcome);
        }
    }

    /// Combine scopes so that closing the result closes each inner scope in
    /// reverse order of creation.
    fn nested(context: Context, scopes: Vec<InterceptScope>) -> Self {
        if scopes.is_empty() {
            return Self::pass_through(context);
        }

        Self::new(context, move |outcome| {
            for scope in scopes.into_iter().rev() {
                scope.close(outcome.clone());
            }
        })
    }
}

impl Drop for InterceptScope {
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit(&Outcome::Abandoned);
        }
    }
}

impl std::fmt::Debug for InterceptScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptScope")
            .field("open", &self.on_exit.is_some())
            .finish()
    }
}

// ============================================================================
// Interceptor Traits
// ============================================================================

/// Hook run around every outbound send/publish call
pub trait PublishInterceptor: Send + Sync {
    /// Called before the transport call. May rewrite each message in the batch.
    fn before_publish(
        &self,
        parent: Context,
        destination: &Destination,
        batch: &mut [Message],
    ) -> InterceptScope;
}

/// Hook run around the handling of every delivered message
pub trait ReceiveInterceptor: Send + Sync {
    /// Called before the handler runs; the scope's context is active while it does.
    fn before_handle(
        &self,
        parent: Context,
        source: &Destination,
        message: &ReceivedMessage,
    ) -> InterceptScope;
}

/// Ordered list of interceptors. Before-hooks run front to back, each seeing the
/// previous hook's context; exit hooks run back to front.
pub struct InterceptorChain<I: ?Sized> {
    interceptors: Vec<Arc<I>>,
}

pub type PublishChain = InterceptorChain<dyn PublishInterceptor>;
pub type ReceiveChain = InterceptorChain<dyn ReceiveInterceptor>;

impl<I: ?Sized> InterceptorChain<I> {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Append an interceptor to the end of the chain
    pub fn with(mut self, interceptor: Arc<I>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn push(&mut self, interceptor: Arc<I>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl<I: ?Sized> Default for InterceptorChain<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ?Sized> Clone for InterceptorChain<I> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
        }
    }
}

impl InterceptorChain<dyn PublishInterceptor> {
    /// Run every publish hook and return one scope covering them all
    pub fn before_publish(
        &self,
        parent: Context,
        destination: &Destination,
        batch: &mut [Message],
    ) -> InterceptScope {
        let mut context = parent;
        let mut scopes = Vec::with_capacity(self.interceptors.len());
        for interceptor in &self.interceptors {
            let scope = interceptor.before_publish(context.clone(), destination, batch);
            context = scope.context().clone();
            scopes.push(scope);
        }

        InterceptScope::nested(context, scopes)
    }
}

impl InterceptorChain<dyn ReceiveInterceptor> {
    /// Run every receive hook and return one scope covering them all
    pub fn before_handle(
        &self,
        parent: Context,
        source: &Destination,
        message: &ReceivedMessage,
    ) -> InterceptScope {
        let mut context = parent;
        let mut scopes = Vec::with_capacity(self.interceptors.len());
        for interceptor in &self.interceptors {
            let scope = interceptor.before_handle(context.clone(), source, message);
            context = scope.context().clone();
            scopes.push(scope);
        }

        InterceptScope::nested(context, scopes)
    }
}

// ============================================================================
// Context Attachment
// ============================================================================

/// Future that makes an OpenTelemetry context active on every poll of `inner`
pub struct WithContext<F> {
    inner: Pin<Box<F>>,
    context: Context,
}

/// Run `future` with `context` as the active context
pub fn with_context<F: Future>(future: F, context: Context) -> WithContext<F> {
    WithContext {
        inner: Box::pin(future),
        context,
    }
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = this.context.clone().attach();
        this.inner.as_mut().poll(cx)
    }
}
