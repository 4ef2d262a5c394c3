//! Registry construction from configuration.
//!
//! Every queue and dead letter queue URL is resolved while the registry is
//! built, so a missing queue or an unreachable transport stops startup
//! instead of surfacing on the first redrive.

use crate::config::{ConfigError, QueueDefinition, StewardConfig, TopicDefinition};
use crate::propagation::{MessageTracing, TracePublishInterceptor, TraceReceiveInterceptor};
use crate::registry::{BindingId, QueueBinding, Registry, RegistryError, TopicBinding};
use queue_runtime::{
    ClientFactory, InMemoryBroker, ProviderSettings, PublishChain, PublishInterceptor,
    QueueClient, QueueError, QueueUrl, ReceiveChain, ReceiveInterceptor, TopicArn,
    ValidationError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;

/// Startup failures while building the registry
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to create transport client for '{id}': {source}")]
    Client {
        id: String,
        #[source]
        source: QueueError,
    },

    #[error("Failed to resolve queue '{name}' for '{id}': {source}")]
    Resolve {
        id: String,
        name: String,
        #[source]
        source: QueueError,
    },

    #[error("Invalid address configured for '{id}': {source}")]
    InvalidAddress {
        id: String,
        #[source]
        source: ValidationError,
    },
}

/// Publish chain carrying the trace-context interceptor when tracing is on
pub fn publish_chain(tracing: Option<&MessageTracing>) -> PublishChain {
    match tracing {
        Some(tracing) => {
            let interceptor: Arc<dyn PublishInterceptor> =
                Arc::new(TracePublishInterceptor::new(tracing.clone()));
            PublishChain::new().with(interceptor)
        }
        None => PublishChain::new(),
    }
}

/// Receive chain for consumers of registered queues
pub fn receive_chain(tracing: Option<&MessageTracing>) -> ReceiveChain {
    match tracing {
        Some(tracing) => {
            let interceptor: Arc<dyn ReceiveInterceptor> =
                Arc::new(TraceReceiveInterceptor::new(tracing.clone()));
            ReceiveChain::new().with(interceptor)
        }
        None => ReceiveChain::new(),
    }
}

/// Factories keyed by region and endpoint.
///
/// In-memory settings all map onto one factory sharing the broker.
struct Factories {
    broker: InMemoryBroker,
    by_transport: HashMap<(Option<String>, Option<String>), ClientFactory>,
}

impl Factories {
    fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            by_transport: HashMap::new(),
        }
    }

    fn get(&mut self, settings: &ProviderSettings) -> &ClientFactory {
        let broker = &self.broker;
        self.by_transport
            .entry(transport_key(settings))
            .or_insert_with(|| match settings {
                ProviderSettings::InMemory(_) => ClientFactory::with_broker(broker.clone()),
                ProviderSettings::Aws(aws) => {
                    debug!(region = %aws.region, endpoint = ?aws.endpoint, "Creating AWS client factory");
                    ClientFactory::new(settings.clone())
                }
            })
    }

    fn len(&self) -> usize {
        self.by_transport.len()
    }
}

fn transport_key(settings: &ProviderSettings) -> (Option<String>, Option<String>) {
    match settings {
        ProviderSettings::InMemory(_) => (None, None),
        ProviderSettings::Aws(aws) => (Some(aws.region.clone()), aws.endpoint.clone()),
    }
}

/// Build the registry described by `config`.
///
/// Clients are wrapped with the trace-context interceptors when `tracing` is
/// given. In-memory deployments get a fresh broker.
pub async fn build_registry(
    config: &StewardConfig,
    tracing: Option<&MessageTracing>,
) -> Result<Registry, BootstrapError> {
    let broker = match &config.provider {
        ProviderSettings::InMemory(settings) => InMemoryBroker::new(settings.clone()),
        ProviderSettings::Aws(_) => InMemoryBroker::default(),
    };
    build_registry_with_broker(config, tracing, broker).await
}

/// Build the registry, backing in-memory queues and topics with `broker`
pub async fn build_registry_with_broker(
    config: &StewardConfig,
    tracing: Option<&MessageTracing>,
    broker: InMemoryBroker,
) -> Result<Registry, BootstrapError> {
    config.validate()?;

    let interceptors = publish_chain(tracing);
    let mut factories = Factories::new(broker);
    let mut builder = Registry::builder();

    for definition in &config.queues {
        let binding = queue_binding(definition, config, &mut factories, &interceptors).await?;
        info!(
            queue_id = %binding.id,
            queue_url = %binding.queue_url,
            dead_letter = binding.dead_letter.as_ref().map(|d| d.url.as_str()),
            "Registered queue"
        );
        builder.register_queue(binding)?;
    }

    for definition in &config.topics {
        let binding = topic_binding(definition, config, &mut factories, &interceptors)?;
        info!(topic_id = %binding.id, topic_arn = %binding.arn, "Registered topic");
        builder.register_topic(binding)?;
    }

    info!(
        queues = builder.queue_count(),
        topics = builder.topic_count(),
        transports = factories.len(),
        tracing = tracing.is_some(),
        "Registry built"
    );
    Ok(builder.build())
}

async fn queue_binding(
    definition: &QueueDefinition,
    config: &StewardConfig,
    factories: &mut Factories,
    interceptors: &PublishChain,
) -> Result<QueueBinding, BootstrapError> {
    let id = BindingId::new(definition.id.as_str())?;
    let settings = definition.provider_settings(&config.provider);
    let client = factories
        .get(&settings)
        .queue_client(interceptors.clone())
        .map_err(|source| BootstrapError::Client {
            id: definition.id.clone(),
            source,
        })?;

    let queue_url = resolve_url(
        &definition.id,
        &definition.name,
        definition.url.as_deref(),
        client.as_ref(),
    )
    .await?;
    let mut binding = QueueBinding::new(id, client.clone(), queue_url);

    if let Some(dlq) = &definition.dead_letter_queue {
        let dlq_url =
            resolve_url(&definition.id, &dlq.name, dlq.url.as_deref(), client.as_ref()).await?;
        binding = binding.with_dead_letter(client, dlq_url, dlq.name.clone());
    }

    Ok(binding)
}

async fn resolve_url(
    id: &str,
    name: &str,
    configured: Option<&str>,
    client: &dyn QueueClient,
) -> Result<QueueUrl, BootstrapError> {
    match configured {
        Some(url) => QueueUrl::new(url).map_err(|source| BootstrapError::InvalidAddress {
            id: id.to_string(),
            source,
        }),
        None => client
            .resolve_queue_url(name)
            .await
            .map_err(|source| BootstrapError::Resolve {
                id: id.to_string(),
                name: name.to_string(),
                source,
            }),
    }
}

fn topic_binding(
    definition: &TopicDefinition,
    config: &StewardConfig,
    factories: &mut Factories,
    interceptors: &PublishChain,
) -> Result<TopicBinding, BootstrapError> {
    let id = BindingId::new(definition.id.as_str())?;
    let factory = factories.get(&definition.provider_settings(&config.provider));
    let client_error = |source| BootstrapError::Client {
        id: definition.id.clone(),
        source,
    };

    let arn = match (&definition.arn, &definition.name) {
        (Some(arn), _) => {
            TopicArn::new(arn.clone()).map_err(|source| BootstrapError::InvalidAddress {
                id: definition.id.clone(),
                source,
            })?
        }
        (None, Some(name)) => factory.resolve_topic_arn(name).map_err(client_error)?,
        (None, None) => {
            return Err(BootstrapError::Config(ConfigError::Validation {
                errors: vec![format!("topic '{}' needs an arn or a name", definition.id)],
            }))
        }
    };

    let client = factory
        .topic_client(interceptors.clone())
        .map_err(client_error)?;
    Ok(TopicBinding::new(id, client, arn))
}
