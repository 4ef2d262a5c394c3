//! Configuration for queue-steward.
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!
//! 1. `/etc/queue-steward/steward.yaml`, system-wide defaults
//! 2. `./config/steward.yaml`, deployment-local override
//! 3. an explicit path given by the operator (required when given)
//! 4. environment variables prefixed `QS__`, e.g. `QS__AUDIT_QUEUE=audit`
//!
//! Every field carries a serde default, so an unconfigured environment yields
//! an empty in-memory deployment.

use crate::registry::BindingId;
use queue_runtime::{ProviderSettings, QueueUrl, TopicArn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "QS";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StewardConfig {
    /// Transport used for every queue and topic
    pub provider: ProviderSettings,
    pub queues: Vec<QueueDefinition>,
    pub topics: Vec<TopicDefinition>,
    pub tracing: TracingSettings,
    pub logging: LoggingConfig,
    /// Id of the queue domain events are published to
    pub audit_queue: Option<String>,
}

/// A logical queue and its optional dead letter queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDefinition {
    pub id: String,
    pub name: String,
    /// Known URL; resolved from `name` when absent
    pub url: Option<String>,
    pub dead_letter_queue: Option<DeadLetterDefinition>,
    /// Region override for AWS deployments spanning regions
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterDefinition {
    pub name: String,
    pub url: Option<String>,
}

/// A logical topic, addressed by ARN or (in-memory only) by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicDefinition {
    pub id: String,
    pub arn: Option<String>,
    pub name: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingSettings {
    /// Wrap clients with the trace-context propagation interceptors
    pub enabled: bool,
    pub service_name: String,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "queue-steward".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation failed: {errors:?}")]
    Validation { errors: Vec<String> },
}

impl StewardConfig {
    /// Load and validate configuration from the standard sources.
    ///
    /// # Errors
    ///
    /// A malformed file, a missing explicit file, an environment value that
    /// cannot be coerced, or a failed [`validate`](Self::validate).
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/queue-steward/steward")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/steward")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let config: StewardConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check identifiers, names, and transport settings.
    ///
    /// Every problem is collected and reported together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let aws = matches!(self.provider, ProviderSettings::Aws(_));

        if let ProviderSettings::Aws(settings) = &self.provider {
            if settings.region.trim().is_empty() {
                errors.push("provider.region is required for the aws provider".to_string());
            }
        }

        let mut queue_ids = HashSet::new();
        for queue in &self.queues {
            check_id("queue", &queue.id, &mut queue_ids, &mut errors);

            if queue.name.trim().is_empty() {
                errors.push(format!("queue '{}' has an empty name", queue.id));
            }
            if let Some(url) = &queue.url {
                if let Err(e) = QueueUrl::new(url) {
                    errors.push(format!("queue '{}' has an invalid url: {}", queue.id, e));
                }
            }

            if let Some(dlq) = &queue.dead_letter_queue {
                if dlq.name.trim().is_empty() {
                    errors.push(format!(
                        "queue '{}' has a dead letter queue with an empty name",
                        queue.id
                    ));
                }
                if let Some(url) = &dlq.url {
                    if let Err(e) = QueueUrl::new(url) {
                        errors.push(format!(
                            "queue '{}' has an invalid dead letter url: {}",
                            queue.id, e
                        ));
                    }
                }
            }
        }

        let mut topic_ids = HashSet::new();
        for topic in &self.topics {
            check_id("topic", &topic.id, &mut topic_ids, &mut errors);

            match (&topic.arn, &topic.name) {
                (Some(arn), _) => {
                    if let Err(e) = TopicArn::new(arn.clone()) {
                        errors.push(format!("topic '{}' has an invalid arn: {}", topic.id, e));
                    }
                }
                (None, Some(_)) if aws => {
                    errors.push(format!("topic '{}' requires an arn on aws", topic.id));
                }
                (None, Some(name)) if name.trim().is_empty() => {
                    errors.push(format!("topic '{}' has an empty name", topic.id));
                }
                (None, Some(_)) => {}
                (None, None) => {
                    errors.push(format!("topic '{}' needs an arn or a name", topic.id));
                }
            }
        }

        if let Some(audit) = &self.audit_queue {
            if !queue_ids.contains(audit.as_str()) {
                errors.push(format!("audit_queue '{}' is not a configured queue", audit));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation { errors })
        }
    }
}

fn check_id<'a>(
    kind: &str,
    id: &'a str,
    seen: &mut HashSet<&'a str>,
    errors: &mut Vec<String>,
) {
    if let Err(e) = BindingId::new(id) {
        errors.push(format!("{} id: {}", kind, e));
    }
    if !seen.insert(id) {
        errors.push(format!("duplicate {} id '{}'", kind, id));
    }
}

impl QueueDefinition {
    /// Transport settings for this queue, applying its region and endpoint overrides
    pub fn provider_settings(&self, base: &ProviderSettings) -> ProviderSettings {
        match base {
            ProviderSettings::InMemory(_) => base.clone(),
            ProviderSettings::Aws(aws) => {
                let mut aws = aws.clone();
                if let Some(region) = &self.region {
                    aws.region = region.clone();
                }
                if let Some(endpoint) = &self.endpoint {
                    aws.endpoint = Some(endpoint.clone());
                }
                ProviderSettings::Aws(aws)
            }
        }
    }
}

impl TopicDefinition {
    /// Transport settings for this topic, applying its region override
    pub fn provider_settings(&self, base: &ProviderSettings) -> ProviderSettings {
        match (base, &self.region) {
            (ProviderSettings::Aws(aws), Some(region)) => {
                let mut aws = aws.clone();
                aws.region = region.clone();
                ProviderSettings::Aws(aws)
            }
            _ => base.clone(),
        }
    }
}
