//! Tests for configuration loading and validation.

use super::*;
use queue_runtime::{AwsSettings, InMemorySettings};
use serial_test::serial;
use std::io::Write;

const SAMPLE: &str = r#"
provider:
  type: in_memory
  visibility_timeout_seconds: 5
queues:
  - id: orders
    name: orders-q
    dead_letter_queue:
      name: orders-dlq
  - id: audit
    name: audit-q
topics:
  - id: order-events
    name: order-events
tracing:
  enabled: false
audit_queue: audit
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn queue(id: &str, name: &str) -> QueueDefinition {
    QueueDefinition {
        id: id.to_string(),
        name: name.to_string(),
        ..QueueDefinition::default()
    }
}

fn validation_errors(config: &StewardConfig) -> Vec<String> {
    match config.validate() {
        Err(ConfigError::Validation { errors }) => errors,
        other => panic!("expected validation errors, got {other:?}"),
    }
}

// ============================================================================
// Loading Tests
// ============================================================================

mod loading_tests {
    use super::*;

    /// Verify an unconfigured environment yields a valid default configuration
    #[test]
    #[serial]
    fn test_load_defaults() {
        let config = StewardConfig::load(None).unwrap();

        assert_eq!(config, StewardConfig::default());
        assert!(matches!(config.provider, ProviderSettings::InMemory(_)));
        assert!(config.tracing.enabled);
        assert_eq!(config.logging.level, "info");
    }

    /// Verify an explicit YAML file is read in full
    #[test]
    #[serial]
    fn test_load_explicit_file() {
        let file = write_config(SAMPLE);

        let config = StewardConfig::load(Some(file.path())).unwrap();

        assert_eq!(
            config.provider,
            ProviderSettings::InMemory(InMemorySettings {
                visibility_timeout_seconds: 5
            })
        );
        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.queues[0].id, "orders");
        assert_eq!(
            config.queues[0].dead_letter_queue,
            Some(DeadLetterDefinition {
                name: "orders-dlq".to_string(),
                url: None
            })
        );
        assert!(config.queues[1].dead_letter_queue.is_none());
        assert_eq!(config.topics[0].name.as_deref(), Some("order-events"));
        assert!(!config.tracing.enabled);
        assert_eq!(config.tracing.service_name, "queue-steward");
        assert_eq!(config.audit_queue.as_deref(), Some("audit"));
    }

    /// Verify the AWS provider settings deserialize from YAML
    #[test]
    #[serial]
    fn test_load_aws_provider() {
        let file = write_config(
            r#"
provider:
  type: aws
  region: eu-west-1
  endpoint: http://localhost:4566
queues:
  - id: orders
    name: orders-q
    region: us-east-1
"#,
        );

        let config = StewardConfig::load(Some(file.path())).unwrap();

        match &config.provider {
            ProviderSettings::Aws(aws) => {
                assert_eq!(aws.region, "eu-west-1");
                assert_eq!(aws.endpoint.as_deref(), Some("http://localhost:4566"));
            }
            other => panic!("expected aws provider, got {other:?}"),
        }
        assert_eq!(config.queues[0].region.as_deref(), Some("us-east-1"));
    }

    /// Verify a missing explicit file is an error
    #[test]
    #[serial]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let result = StewardConfig::load(Some(&path));

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    /// Verify malformed YAML is an error
    #[test]
    #[serial]
    fn test_malformed_file() {
        let file = write_config("queues: [ {id: orders, name: ");

        let result = StewardConfig::load(Some(file.path()));

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    /// Verify loading rejects configurations that fail validation
    #[test]
    #[serial]
    fn test_load_validates() {
        let file = write_config(
            r#"
queues:
  - id: Orders
    name: orders-q
"#,
        );

        let result = StewardConfig::load(Some(file.path()));

        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    /// Verify environment variables override file values
    #[test]
    #[serial]
    fn test_environment_overrides() {
        let file = write_config(SAMPLE);
        std::env::set_var("QS__LOGGING__LEVEL", "debug");
        std::env::set_var("QS__AUDIT_QUEUE", "orders");

        let result = StewardConfig::load(Some(file.path()));

        std::env::remove_var("QS__LOGGING__LEVEL");
        std::env::remove_var("QS__AUDIT_QUEUE");

        let config = result.unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.audit_queue.as_deref(), Some("orders"));
        assert_eq!(config.queues.len(), 2);
    }
}

// ============================================================================
// Validation Tests
// ============================================================================

mod validation_tests {
    use super::*;

    /// Verify a well-formed configuration passes
    #[test]
    fn test_valid_configuration() {
        let config = StewardConfig {
            queues: vec![queue("orders", "orders-q"), queue("audit", "audit-q")],
            topics: vec![TopicDefinition {
                id: "order-events".to_string(),
                name: Some("order-events".to_string()),
                ..TopicDefinition::default()
            }],
            audit_queue: Some("audit".to_string()),
            ..StewardConfig::default()
        };

        assert!(config.validate().is_ok());
    }

    /// Verify invalid and duplicate ids are reported
    #[test]
    fn test_id_problems() {
        let config = StewardConfig {
            queues: vec![
                queue("orders", "orders-q"),
                queue("orders", "orders-2-q"),
                queue("Bad Id", "bad-q"),
            ],
            ..StewardConfig::default()
        };

        let errors = validation_errors(&config);

        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("duplicate queue id 'orders'")));
        assert!(errors.iter().any(|e| e.starts_with("queue id:")));
    }

    /// Verify queue and topic ids live in separate namespaces
    #[test]
    fn test_queue_and_topic_may_share_id() {
        let config = StewardConfig {
            queues: vec![queue("orders", "orders-q")],
            topics: vec![TopicDefinition {
                id: "orders".to_string(),
                name: Some("orders".to_string()),
                ..TopicDefinition::default()
            }],
            ..StewardConfig::default()
        };

        assert!(config.validate().is_ok());
    }

    /// Verify empty names, bad URLs, and dangling references are all reported together
    #[test]
    fn test_collects_every_problem() {
        let mut with_dlq = queue("orders", "orders-q");
        with_dlq.dead_letter_queue = Some(DeadLetterDefinition {
            name: " ".to_string(),
            url: Some("not a url".to_string()),
        });
        let config = StewardConfig {
            queues: vec![with_dlq, queue("audit", "")],
            topics: vec![TopicDefinition {
                id: "events".to_string(),
                ..TopicDefinition::default()
            }],
            audit_queue: Some("missing".to_string()),
            ..StewardConfig::default()
        };

        let errors = validation_errors(&config);

        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("dead letter queue with an empty name")));
        assert!(errors.iter().any(|e| e.contains("invalid dead letter url")));
        assert!(errors.iter().any(|e| e.contains("queue 'audit' has an empty name")));
        assert!(errors.iter().any(|e| e.contains("needs an arn or a name")));
        assert!(errors.iter().any(|e| e.contains("audit_queue 'missing'")));
    }

    /// Verify AWS deployments need a region and topic ARNs
    #[test]
    fn test_aws_requirements() {
        let config = StewardConfig {
            provider: ProviderSettings::Aws(AwsSettings::default()),
            queues: vec![queue("orders", "orders-q")],
            topics: vec![TopicDefinition {
                id: "events".to_string(),
                name: Some("events".to_string()),
                ..TopicDefinition::default()
            }],
            ..StewardConfig::default()
        };

        let errors = validation_errors(&config);

        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("provider.region")));
        assert!(errors.iter().any(|e| e.contains("requires an arn")));
    }
}

// ============================================================================
// Provider Settings Tests
// ============================================================================

mod provider_settings_tests {
    use super::*;

    /// Verify per-queue region and endpoint overrides apply to AWS settings
    #[test]
    fn test_queue_overrides() {
        let base = ProviderSettings::Aws(AwsSettings::for_region("eu-west-1"));
        let mut definition = queue("orders", "orders-q");
        definition.region = Some("us-east-1".to_string());
        definition.endpoint = Some("http://localhost:4566".to_string());

        let settings = definition.provider_settings(&base);

        assert_eq!(
            settings,
            ProviderSettings::Aws(
                AwsSettings::for_region("us-east-1").with_endpoint("http://localhost:4566")
            )
        );
        assert_eq!(queue("audit", "audit-q").provider_settings(&base), base);
    }

    /// Verify overrides are ignored for the in-memory transport
    #[test]
    fn test_in_memory_ignores_overrides() {
        let base = ProviderSettings::default();
        let mut definition = queue("orders", "orders-q");
        definition.region = Some("us-east-1".to_string());

        assert_eq!(definition.provider_settings(&base), base);
    }
}
