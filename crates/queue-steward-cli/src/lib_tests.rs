//! Tests for the queue-steward-cli library module.

use super::*;
use bytes::Bytes;
use queue_runtime::{InMemoryBroker, Message, QueueUrl};
use queue_steward_core::{
    build_registry_with_broker, DeadLetterDefinition, QueueDefinition, TopicDefinition,
};

fn orders_config() -> StewardConfig {
    StewardConfig {
        queues: vec![
            QueueDefinition {
                id: "orders".to_string(),
                name: "orders-q".to_string(),
                dead_letter_queue: Some(DeadLetterDefinition {
                    name: "orders-dlq".to_string(),
                    url: None,
                }),
                ..QueueDefinition::default()
            },
            QueueDefinition {
                id: "audit".to_string(),
                name: "audit-q".to_string(),
                ..QueueDefinition::default()
            },
        ],
        topics: vec![TopicDefinition {
            id: "order-events".to_string(),
            name: Some("order-events".to_string()),
            ..TopicDefinition::default()
        }],
        audit_queue: Some("audit".to_string()),
        ..StewardConfig::default()
    }
}

async fn registry_with_dlq_messages(broker: &InMemoryBroker, count: usize) -> Arc<Registry> {
    let registry = build_registry_with_broker(&orders_config(), None, broker.clone())
        .await
        .unwrap();
    let dlq = QueueUrl::in_memory("orders-dlq").unwrap();
    for i in 0..count {
        broker
            .send(&dlq, &Message::new(Bytes::from(format!("order {i}"))))
            .unwrap();
    }
    Arc::new(registry)
}

// ============================================================================
// Parsing Tests
// ============================================================================

mod parsing_tests {
    use super::*;

    /// Verify the retry command parses its queue and limit
    #[test]
    fn test_parse_retry() {
        let cli = Cli::try_parse_from(["queue-steward", "retry", "orders", "--max", "5"]).unwrap();

        assert_eq!(
            cli.command,
            Commands::Retry {
                queue: "orders".to_string(),
                max: Some(5),
                wait: 1,
            }
        );
        assert_eq!(cli.format, OutputFormat::Text);
    }

    /// Verify global options come before the subcommand
    #[test]
    fn test_parse_global_options() {
        let cli = Cli::try_parse_from([
            "queue-steward",
            "--config",
            "/tmp/steward.yaml",
            "--format",
            "json",
            "--json-logs",
            "retry-all",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/steward.yaml")));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.json_logs);
        assert_eq!(cli.command, Commands::RetryAll { max: None, wait: 1 });
    }

    /// Verify list parses with and without depths
    #[test]
    fn test_parse_list() {
        let cli = Cli::try_parse_from(["queue-steward", "list", "--depths"]).unwrap();
        assert_eq!(cli.command, Commands::List { depths: true });

        let cli = Cli::try_parse_from(["queue-steward", "list"]).unwrap();
        assert_eq!(cli.command, Commands::List { depths: false });
    }

    /// Verify retry requires a queue identifier
    #[test]
    fn test_retry_requires_queue() {
        assert!(Cli::try_parse_from(["queue-steward", "retry"]).is_err());
    }
}

// ============================================================================
// Command Tests
// ============================================================================

mod command_tests {
    use super::*;

    /// Verify list shows queues, dead letter queues, depths, and topics
    #[tokio::test]
    async fn test_list_with_depths() {
        let broker = InMemoryBroker::default();
        let registry = registry_with_dlq_messages(&broker, 2).await;

        let output = execute_command(
            &Commands::List { depths: true },
            &orders_config(),
            registry,
            None,
            OutputFormat::Text,
        )
        .await
        .unwrap();

        assert_eq!(
            output.rendered,
            "Queues:\n  audit -> audit-q [0], no dlq\n  orders -> orders-q [0], dlq orders-dlq [2]\nTopics:\n  order-events -> arn:memory:sns:local:0:order-events"
        );
        assert_eq!(output.failures, 0);
    }

    /// Verify list without depths omits the bracketed counts
    #[tokio::test]
    async fn test_list_without_depths() {
        let broker = InMemoryBroker::default();
        let registry = registry_with_dlq_messages(&broker, 2).await;

        let output = execute_command(
            &Commands::List { depths: false },
            &orders_config(),
            registry,
            None,
            OutputFormat::Text,
        )
        .await
        .unwrap();

        assert_eq!(
            output.rendered,
            "Queues:\n  audit -> audit-q, no dlq\n  orders -> orders-q, dlq orders-dlq\nTopics:\n  order-events -> arn:memory:sns:local:0:order-events"
        );
    }

    /// Verify an empty registry lists placeholders for both sections
    #[tokio::test]
    async fn test_list_empty_registry() {
        let config = StewardConfig::default();
        let registry = build_registry_with_broker(&config, None, InMemoryBroker::default())
            .await
            .unwrap();

        let output = execute_command(
            &Commands::List { depths: true },
            &config,
            Arc::new(registry),
            None,
            OutputFormat::Text,
        )
        .await
        .unwrap();

        assert_eq!(output.rendered, "Queues:\n  (none)\nTopics:\n  (none)");
    }

    /// Verify list renders JSON summaries
    #[tokio::test]
    async fn test_list_json() {
        let broker = InMemoryBroker::default();
        let registry = registry_with_dlq_messages(&broker, 0).await;

        let output = execute_command(
            &Commands::List { depths: false },
            &orders_config(),
            registry,
            None,
            OutputFormat::Json,
        )
        .await
        .unwrap();

        let json: serde_json::Value = serde_json::from_str(&output.rendered).unwrap();
        assert_eq!(json["queues"].as_array().unwrap().len(), 2);
        assert_eq!(json["queues"][1]["id"], "orders");
        assert_eq!(json["queues"][1]["dead_letter_queue"], "orders-dlq");
        assert!(json["queues"][1].get("depth").is_none());
        assert_eq!(json["topics"][0]["id"], "order-events");
    }

    /// Verify retry moves messages back and publishes an audit event
    #[tokio::test]
    async fn test_retry_moves_and_audits() {
        let broker = InMemoryBroker::default();
        let registry = registry_with_dlq_messages(&broker, 3).await;
        let publisher = EventPublisher::new(&registry, "audit").unwrap();

        let output = execute_command(
            &Commands::Retry {
                queue: "orders".to_string(),
                max: None,
                wait: 0,
            },
            &orders_config(),
            registry,
            Some(&publisher),
            OutputFormat::Text,
        )
        .await
        .unwrap();

        assert_eq!(output.rendered, "orders: moved 3, 0 remaining in dlq, 0 failed");
        assert_eq!(
            broker
                .message_count(&QueueUrl::in_memory("orders-q").unwrap())
                .unwrap(),
            3
        );

        let audit = broker
            .receive(&QueueUrl::in_memory("audit-q").unwrap(), 10)
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].event_type(), Some("dlq.redrive.completed"));
        let event: serde_json::Value = serde_json::from_slice(&audit[0].body).unwrap();
        assert_eq!(event["queue_id"], "orders");
        assert_eq!(event["moved"], 3);
    }

    /// Verify a failed audit publish does not fail a completed retry
    #[tokio::test]
    async fn test_retry_survives_audit_failure() {
        let broker = InMemoryBroker::default();
        let mut config = orders_config();
        config.queues[1].url = Some("memory://never-created".to_string());
        let registry = build_registry_with_broker(&config, None, broker.clone())
            .await
            .unwrap();
        broker
            .send(
                &QueueUrl::in_memory("orders-dlq").unwrap(),
                &Message::new(Bytes::from_static(b"order 0")),
            )
            .unwrap();
        let registry = Arc::new(registry);
        let publisher = EventPublisher::new(&registry, "audit").unwrap();

        let output = execute_command(
            &Commands::Retry {
                queue: "orders".to_string(),
                max: None,
                wait: 0,
            },
            &config,
            registry,
            Some(&publisher),
            OutputFormat::Text,
        )
        .await
        .unwrap();

        assert_eq!(output.rendered, "orders: moved 1, 0 remaining in dlq, 0 failed");
        assert_eq!(output.failures, 0);
    }

    /// Verify retry honours the limit and reports JSON
    #[tokio::test]
    async fn test_retry_with_limit_json() {
        let broker = InMemoryBroker::default();
        let registry = registry_with_dlq_messages(&broker, 5).await;

        let output = execute_command(
            &Commands::Retry {
                queue: "orders".to_string(),
                max: Some(2),
                wait: 0,
            },
            &orders_config(),
            registry,
            None,
            OutputFormat::Json,
        )
        .await
        .unwrap();

        let json: serde_json::Value = serde_json::from_str(&output.rendered).unwrap();
        assert_eq!(json["moved_count"], 2);
        assert_eq!(json["remaining_count"], 3);
    }

    /// Verify retrying an unknown queue or one without a DLQ is an error
    #[tokio::test]
    async fn test_retry_configuration_errors() {
        let broker = InMemoryBroker::default();
        let registry = registry_with_dlq_messages(&broker, 0).await;

        let unknown = execute_command(
            &Commands::Retry {
                queue: "payments".to_string(),
                max: None,
                wait: 0,
            },
            &orders_config(),
            Arc::clone(&registry),
            None,
            OutputFormat::Text,
        )
        .await
        .unwrap_err();
        let no_dlq = execute_command(
            &Commands::Retry {
                queue: "audit".to_string(),
                max: None,
                wait: 0,
            },
            &orders_config(),
            registry,
            None,
            OutputFormat::Text,
        )
        .await
        .unwrap_err();

        assert_eq!(unknown.exit_code(), 3);
        assert!(matches!(
            no_dlq,
            CliError::Redrive(RedriveError::NoDeadLetterQueue { .. })
        ));
    }

    /// Verify retry-all reports every queue with a DLQ and the total
    #[tokio::test]
    async fn test_retry_all() {
        let broker = InMemoryBroker::default();
        let registry = registry_with_dlq_messages(&broker, 4).await;

        let output = execute_command(
            &Commands::RetryAll {
                max: None,
                wait: 0,
            },
            &orders_config(),
            registry,
            None,
            OutputFormat::Text,
        )
        .await
        .unwrap();

        assert_eq!(
            output.rendered,
            "orders: moved 4, 0 remaining in dlq, 0 failed\nTotal moved: 4"
        );
    }
}

// ============================================================================
// Config Command Tests
// ============================================================================

mod config_command_tests {
    use super::*;
    use queue_runtime::AwsSettings;
    use std::io::Write;

    /// Verify the config command prints the loaded configuration as YAML
    #[tokio::test]
    async fn test_config_renders_loaded_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(
            b"queues:\n  - id: orders\n    name: orders-q\n    dead_letter_queue:\n      name: orders-dlq\n",
        )
        .unwrap();
        let config = StewardConfig::load(Some(file.path())).unwrap();
        let registry = build_registry_with_broker(&config, None, InMemoryBroker::default())
            .await
            .unwrap();

        let output = execute_command(
            &Commands::Config,
            &config,
            Arc::new(registry),
            None,
            OutputFormat::Text,
        )
        .await
        .unwrap();

        let rendered: serde_yaml::Value = serde_yaml::from_str(&output.rendered).unwrap();
        assert_eq!(rendered["queues"][0]["name"], "orders-q");
        assert_eq!(
            rendered["queues"][0]["dead_letter_queue"]["name"],
            "orders-dlq"
        );
        assert_eq!(rendered["provider"]["type"], "in_memory");
    }

    /// Verify credentials never appear in rendered configuration
    #[test]
    fn test_config_redacts_secrets() {
        let config = StewardConfig {
            provider: ProviderSettings::Aws(
                AwsSettings::for_region("eu-west-1").with_credentials("AKIDEXAMPLE", "wJalrXUtnFEMI"),
            ),
            ..StewardConfig::default()
        };

        let yaml = render_config(&config, OutputFormat::Text).unwrap();
        let json = render_config(&config, OutputFormat::Json).unwrap();

        for rendered in [&yaml, &json] {
            assert!(!rendered.contains("wJalrXUtnFEMI"));
            assert!(rendered.contains(REDACTED));
            assert!(rendered.contains("eu-west-1"));
        }
    }
}

// ============================================================================
// Error Tests
// ============================================================================

mod error_tests {
    use super::*;

    /// Verify each error category maps to its own exit code
    #[test]
    fn test_exit_codes() {
        let config = CliError::Configuration(ConfigError::Validation { errors: vec![] });
        let partial = CliError::PartialFailure { failed: 2 };
        let redrive = CliError::Redrive(RedriveError::NoDeadLetterQueue {
            id: "audit".to_string(),
        });
        let logging = CliError::Logging {
            message: "already set".to_string(),
        };

        assert_eq!(config.exit_code(), 1);
        assert_eq!(redrive.exit_code(), 3);
        assert_eq!(partial.exit_code(), 4);
        assert_eq!(logging.exit_code(), 6);
    }

    /// Verify the wait is capped at the transport maximum
    #[test]
    fn test_wait_duration_cap() {
        assert_eq!(wait_duration(0), Duration::zero());
        assert_eq!(wait_duration(5), Duration::seconds(5));
        assert_eq!(wait_duration(u64::MAX), Duration::seconds(20));
    }
}
