//! # Queue-Steward CLI
//!
//! Administration commands over the configured queue registry:
//!
//! - `list`: registered queues and topics, optionally with current depths
//! - `retry <queue>`: move messages from a queue's dead letter queue back
//! - `retry-all`: the same for every queue that has a dead letter queue
//! - `config`: validate configuration, resolve every queue, print the settings
//!
//! Output goes to stdout as text or JSON; logs go to stderr.

use chrono::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use queue_runtime::ProviderSettings;
use queue_steward_core::{
    build_registry, BootstrapError, ConfigError, DlqRedriver, DomainEvent, EventPublisher,
    MessageTracing, PublishError, QueueSummary, RedriveError, RedriveReport, Registry,
    StewardConfig, TransferResult,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Steward CLI - queue registry and dead letter queue administration
#[derive(Debug, Parser)]
#[command(name = "queue-steward")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect registered queues and redrive dead letter queues")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_STEWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level; defaults to the configured level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// List registered queues and topics
    List {
        /// Read the current depth of every queue and dead letter queue
        #[arg(short, long)]
        depths: bool,
    },

    /// Move messages from one queue's dead letter queue back to the queue
    Retry {
        /// Queue identifier
        queue: String,

        /// Move at most this many messages
        #[arg(short, long)]
        max: Option<u64>,

        /// Seconds to wait for messages on each receive
        #[arg(short, long, default_value = "1")]
        wait: u64,
    },

    /// Retry the dead letter queue of every registered queue that has one
    RetryAll {
        /// Move at most this many messages per queue
        #[arg(short, long)]
        max: Option<u64>,

        /// Seconds to wait for messages on each receive
        #[arg(short, long, default_value = "1")]
        wait: u64,
    },

    /// Validate configuration, resolve every queue, and print the settings
    Config,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (YAML for configuration)
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Startup error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Redrive error: {0}")]
    Redrive(#[from] RedriveError),

    #[error("Redrive finished with {failed} failed message(s)")]
    PartialFailure { failed: usize },

    #[error("Audit publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Output error: {0}")]
    OutputYaml(#[from] serde_yaml::Error),

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Bootstrap(_) => 2,
            Self::Redrive(_) => 3,
            Self::PartialFailure { .. } => 4,
            Self::Publish(_) => 5,
            Self::Output(_) | Self::OutputYaml(_) | Self::Logging { .. } => 6,
        }
    }
}

// ============================================================================
// Audit Events
// ============================================================================

/// Published to the audit queue after every retry command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedriveAudit {
    /// Queue retried, or `None` for retry-all
    pub queue_id: Option<String>,
    pub max_messages: Option<u64>,
    pub moved: u64,
    pub failures: usize,
}

impl DomainEvent for RedriveAudit {
    fn event_type(&self) -> &str {
        "dlq.redrive.completed"
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Rendered command output and the number of per-message failures behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub rendered: String,
    pub failures: usize,
}

pub async fn run_cli(cli: Cli) -> Result<(), CliError> {
    let config = StewardConfig::load(cli.config.as_deref())?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    initialize_logging(&level, cli.json_logs || config.logging.json_format)?;

    let tracer_provider = config
        .tracing
        .enabled
        .then(|| build_tracer_provider(&config.tracing.service_name));
    let message_tracing = tracer_provider
        .as_ref()
        .map(|provider| MessageTracing::new(provider.tracer("queue-steward")));

    let registry = Arc::new(build_registry(&config, message_tracing.as_ref()).await?);
    let publisher = match &config.audit_queue {
        Some(queue_id) => Some(EventPublisher::new(&registry, queue_id)?),
        None => None,
    };

    let result = execute_command(
        &cli.command,
        &config,
        registry,
        publisher.as_ref(),
        cli.format,
    )
    .await;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            debug!(error = %e, "Tracer provider shutdown failed");
        }
    }

    let output = result?;
    println!("{}", output.rendered);
    if output.failures > 0 {
        return Err(CliError::PartialFailure {
            failed: output.failures,
        });
    }
    Ok(())
}

/// Execute one command against a built registry
pub async fn execute_command(
    command: &Commands,
    config: &StewardConfig,
    registry: Arc<Registry>,
    publisher: Option<&EventPublisher>,
    format: OutputFormat,
) -> Result<CommandOutput, CliError> {
    match command {
        Commands::List { depths } => {
            let summaries = if *depths {
                registry.inspect_queues().await
            } else {
                registry.summaries()
            };
            Ok(CommandOutput {
                rendered: render_list(&registry, &summaries, format)?,
                failures: 0,
            })
        }
        Commands::Retry { queue, max, wait } => {
            info!(queue_id = %queue, max_messages = ?max, "Retrying dead letter queue");
            let redriver = DlqRedriver::new(registry).with_wait(wait_duration(*wait));
            let result = redriver.retry_dlq(queue, *max).await?;

            audit(
                publisher,
                RedriveAudit {
                    queue_id: Some(queue.clone()),
                    max_messages: *max,
                    moved: result.moved_count,
                    failures: result.failures.len(),
                },
            )
            .await;

            Ok(CommandOutput {
                rendered: render_transfer(queue, &result, format)?,
                failures: result.failures.len(),
            })
        }
        Commands::Config => Ok(CommandOutput {
            rendered: render_config(config, format)?,
            failures: 0,
        }),
        Commands::RetryAll { max, wait } => {
            info!(max_messages = ?max, "Retrying every dead letter queue");
            let redriver = DlqRedriver::new(registry).with_wait(wait_duration(*wait));
            let report = redriver.retry_all_dlqs(*max).await;
            let failures = report.results.values().map(|r| r.failures.len()).sum();

            audit(
                publisher,
                RedriveAudit {
                    queue_id: None,
                    max_messages: *max,
                    moved: report.total_moved(),
                    failures,
                },
            )
            .await;

            Ok(CommandOutput {
                rendered: render_report(&report, format)?,
                failures,
            })
        }
    }
}

/// The redrive has already happened, so a failed audit is only logged
async fn audit(publisher: Option<&EventPublisher>, event: RedriveAudit) {
    if let Some(publisher) = publisher {
        if let Err(e) = publisher.publish(&event).await {
            warn!(
                queue_id = %publisher.queue_id(),
                error = %e,
                "Failed to publish redrive audit event"
            );
        }
    }
}

/// Transports cap a single receive wait at 20 seconds
const MAX_WAIT_SECONDS: u64 = 20;

fn wait_duration(seconds: u64) -> Duration {
    Duration::seconds(seconds.min(MAX_WAIT_SECONDS) as i64)
}

// ============================================================================
// Setup
// ============================================================================

/// Install the global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "queue_steward_cli={level},queue_steward_core={level},queue_runtime={level}",
            level = level
        )
        .into()
    });

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })
}

/// Tracer provider for message spans. Spans are recorded but not exported.
fn build_tracer_provider(service_name: &str) -> SdkTracerProvider {
    SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build()
}

// ============================================================================
// Rendering
// ============================================================================

#[derive(Serialize)]
struct TopicSummary {
    id: String,
    arn: String,
    provider: String,
}

#[derive(Serialize)]
struct ListOutput<'a> {
    queues: &'a [QueueSummary],
    topics: Vec<TopicSummary>,
}

fn render_list(
    registry: &Registry,
    summaries: &[QueueSummary],
    format: OutputFormat,
) -> Result<String, CliError> {
    let topics: Vec<TopicSummary> = registry
        .list_topics()
        .map(|t| TopicSummary {
            id: t.id.to_string(),
            arn: t.arn.to_string(),
            provider: t.client.provider_type().to_string(),
        })
        .collect();

    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(&ListOutput {
            queues: summaries,
            topics,
        })?);
    }

    let mut lines = vec!["Queues:".to_string()];
    if summaries.is_empty() {
        lines.push("  (none)".to_string());
    }
    lines.extend(summaries.iter().map(queue_line));

    lines.push("Topics:".to_string());
    if topics.is_empty() {
        lines.push("  (none)".to_string());
    }
    lines.extend(
        topics
            .iter()
            .map(|topic| format!("  {} -> {}", topic.id, topic.arn)),
    );
    Ok(lines.join("\n"))
}

fn queue_line(summary: &QueueSummary) -> String {
    let depth = |d: Option<u64>| d.map(|d| format!(" [{}]", d)).unwrap_or_default();
    let dead_letter = match &summary.dead_letter_queue {
        Some(dlq) => format!(", dlq {}{}", dlq, depth(summary.dead_letter_depth)),
        None => ", no dlq".to_string(),
    };
    format!(
        "  {} -> {}{}{}",
        summary.id,
        summary.queue_name,
        depth(summary.depth),
        dead_letter
    )
}

/// Resolved configuration with credentials masked
pub fn render_config(config: &StewardConfig, format: OutputFormat) -> Result<String, CliError> {
    let mut shown = config.clone();
    if let ProviderSettings::Aws(aws) = &mut shown.provider {
        for secret in [&mut aws.secret_access_key, &mut aws.session_token] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
    }

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&shown)?),
        OutputFormat::Text => Ok(serde_yaml::to_string(&shown)?.trim_end().to_string()),
    }
}

const REDACTED: &str = "<redacted>";

fn transfer_line(queue_id: &str, result: &TransferResult) -> String {
    let remaining = result
        .remaining_count
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{}: moved {}, {} remaining in dlq, {} failed",
        queue_id,
        result.moved_count,
        remaining,
        result.failures.len()
    )
}

fn render_transfer(
    queue_id: &str,
    result: &TransferResult,
    format: OutputFormat,
) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(result)?);
    }

    let mut lines = vec![transfer_line(queue_id, result)];
    for failure in &result.failures {
        warn!(queue_id, error = %failure, "Message was not moved");
        lines.push(format!("  {}", failure));
    }
    Ok(lines.join("\n"))
}

fn render_report(report: &RedriveReport, format: OutputFormat) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }

    if report.results.is_empty() {
        return Ok("No queues with a dead letter queue are registered".to_string());
    }

    let mut lines: Vec<String> = report
        .results
        .iter()
        .map(|(id, result)| transfer_line(id, result))
        .collect();
    lines.push(format!("Total moved: {}", report.total_moved()));
    Ok(lines.join("\n"))
}
