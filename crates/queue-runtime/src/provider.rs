//! Provider types and configuration.

use serde::{Deserialize, Serialize};

/// Enumeration of supported transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    AwsSqs,
    AwsSns,
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => 256 * 1024,         // 256KB
            Self::AwsSns => 256 * 1024,         // 256KB
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }

    /// Get maximum number of entries in one batch call
    pub fn max_batch_size(&self) -> u32 {
        match self {
            Self::AwsSqs => 10,
            Self::AwsSns => 10,
            Self::InMemory => 100,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwsSqs => "aws_sqs",
            Self::AwsSns => "aws_sns",
            Self::InMemory => "in_memory",
        };
        write!(f, "{}", name)
    }
}

/// Transport selection and connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderSettings {
    InMemory(InMemorySettings),
    Aws(AwsSettings),
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::InMemory(InMemorySettings::default())
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemorySettings {
    /// Seconds a received message stays invisible before it is redelivered
    pub visibility_timeout_seconds: u64,
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: 30,
        }
    }
}

/// AWS SQS/SNS configuration
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    pub region: String,
    /// Endpoint override, e.g. LocalStack
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl AwsSettings {
    /// Settings for a region using credentials from the environment
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Self::default()
        }
    }

    /// Override the service endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Use explicit credentials instead of the environment
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }
}

// Credentials stay out of logs
impl std::fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field(
                "access_key_id",
                &self.access_key_id.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
