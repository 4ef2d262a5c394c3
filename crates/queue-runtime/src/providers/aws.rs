//! Shared plumbing for the AWS query-protocol providers (SQS and SNS).
//!
//! Both services are reached with direct HTTP calls instead of the AWS SDK:
//! form-encoded POST requests signed with AWS Signature V4, answered with XML
//! documents. This keeps the providers testable against mocked HTTP responses.
//!
//! ## Authentication
//!
//! Credentials come from [`AwsSettings`] when both keys are set, otherwise from
//! the `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`
//! environment variables.
//!
//! ## Endpoints
//!
//! The default endpoint is `https://{service}.{region}.amazonaws.com`; an
//! explicit endpoint (e.g. LocalStack) overrides it.

use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::MessageAttribute;
use crate::provider::{AwsSettings, ProviderType};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use url::Url;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

// ============================================================================
// Error Types
// ============================================================================

/// AWS specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Service error: {code}: {message}")]
    ServiceError { code: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl AwsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::NetworkError(_) => true,
            Self::Timeout(_) => true,
            Self::ServiceError { .. } => true, // Most service errors are throttling or 5xx
            Self::NotFound(_) => false,
            Self::InvalidReceipt(_) => false,
            Self::ConfigurationError(_) => false,
            Self::MalformedResponse(_) => false,
        }
    }

    /// Map AWS error to QueueError
    pub fn to_queue_error(self, provider: ProviderType) -> QueueError {
        match self {
            Self::Authentication(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::Timeout(msg) => QueueError::Timeout { operation: msg },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: provider.to_string(),
                code,
                message,
            },
            Self::NotFound(name) => match provider {
                ProviderType::AwsSns => QueueError::TopicNotFound { topic: name },
                _ => QueueError::QueueNotFound { queue_name: name },
            },
            Self::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::MalformedResponse(msg) => {
                QueueError::SerializationError(SerializationError::MalformedResponse {
                    message: msg,
                })
            }
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Static AWS credentials
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Credentials from settings, falling back to the standard environment variables
    pub fn resolve(settings: &AwsSettings) -> Result<Self, AwsError> {
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            return Ok(Self {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: settings.session_token.clone(),
            });
        }

        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Self {
                access_key_id,
                secret_access_key,
                session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            }),
            _ => Err(AwsError::Authentication(
                "no credentials in settings or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY".to_string(),
            )),
        }
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<REDACTED>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// Implements the AWS Signature V4 signing process:
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
///
/// ## References
///
/// - [AWS Signature V4](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)
#[derive(Clone)]
pub struct AwsV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

impl AwsV4Signer {
    /// Create new AWS Signature V4 signer for one service in one region
    pub fn new(credentials: AwsCredentials, region: String, service: String) -> Self {
        Self {
            credentials,
            region,
            service,
        }
    }

    /// Sign an HTTP request with AWS Signature V4
    ///
    /// Returns the headers to add to the request: `Authorization`, `x-amz-date`,
    /// `host`, and `x-amz-security-token` when a session token is present.
    pub fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        query_params: &HashMap<String, String>,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> HashMap<String, String> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Task 1: Create canonical request
        let mut canonical_query_string = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>();
        canonical_query_string.sort();
        let canonical_query_string = canonical_query_string.join("&");

        // Canonical headers (must be sorted)
        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = "host;x-amz-date".to_string();
        if let Some(token) = &self.credentials.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        // Task 2: Create string to sign
        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        // Task 3: Calculate signature
        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        // Task 4: Build authorization header
        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm,
            self.credentials.access_key_id,
            credential_scope,
            signed_headers,
            signature
        );

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), authorization_header);
        headers.insert("x-amz-date".to_string(), amz_date);
        headers.insert("host".to_string(), host.to_string());
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        headers
    }

    /// Calculate AWS Signature V4 signature
    ///
    /// Uses 4-level HMAC-SHA256 chain to derive signing key:
    /// 1. kDate = HMAC("AWS4" + secret_key, date)
    /// 2. kRegion = HMAC(kDate, region)
    /// 3. kService = HMAC(kRegion, service)
    /// 4. kSigning = HMAC(kService, "aws4_request")
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }
}

/// Compute HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

// ============================================================================
// XML Responses
// ============================================================================

/// Minimal element tree built from a query-protocol XML response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a document; the returned node is a nameless root holding the document element
    pub fn parse(xml: &str) -> Result<XmlNode, AwsError> {
        use quick_xml::events::Event;
        use quick_xml::Reader;

        let mut reader = Reader::from_str(xml);
        let mut stack = vec![XmlNode::default()];
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    stack.push(XmlNode {
                        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                        ..XmlNode::default()
                    });
                }
                Ok(Event::Empty(e)) => {
                    let node = XmlNode {
                        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                        ..XmlNode::default()
                    };
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|e| {
                        AwsError::MalformedResponse(format!("Failed to unescape XML text: {}", e))
                    })?;
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    let data = e.into_inner();
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Ok(Event::End(_)) => {
                    if stack.len() < 2 {
                        return Err(AwsError::MalformedResponse(
                            "unbalanced closing tag".to_string(),
                        ));
                    }
                    if let Some(node) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(node);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(AwsError::MalformedResponse(format!(
                        "XML parsing error: {}",
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        if stack.len() != 1 {
            return Err(AwsError::MalformedResponse(
                "document ended inside an element".to_string(),
            ));
        }
        stack
            .pop()
            .ok_or_else(|| AwsError::MalformedResponse("empty document".to_string()))
    }

    /// First direct child with the given name
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first direct child with the given name
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// First descendant (depth-first) with the given name
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants with the given name, in document order
    pub fn find_all<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.find_all(name, found);
        }
    }
}

/// Parse the `<Error><Code/><Message/></Error>` body of a failed call
pub fn parse_error_response(xml: &str, status_code: u16) -> AwsError {
    let root = XmlNode::parse(xml).unwrap_or_default();
    let error = root.find("Error");
    let code = error
        .and_then(|e| e.child_text("Code"))
        .unwrap_or("Unknown")
        .to_string();
    let message = error
        .and_then(|e| e.child_text("Message"))
        .unwrap_or("Unknown error")
        .to_string();

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" | "NotFound" => {
            AwsError::NotFound(message)
        }
        "InvalidClientTokenId" | "UnrecognizedClientException" | "SignatureDoesNotMatch"
        | "AuthorizationError" => AwsError::Authentication(format!("{}: {}", code, message)),
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => AwsError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            AwsError::Authentication(format!("{}: {}", code, message))
        }
        _ => AwsError::ServiceError { code, message },
    }
}

// ============================================================================
// Message Attribute Encoding
// ============================================================================

/// Append form parameters for a set of message attributes.
///
/// `prefix` is the per-attribute prefix without its index, e.g.
/// `MessageAttribute` (SQS) or `MessageAttributes.entry` (SNS). Attributes
/// are numbered from 1 in name order.
pub fn encode_attributes(
    params: &mut Vec<(String, String)>,
    prefix: &str,
    attributes: &HashMap<String, MessageAttribute>,
) {
    let mut names: Vec<&String> = attributes.keys().collect();
    names.sort();

    for (index, name) in names.into_iter().enumerate() {
        let Some(value) = attributes.get(name) else {
            continue;
        };
        let base = format!("{}.{}", prefix, index + 1);
        params.push((format!("{}.Name", base), name.clone()));
        params.push((
            format!("{}.Value.DataType", base),
            value.data_type().to_string(),
        ));
        let value_field = match value {
            MessageAttribute::Binary(_) => "BinaryValue",
            _ => "StringValue",
        };
        params.push((
            format!("{}.Value.{}", base, value_field),
            value.to_wire_value(),
        ));
    }
}

/// Decode a `<MessageAttribute>` entry: `<Name/>` plus `<Value><DataType/>…</Value>`
pub fn decode_attribute(node: &XmlNode) -> Result<(String, MessageAttribute), AwsError> {
    let name = node
        .child_text("Name")
        .ok_or_else(|| AwsError::MalformedResponse("attribute without Name".to_string()))?
        .to_string();
    let value = node
        .child("Value")
        .ok_or_else(|| AwsError::MalformedResponse(format!("attribute '{}' without Value", name)))?;
    let data_type = value.child_text("DataType").unwrap_or("String");
    let raw = value
        .child_text("StringValue")
        .or_else(|| value.child_text("BinaryValue"))
        .unwrap_or_default();

    let attribute = MessageAttribute::from_wire(&name, data_type, raw)
        .map_err(|e| AwsError::MalformedResponse(e.to_string()))?;
    Ok((name, attribute))
}

// ============================================================================
// Signed HTTP Client
// ============================================================================

/// HTTP client issuing signed query-protocol calls to one AWS service
#[derive(Clone)]
pub struct AwsHttpClient {
    http_client: HttpClient,
    signer: AwsV4Signer,
    endpoint: Url,
    service: String,
    version: String,
}

impl AwsHttpClient {
    /// Create a client for `service` (e.g. `sqs`) speaking API `version`
    pub fn new(settings: &AwsSettings, service: &str, version: &str) -> Result<Self, AwsError> {
        if settings.region.is_empty() {
            return Err(AwsError::ConfigurationError(
                "Region cannot be empty".to_string(),
            ));
        }

        let credentials = AwsCredentials::resolve(settings)?;
        let signer = AwsV4Signer::new(
            credentials,
            settings.region.clone(),
            service.to_string(),
        );

        let endpoint = match &settings.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.{}.amazonaws.com", service, settings.region),
        };
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            AwsError::ConfigurationError(format!("Invalid endpoint '{}': {}", endpoint, e))
        })?;
        if endpoint.host_str().is_none() {
            return Err(AwsError::ConfigurationError(format!(
                "Endpoint '{}' has no host",
                endpoint
            )));
        }

        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AwsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            endpoint,
            service: service.to_string(),
            version: version.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Issue one signed call and return the parsed response document
    pub async fn call(
        &self,
        action: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<XmlNode, AwsError> {
        params.insert(0, ("Action".to_string(), action.to_string()));
        params.insert(1, ("Version".to_string(), self.version.clone()));

        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let path = self.endpoint.path().to_string();
        let headers = self.signer.sign_request(
            "POST",
            &self.host(),
            &path,
            &HashMap::new(),
            &body,
            &Utc::now(),
        );

        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(body);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        debug!(service = %self.service, action = action, "Sending AWS request");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Timeout(format!("{}: {}", action, e))
            } else if e.is_connect() {
                AwsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AwsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| AwsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        XmlNode::parse(&response_body)
    }
}

impl fmt::Debug for AwsHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsHttpClient")
            .field("service", &self.service)
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

/// Summarise failed batch entries as `id: code - message` pairs
pub fn describe_batch_failures(failures: &[&XmlNode]) -> String {
    failures
        .iter()
        .map(|entry| {
            format!(
                "{}: {} - {}",
                entry.child_text("Id").unwrap_or("?"),
                entry.child_text("Code").unwrap_or("Unknown"),
                entry.child_text("Message").unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
