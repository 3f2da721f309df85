//! Core data models for the text mesh

use crate::config::ServiceEndpointConfig;
use crate::error::{MeshError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Maximum accepted text length for preprocessing requests
pub const MAX_TEXT_LENGTH: usize = 10_000;

/// Static description of one downstream service
///
/// Immutable after construction; the dispatcher's registry owns one per downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    name: String,
    base_address: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
}

impl ServiceEndpoint {
    /// Create a new ServiceEndpoint
    ///
    /// # Arguments
    /// * `name` - Registry name, e.g. "preprocessing"
    /// * `base_address` - Base URL of the service, e.g. "http://localhost:8001"
    /// * `connect_timeout` - Per-attempt TCP connect budget
    /// * `read_timeout` - Per-attempt budget for the whole request/response
    /// * `max_retries` - Retries after the first attempt
    /// * `backoff_base` - Sleep before the first retry; doubles on each later one
    pub fn new(
        name: impl Into<String>,
        base_address: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let base_address = base_address.into();

        if name.trim().is_empty() {
            return Err(MeshError::ConfigError(
                "service name must not be empty".to_string(),
            ));
        }

        let parsed = url::Url::parse(&base_address).map_err(|e| {
            MeshError::ConfigError(format!(
                "service '{}' has invalid base address '{}': {}",
                name, base_address, e
            ))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(MeshError::ConfigError(format!(
                "service '{}' base address must be http or https, got '{}'",
                name,
                parsed.scheme()
            )));
        }

        if connect_timeout.is_zero() {
            return Err(MeshError::ConfigError(format!(
                "service '{}' connect timeout must be greater than 0",
                name
            )));
        }

        if read_timeout.is_zero() {
            return Err(MeshError::ConfigError(format!(
                "service '{}' read timeout must be greater than 0",
                name
            )));
        }

        Ok(ServiceEndpoint {
            name,
            base_address,
            connect_timeout,
            read_timeout,
            max_retries,
            backoff_base,
        })
    }

    /// Build an endpoint from its configuration entry
    pub fn from_config(config: &ServiceEndpointConfig) -> Result<Self> {
        Self::new(
            config.name.clone(),
            config.base_address.clone(),
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.read_timeout_ms),
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_address(&self) -> &str {
        &self.base_address
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Total number of attempts a call may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Join the base address and an operation path with exactly one slash
    pub fn url_for(&self, operation: &str) -> String {
        format!(
            "{}/{}",
            self.base_address.trim_end_matches('/'),
            operation.trim_start_matches('/')
        )
    }

    /// Sleep before retrying after attempt `attempt` (0-based): `backoff_base * 2^attempt`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

/// Health of a single downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// One probe result, produced fresh on every aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: HealthStatus,
    pub url: String,
    /// Failure kind and message for unhealthy services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Body returned by the downstream's `/health`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

/// Free-form option set attached to a text request
///
/// Key order carries no meaning; see [`crate::cache_key`] for canonicalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextOptions(Map<String, Value>);

impl TextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Read a boolean flag, falling back to `default` when absent or not a bool
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for TextOptions {
    fn from(map: Map<String, Value>) -> Self {
        TextOptions(map)
    }
}

/// Body accepted by every preprocessing operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRequest {
    pub text: String,
    #[serde(default)]
    pub options: TextOptions,
}

impl TextRequest {
    /// Enforce `1 <= chars(text) <= MAX_TEXT_LENGTH`
    pub fn validate(&self) -> Result<()> {
        let length = self.text.chars().count();
        if length == 0 {
            return Err(MeshError::Validation("text must not be empty".to_string()));
        }
        if length > MAX_TEXT_LENGTH {
            return Err(MeshError::Validation(format!(
                "text must be at most {} characters, got {}",
                MAX_TEXT_LENGTH, length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedTextResponse {
    pub original_text: String,
    pub cleaned_text: String,
    pub operations_applied: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizedTextResponse {
    pub original_text: String,
    pub tokens: Vec<String>,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTextResponse {
    pub original_text: String,
    pub normalized_text: String,
    pub operations_applied: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullPreprocessResponse {
    pub original_text: String,
    pub cleaned_text: String,
    pub normalized_text: String,
    pub tokens: Vec<String>,
    pub token_count: usize,
    pub operations_applied: Vec<String>,
}
