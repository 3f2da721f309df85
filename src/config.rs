//! Configuration management for the text mesh

use crate::error::{MeshError, Result};
use crate::models::ServiceEndpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Top-level configuration shared by the gateway and the preprocessing service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    /// Downstream services the gateway dispatches to
    #[serde(default = "default_services")]
    pub services: Vec<ServiceEndpointConfig>,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub preprocessing: PreprocessingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for one downstream service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceEndpointConfig {
    pub name: String,

    pub base_address: String,

    /// TCP connect budget per attempt (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Request/response budget per attempt (default: 30000)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles per attempt (default: 1000)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

/// Gateway HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_address")]
    pub listen_address: String,

    /// Larger request bodies get 413 (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Preprocessing HTTP listener and worker pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreprocessingConfig {
    #[serde(default = "default_preprocessing_address")]
    pub listen_address: String,

    /// Upper bound on transforms running on the blocking pool at once (default: 4)
    #[serde(default = "default_max_blocking_tasks")]
    pub max_blocking_tasks: usize,

    /// Texts longer than this many characters are transformed on the blocking pool
    /// (default: 2000)
    #[serde(default = "default_offload_threshold")]
    pub offload_threshold_chars: usize,

    /// Larger request bodies get 413 (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Two-tier result cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Runtime switch; re-read on reload (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// L1 entries per operation (default: 200)
    #[serde(default = "default_l1_capacity")]
    pub l1_capacity: usize,

    /// L2 entry lifetime in seconds (default: 3600)
    #[serde(default = "default_l2_ttl_secs")]
    pub l2_ttl_secs: u64,

    /// Shared store URL, e.g. "redis://cache:6379/0"; memory-only when absent
    #[serde(default)]
    pub l2_url: Option<String>,

    /// Budget for a single L2 call (default: 500)
    #[serde(default = "default_l2_timeout_ms")]
    pub l2_timeout_ms: u64,

    /// First segment of every L2 key (default: "preprocessing")
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json" (default: "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: default_gateway_address(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            listen_address: default_preprocessing_address(),
            max_blocking_tasks: default_max_blocking_tasks(),
            offload_threshold_chars: default_offload_threshold(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            l1_capacity: default_l1_capacity(),
            l2_ttl_secs: default_l2_ttl_secs(),
            l2_url: None,
            l2_timeout_ms: default_l2_timeout_ms(),
            namespace: default_namespace(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            services: default_services(),
            gateway: GatewayConfig::default(),
            preprocessing: PreprocessingConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// Default value functions for serde
fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_l1_capacity() -> usize {
    200
}

fn default_l2_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_l2_timeout_ms() -> u64 {
    500
}

fn default_namespace() -> String {
    "preprocessing".to_string()
}

fn default_gateway_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_preprocessing_address() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_max_blocking_tasks() -> usize {
    4
}

fn default_offload_threshold() -> usize {
    2_000
}

fn default_max_body_bytes() -> usize {
    crate::server::DEFAULT_MAX_BODY_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_services() -> Vec<ServiceEndpointConfig> {
    vec![
        ServiceEndpointConfig {
            name: "preprocessing".to_string(),
            base_address: "http://localhost:8001".to_string(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: 10_000,
            max_retries: 3,
            backoff_base_ms: 1_000,
        },
        ServiceEndpointConfig {
            name: "sentiment".to_string(),
            base_address: "http://localhost:8002".to_string(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: 30_000, // model inference is slower
            max_retries: 3,
            backoff_base_ms: 1_000,
        },
        ServiceEndpointConfig {
            name: "summarization".to_string(),
            base_address: "http://localhost:8003".to_string(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: 60_000,
            max_retries: 3,
            backoff_base_ms: 2_000,
        },
    ]
}

impl MeshConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(MeshConfig)` if loading and validation succeed
    /// * `Err(MeshError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            MeshError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: MeshConfig = serde_yaml::from_str(content).map_err(|e| {
            MeshError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - every service builds a valid [`ServiceEndpoint`]
    /// - service names are unique
    /// - l1_capacity must be > 0
    /// - l2_ttl_secs must be > 0 when caching is enabled
    /// - logging.format must be "text" or "json"
    /// - max_blocking_tasks must be > 0
    /// - max_body_bytes must be > 0 for both listeners
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            ServiceEndpoint::from_config(service)?;
            if !seen.insert(service.name.as_str()) {
                return Err(MeshError::ConfigError(format!(
                    "duplicate service name '{}'",
                    service.name
                )));
            }
        }

        if self.cache.l1_capacity == 0 {
            return Err(MeshError::ConfigError(
                "cache.l1_capacity must be greater than 0".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.l2_ttl_secs == 0 {
            return Err(MeshError::ConfigError(
                "cache.l2_ttl_secs must be greater than 0 when caching is enabled".to_string(),
            ));
        }

        if self.cache.namespace.is_empty() || self.cache.namespace.contains(':') {
            return Err(MeshError::ConfigError(format!(
                "cache.namespace must be non-empty and must not contain ':', got '{}'",
                self.cache.namespace
            )));
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(MeshError::ConfigError(format!(
                    "Invalid logging.format '{}', must be 'text' or 'json'",
                    other
                )));
            }
        }

        if self.gateway.max_body_bytes == 0 || self.preprocessing.max_body_bytes == 0 {
            return Err(MeshError::ConfigError(
                "max_body_bytes must be greater than 0".to_string(),
            ));
        }

        if self.preprocessing.max_blocking_tasks == 0 {
            return Err(MeshError::ConfigError(
                "preprocessing.max_blocking_tasks must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build validated endpoints for every configured service
    pub fn endpoints(&self) -> Result<Vec<ServiceEndpoint>> {
        self.services.iter().map(ServiceEndpoint::from_config).collect()
    }

    /// Update configuration from another config
    ///
    /// Only the cache switch and logging level take effect on a running process;
    /// everything else is reported so the caller can warn that a restart is needed.
    ///
    /// # Returns
    /// * `Ok(ConfigChanges)` - Description of what changed
    /// * `Err(MeshError)` - If the new configuration is invalid (self is untouched)
    pub fn update_from(&mut self, new_config: &MeshConfig) -> Result<ConfigChanges> {
        new_config.validate()?;

        let mut changes = ConfigChanges::default();

        if self.services != new_config.services {
            changes.services_changed = true;
            self.services = new_config.services.clone();
        }

        if self.cache.enabled != new_config.cache.enabled {
            changes.cache_enabled_changed = true;
            self.cache.enabled = new_config.cache.enabled;
        }

        let mut other_cache = new_config.cache.clone();
        other_cache.enabled = self.cache.enabled;
        if self.cache != other_cache {
            changes.cache_settings_changed = true;
            self.cache = new_config.cache.clone();
        }

        if self.gateway != new_config.gateway || self.preprocessing != new_config.preprocessing {
            changes.listeners_changed = true;
            self.gateway = new_config.gateway.clone();
            self.preprocessing = new_config.preprocessing.clone();
        }

        if self.logging != new_config.logging {
            changes.logging_changed = true;
            self.logging = new_config.logging.clone();
        }

        Ok(changes)
    }

    /// Reload configuration from file and apply changes
    pub fn reload_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<ConfigChanges> {
        let new_config = Self::from_file(path)?;
        self.update_from(&new_config)
    }
}

/// Description of configuration changes after hot reload
#[derive(Debug, Default, Clone)]
pub struct ConfigChanges {
    pub services_changed: bool,
    pub cache_enabled_changed: bool,
    pub cache_settings_changed: bool,
    pub listeners_changed: bool,
    pub logging_changed: bool,
}

impl ConfigChanges {
    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        self.services_changed
            || self.cache_enabled_changed
            || self.cache_settings_changed
            || self.listeners_changed
            || self.logging_changed
    }

    /// Changes that a running process cannot pick up
    pub fn requires_restart(&self) -> bool {
        self.services_changed || self.cache_settings_changed || self.listeners_changed
    }

    /// Get a summary of changes
    pub fn summary(&self) -> Vec<String> {
        let mut changes = Vec::new();

        if self.services_changed {
            changes.push("services".to_string());
        }
        if self.cache_enabled_changed {
            changes.push("cache.enabled".to_string());
        }
        if self.cache_settings_changed {
            changes.push("cache".to_string());
        }
        if self.listeners_changed {
            changes.push("listeners".to_string());
        }
        if self.logging_changed {
            changes.push("logging".to_string());
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();
        assert_eq!(config.services.len(), 3);
        assert_eq!(config.services[2].name, "summarization");
        assert_eq!(config.services[2].backoff_base_ms, 2_000);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.l1_capacity, 200);
        assert_eq!(config.cache.l2_ttl_secs, 3600);
        assert!(config.cache.l2_url.is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(MeshConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_yaml_applies_defaults() {
        let yaml = r#"
services:
  - name: preprocessing
    base_address: "http://pre:8001"
    max_retries: 2
cache:
  l2_url: "redis://cache:6379/0"
"#;
        let config = MeshConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].max_retries, 2);
        assert_eq!(config.services[0].read_timeout_ms, 30_000);
        assert_eq!(config.cache.l2_url.as_deref(), Some("redis://cache:6379/0"));
        assert_eq!(config.cache.l1_capacity, 200);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_validate_duplicate_service() {
        let mut config = MeshConfig::default();
        config.services[1].name = "preprocessing".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_base_address() {
        let mut config = MeshConfig::default();
        config.services[0].base_address = "localhost 8001".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_connect_timeout() {
        let mut config = MeshConfig::default();
        config.services[1].connect_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect timeout"));
    }

    #[test]
    fn test_validate_zero_body_limit() {
        let mut config = MeshConfig::default();
        assert_eq!(config.gateway.max_body_bytes, 1024 * 1024);
        config.preprocessing.max_body_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_l1_capacity() {
        let mut config = MeshConfig::default();
        config.cache.l1_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_ttl_only_when_enabled() {
        let mut config = MeshConfig::default();
        config.cache.l2_ttl_secs = 0;
        assert!(config.validate().is_err());

        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_format() {
        let mut config = MeshConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_namespace() {
        let mut config = MeshConfig::default();
        config.cache.namespace = "a:b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_hot_reload() {
        let mut config = MeshConfig::default();
        let mut new_config = MeshConfig::default();

        let changes = config.update_from(&new_config).unwrap();
        assert!(!changes.has_changes());

        // Toggling the cache does not need a restart
        new_config.cache.enabled = false;
        let changes = config.update_from(&new_config).unwrap();
        assert!(changes.cache_enabled_changed);
        assert!(!changes.cache_settings_changed);
        assert!(!changes.requires_restart());
        assert!(!config.cache.enabled);

        // Changing L1 capacity does
        new_config.cache.l1_capacity = 500;
        let changes = config.update_from(&new_config).unwrap();
        assert!(changes.cache_settings_changed);
        assert!(changes.requires_restart());
        assert_eq!(config.cache.l1_capacity, 500);
    }

    #[test]
    fn test_config_hot_reload_validation() {
        let mut config = MeshConfig::default();
        let mut new_config = MeshConfig::default();
        new_config.cache.l1_capacity = 0;

        assert!(config.update_from(&new_config).is_err());
        assert_eq!(config.cache.l1_capacity, 200);
    }

    #[test]
    fn test_config_changes_summary() {
        let mut changes = ConfigChanges::default();
        assert!(changes.summary().is_empty());

        changes.cache_enabled_changed = true;
        changes.logging_changed = true;
        let summary = changes.summary();
        assert_eq!(summary, vec!["cache.enabled".to_string(), "logging".to_string()]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mesh.yaml");
        fs::write(&path, "cache:\n  enabled: false\n").unwrap();

        let config = MeshConfig::from_file(&path).unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.services.len(), 3);

        assert!(MeshConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
