use std::fs;
use text_mesh::{MeshConfig, ServiceRegistry};

#[test]
fn test_load_shipped_config() {
    let config = MeshConfig::from_file("text_mesh.yaml");
    assert!(config.is_ok(), "Failed to load shipped config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.services.len(), 3);
    assert_eq!(config.services[0].name, "preprocessing");
    assert_eq!(config.services[0].read_timeout_ms, 10_000);
    assert_eq!(config.services[2].backoff_base_ms, 2_000);
    assert_eq!(config.gateway.listen_address, "0.0.0.0:8000");
    assert_eq!(config.gateway.max_body_bytes, 1_048_576);
    assert!(config.cache.enabled);
    assert!(config.cache.l2_url.is_none());

    let registry = ServiceRegistry::from_config(&config).unwrap();
    assert_eq!(registry.names(), vec!["preprocessing", "sentiment", "summarization"]);
}

#[test]
fn test_load_minimal_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("minimal.yaml");
    fs::write(&path, "logging:\n  level: debug\n").unwrap();

    let config = MeshConfig::from_file(&path).unwrap();
    assert_eq!(config.logging.level, "debug");
    // Defaults fill everything else
    assert_eq!(config.services.len(), 3);
    assert_eq!(config.cache.l1_capacity, 200);
    assert_eq!(config.cache.namespace, "preprocessing");
    assert_eq!(config.preprocessing.max_blocking_tasks, 4);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(
        &path,
        r#"
services:
  - name: preprocessing
    base_address: "ftp://pre:8001"
"#,
    )
    .unwrap();

    let err = MeshConfig::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("http or https"));
}

#[test]
fn test_malformed_yaml_is_rejected() {
    let err = MeshConfig::from_yaml("services: [unterminated").unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_reload_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("mesh.yaml");
    let mut config = MeshConfig::default();

    fs::write(&path, "cache:\n  enabled: false\nlogging:\n  level: warn\n").unwrap();
    let changes = config.reload_from_file(&path).unwrap();
    assert!(changes.cache_enabled_changed);
    assert!(changes.logging_changed);
    assert!(!changes.requires_restart());
    assert!(!config.cache.enabled);
    assert_eq!(config.logging.level, "warn");

    // A broken file leaves the running config alone
    fs::write(&path, "cache:\n  l1_capacity: 0\n").unwrap();
    assert!(config.reload_from_file(&path).is_err());
    assert_eq!(config.cache.l1_capacity, 200);
    assert!(!config.cache.enabled);
}
