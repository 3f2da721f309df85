//! Text Mesh
//!
//! A small microservice mesh for text processing: a gateway that fans requests
//! out to downstream services with retries and health aggregation, and a
//! preprocessing service whose transforms are memoized in a two-tier cache.
//!
//! # Overview
//!
//! Two pieces carry the engineering weight:
//!
//! - **Resilient dispatch**: every downstream call goes through the
//!   [`Dispatcher`], which retries with exponential backoff, classifies
//!   failures into [`FailureKind`]s and can be cancelled mid-wait.
//! - **Tiered caching**: [`CachingExecutor`] wraps pure text transforms with a
//!   [`TieredCache`] per operation (bounded LRU in process, optional shared
//!   store with TTL behind it). A shared tier that is down only costs latency.
//!
//! # Features
//!
//! - **Typed failures**: `Timeout`, `UpstreamStatus`, `ConnectionError`,
//!   `RetriesExhausted` and `Cancelled`, each with a gateway status code
//! - **Concurrent health checks**: [`HealthAggregator`] probes every endpoint at once
//! - **Content-addressed keys**: SHA-256 over canonical options and text ([`CacheKey`])
//! - **Runtime cache toggle**: [`CacheSwitch`] is read on every call
//! - **Prometheus metrics**: per-attempt dispatch and per-tier cache counters
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use text_mesh::{Dispatcher, HealthAggregator, MeshConfig, ServiceRegistry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MeshConfig::from_file("text_mesh.yaml")?;
//! let registry = ServiceRegistry::from_config(&config)?;
//! let dispatcher = Dispatcher::new(registry)?;
//!
//! let report = HealthAggregator::new(dispatcher).check_all().await;
//! println!("Mesh is {}", report.status.as_str());
//! # Ok(())
//! # }
//! ```
//!
//! # Caching a computation
//!
//! ```rust,no_run
//! use text_mesh::{CacheSwitch, CachingExecutor, TextOptions, TieredCache};
//!
//! # async fn run() {
//! let switch = CacheSwitch::new(true);
//! let executor: CachingExecutor<String> = CachingExecutor::new(switch.clone(), 4)
//!     .with_cache(TieredCache::new("upper", 200, switch));
//!
//! let options = TextOptions::new();
//! let upper = executor
//!     .execute("upper", "hello", &options, |text: &str, _: &TextOptions| text.to_uppercase())
//!     .await;
//! assert_eq!(upper, "HELLO");
//! # }
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from a YAML file; every field has a default:
//!
//! ```yaml
//! services:
//!   - name: sentiment
//!     base_address: "http://localhost:8002"
//!     read_timeout_ms: 30000
//!     max_retries: 3
//!     backoff_base_ms: 1000
//! cache:
//!   enabled: true
//!   l1_capacity: 200
//!   l2_ttl_secs: 3600
//!   l2_url: "redis://localhost:6379/0"
//! logging:
//!   level: info
//!   format: json
//! ```
//!
//! See [`MeshConfig`] for every option.

pub mod cache_key;
pub mod caching_executor;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod health_check;
pub mod metrics;
pub mod models;
pub mod preprocessing;
pub mod registry;
pub mod server;
pub mod shared_store;
pub mod text;
pub mod tiered_cache;

// Re-export commonly used types
pub use cache_key::CacheKey;
pub use caching_executor::CachingExecutor;
pub use config::{CacheConfig, ConfigChanges, MeshConfig, ServiceEndpointConfig};
pub use dispatcher::{CallResult, DispatchOutcome, Dispatcher};
pub use error::{CacheError, DispatchFailure, FailureKind, MeshError, Result};
pub use gateway::Gateway;
pub use health_check::{HealthAggregator, HealthReport, OverallStatus};
pub use metrics::MeshMetrics;
pub use models::{HealthStatus, ServiceEndpoint, ServiceHealth, TextOptions, TextRequest};
pub use preprocessing::PreprocessingService;
pub use registry::ServiceRegistry;
pub use shared_store::{MemoryStore, RedisStore, SharedStore};
pub use tiered_cache::{CacheStats, CacheSwitch, CacheTier, TieredCache};
