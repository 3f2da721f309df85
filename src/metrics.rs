//! Prometheus metrics for dispatch attempts and cache lookups
//!
//! Every process builds one [`MeshMetrics`] on its own [`Registry`] so that
//! tests can create as many instances as they like.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metrics shared by the dispatcher and the tiered caches
#[derive(Clone)]
pub struct MeshMetrics {
    registry: Registry,

    /// Attempts by endpoint, operation and outcome
    dispatch_attempts: IntCounterVec,

    /// Per-attempt latency by endpoint
    dispatch_attempt_duration: HistogramVec,

    /// Cache lookups by operation and tier (l1, l2, miss)
    cache_lookups: IntCounterVec,

    /// Shared-tier failures swallowed by the cache
    cache_l2_errors: IntCounterVec,
}

impl MeshMetrics {
    /// Create metrics registered on a fresh private registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on the given registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let dispatch_attempts = IntCounterVec::new(
            Opts::new(
                "textmesh_dispatch_attempts_total",
                "Downstream call attempts by outcome",
            ),
            &["endpoint", "operation", "outcome"],
        )?;
        registry.register(Box::new(dispatch_attempts.clone()))?;

        let dispatch_attempt_duration = HistogramVec::new(
            HistogramOpts::new(
                "textmesh_dispatch_attempt_duration_seconds",
                "Duration of a single downstream call attempt in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ]),
            &["endpoint"],
        )?;
        registry.register(Box::new(dispatch_attempt_duration.clone()))?;

        let cache_lookups = IntCounterVec::new(
            Opts::new(
                "textmesh_cache_lookups_total",
                "Cache lookups by operation and answering tier",
            ),
            &["operation", "tier"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let cache_l2_errors = IntCounterVec::new(
            Opts::new(
                "textmesh_cache_l2_errors_total",
                "Shared cache tier failures degraded to a miss",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(cache_l2_errors.clone()))?;

        Ok(Self {
            registry,
            dispatch_attempts,
            dispatch_attempt_duration,
            cache_lookups,
            cache_l2_errors,
        })
    }

    pub fn record_attempt(&self, endpoint: &str, operation: &str, outcome: &str, elapsed: Duration) {
        self.dispatch_attempts
            .with_label_values(&[endpoint, operation, outcome])
            .inc();
        self.dispatch_attempt_duration
            .with_label_values(&[endpoint])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_cache_lookup(&self, operation: &str, tier: &str) {
        self.cache_lookups.with_label_values(&[operation, tier]).inc();
    }

    pub fn record_l2_error(&self, operation: &str) {
        self.cache_l2_errors.with_label_values(&[operation]).inc();
    }

    pub fn attempts(&self, endpoint: &str, operation: &str, outcome: &str) -> u64 {
        self.dispatch_attempts
            .with_label_values(&[endpoint, operation, outcome])
            .get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in Prometheus text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
