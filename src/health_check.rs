//! Health aggregation across downstream services
//!
//! [`HealthAggregator`] probes `GET /health` on every registered endpoint at
//! once and folds the answers into one [`HealthReport`].

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchFailure, FailureKind};
use crate::models::{HealthStatus, ServiceHealth};
use http::Method;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Overall status of the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// Every downstream answered its health probe
    Healthy,
    /// At least one downstream did not
    Degraded,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Healthy => "healthy",
            OverallStatus::Degraded => "degraded",
        }
    }

    /// Fold per-service entries; an empty set is healthy
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ServiceHealth>) -> Self {
        if entries
            .into_iter()
            .all(|entry| entry.status == HealthStatus::Healthy)
        {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        }
    }
}

/// Result of one aggregation, built fresh on every request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub services: BTreeMap<String, ServiceHealth>,
}

impl HealthReport {
    pub fn from_services(services: BTreeMap<String, ServiceHealth>) -> Self {
        HealthReport {
            status: OverallStatus::from_entries(services.values()),
            services,
        }
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = &ServiceHealth> {
        self.services
            .values()
            .filter(|entry| entry.status == HealthStatus::Unhealthy)
    }
}

/// Concurrent health prober
#[derive(Clone)]
pub struct HealthAggregator {
    dispatcher: Dispatcher,
}

impl HealthAggregator {
    pub fn new(dispatcher: Dispatcher) -> Self {
        HealthAggregator { dispatcher }
    }

    /// Probe every registered endpoint concurrently
    ///
    /// Waits for all probes; each is bounded only by its endpoint's own
    /// timeout and retry policy. Dropping the returned future aborts every
    /// probe still in flight.
    pub async fn check_all(&self) -> HealthReport {
        let names: Vec<String> = self
            .dispatcher
            .registry()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();

        debug!(count = names.len(), "Probing downstream health");

        let mut probes = JoinSet::new();
        for name in &names {
            let aggregator = self.clone();
            let name = name.clone();
            probes.spawn(async move { aggregator.probe(&name).await });
        }

        let mut services = BTreeMap::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(entry) => {
                    services.insert(entry.name.clone(), entry);
                }
                Err(e) => warn!("Health probe task failed: {}", e),
            }
        }

        // A probe task that panicked leaves no entry behind
        for name in names {
            if !services.contains_key(&name) {
                let entry = ServiceHealth {
                    name: name.clone(),
                    status: HealthStatus::Unhealthy,
                    url: self.health_url(&name),
                    detail: Some("probe task failed".to_string()),
                    response: None,
                };
                services.insert(name, entry);
            }
        }

        let report = HealthReport::from_services(services);
        info!(
            status = report.status.as_str(),
            unhealthy = report.unhealthy().count(),
            "Health aggregation completed"
        );
        report
    }

    /// Probe a single endpoint; `None` when no endpoint has that name
    pub async fn check_one(&self, name: &str) -> Option<ServiceHealth> {
        self.dispatcher.registry().get(name)?;
        Some(self.probe(name).await)
    }

    async fn probe(&self, name: &str) -> ServiceHealth {
        let url = self.health_url(name);
        match self.dispatcher.call(name, "health", Method::GET, None).await {
            Ok(body) => ServiceHealth {
                name: name.to_string(),
                status: HealthStatus::Healthy,
                url,
                detail: None,
                response: Some(body),
            },
            Err(failure) => ServiceHealth {
                name: name.to_string(),
                status: HealthStatus::Unhealthy,
                url,
                detail: Some(describe(&failure)),
                response: None,
            },
        }
    }

    fn health_url(&self, name: &str) -> String {
        self.dispatcher
            .registry()
            .get(name)
            .map(|endpoint| endpoint.url_for("health"))
            .unwrap_or_default()
    }
}

fn describe(failure: &DispatchFailure) -> String {
    match failure.kind {
        FailureKind::UpstreamStatus(code) => format!("HTTP {}: {}", code, failure.message),
        kind => format!("{}: {}", kind, failure.message),
    }
}
