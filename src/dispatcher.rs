//! Resilient dispatch of one logical call to a downstream service
//!
//! A call walks a small state machine:
//!
//! ```text
//! Attempting(n) --2xx--------------------------> Success(body)
//!               --failure, n < max_retries-----> Retrying(n + 1) after backoff_base * 2^n
//!               --failure, n == max_retries----> Failed(kind)
//! ```
//!
//! Any state can also end in `Cancelled` when the caller's token fires.

use crate::error::{DispatchFailure, FailureKind, MeshError, Result};
use crate::metrics::MeshMetrics;
use crate::models::ServiceEndpoint;
use crate::registry::ServiceRegistry;
use http::Method;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Either the downstream's JSON body or a typed failure
pub type DispatchOutcome = std::result::Result<Value, DispatchFailure>;

/// Result of a single successful attempt
#[derive(Debug, Clone)]
pub struct CallResult {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

/// Why one attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    Timeout(String),
    Status { code: u16, body: String },
    Connection(String),
}

impl AttemptError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AttemptError::Timeout(_) => FailureKind::Timeout,
            AttemptError::Status { code, .. } => FailureKind::UpstreamStatus(*code),
            AttemptError::Connection(_) => FailureKind::ConnectionError,
        }
    }

    /// The failure reported when this was the last allowed attempt
    fn into_final(self, attempts: u32) -> DispatchFailure {
        match self {
            AttemptError::Timeout(msg) => {
                DispatchFailure::new(FailureKind::RetriesExhausted, format!("timeout: {}", msg), attempts)
            }
            AttemptError::Status { code, body } => {
                DispatchFailure::new(FailureKind::UpstreamStatus(code), body, attempts)
            }
            AttemptError::Connection(msg) => {
                DispatchFailure::new(FailureKind::ConnectionError, msg, attempts)
            }
        }
    }
}

fn classify(err: &reqwest::Error) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Timeout(err.to_string())
    } else {
        AttemptError::Connection(err.to_string())
    }
}

/// Next step after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStep {
    /// Sleep, then start attempt `next_attempt`
    Retry { next_attempt: u32, after: Duration },
    /// Give up with this failure
    Fail(DispatchFailure),
}

/// Decide what follows failed attempt `attempt` (0-based) against `endpoint`
pub fn next_step(endpoint: &ServiceEndpoint, attempt: u32, error: AttemptError) -> RetryStep {
    if attempt < endpoint.max_retries() {
        RetryStep::Retry {
            next_attempt: attempt + 1,
            after: endpoint.backoff_for(attempt),
        }
    } else {
        RetryStep::Fail(error.into_final(attempt + 1))
    }
}

/// Issues calls to registered downstreams with retry and backoff
///
/// Cloning is cheap: the registry, HTTP clients and metrics are shared.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ServiceRegistry,
    /// One client per endpoint so each keeps its own connect timeout and pool
    clients: Arc<HashMap<String, Client>>,
    metrics: Option<MeshMetrics>,
}

impl Dispatcher {
    /// Create a new Dispatcher over every endpoint in `registry`
    pub fn new(registry: ServiceRegistry) -> Result<Self> {
        let mut clients = HashMap::with_capacity(registry.len());
        for endpoint in registry.iter() {
            let client = Client::builder()
                .connect_timeout(endpoint.connect_timeout())
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_nodelay(true)
                .build()
                .map_err(|e| {
                    MeshError::HttpError(format!(
                        "Failed to create HTTP client for '{}': {}",
                        endpoint.name(),
                        e
                    ))
                })?;
            clients.insert(endpoint.name().to_string(), client);
        }

        Ok(Dispatcher {
            registry,
            clients: Arc::new(clients),
            metrics: None,
        })
    }

    /// Record one metric sample per attempt
    pub fn with_metrics(mut self, metrics: MeshMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Call `operation` on the endpoint named `endpoint_name`
    ///
    /// # Arguments
    /// * `endpoint_name` - Registry name of the downstream
    /// * `operation` - Path below the endpoint's base address, e.g. "clean"
    /// * `method` - HTTP method
    /// * `body` - Optional JSON body
    ///
    /// # Returns
    /// * `Ok(Value)` with the first 2xx body
    /// * `Err(DispatchFailure)` once retries are spent
    pub async fn call(
        &self,
        endpoint_name: &str,
        operation: &str,
        method: Method,
        body: Option<&Value>,
    ) -> DispatchOutcome {
        self.call_with_cancel(endpoint_name, operation, method, body, &CancellationToken::new())
            .await
    }

    /// Same as [`Dispatcher::call`], aborting with `Cancelled` when `cancel` fires
    pub async fn call_with_cancel(
        &self,
        endpoint_name: &str,
        operation: &str,
        method: Method,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let (endpoint, client) = match (
            self.registry.get(endpoint_name),
            self.clients.get(endpoint_name),
        ) {
            (Some(endpoint), Some(client)) => (endpoint, client),
            _ => {
                warn!(endpoint = %endpoint_name, "No endpoint registered");
                return Err(DispatchFailure::new(
                    FailureKind::ConnectionError,
                    format!("no endpoint registered under '{}'", endpoint_name),
                    0,
                ));
            }
        };

        let url = endpoint.url_for(operation);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(endpoint, operation, &url, attempt));
            }

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.cancelled(endpoint, operation, &url, attempt + 1));
                }
                result = self.try_call(client, endpoint, &url, method.clone(), body) => result,
            };

            let error = match result {
                Ok(call) => {
                    self.record(endpoint, operation, attempt, "success", call.latency);
                    debug!(
                        endpoint = %endpoint.name(),
                        operation,
                        attempt,
                        status = call.status,
                        latency_ms = call.latency.as_millis() as u64,
                        "Dispatch attempt succeeded"
                    );
                    return Ok(parse_body(&call.body));
                }
                Err(error) => error,
            };

            self.record(endpoint, operation, attempt, error.kind().as_str(), started.elapsed());

            match next_step(endpoint, attempt, error.clone()) {
                RetryStep::Fail(failure) => {
                    warn!(
                        endpoint = %endpoint.name(),
                        operation,
                        url = %url,
                        attempts = failure.attempts,
                        outcome = %failure.kind,
                        "Dispatch failed: {}",
                        failure.message
                    );
                    return Err(failure);
                }
                RetryStep::Retry { next_attempt, after } => {
                    warn!(
                        endpoint = %endpoint.name(),
                        operation,
                        url = %url,
                        attempt = attempt + 1,
                        max_attempts = endpoint.max_attempts(),
                        outcome = %error.kind(),
                        "Dispatch attempt failed, retrying after {:?}",
                        after
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(self.cancelled(endpoint, operation, &url, attempt + 1));
                        }
                        _ = sleep(after) => {}
                    }
                    attempt = next_attempt;
                }
            }
        }
    }

    /// Single attempt, no retry
    async fn try_call(
        &self,
        client: &Client,
        endpoint: &ServiceEndpoint,
        url: &str,
        method: Method,
        body: Option<&Value>,
    ) -> std::result::Result<CallResult, AttemptError> {
        let mut request = client.request(method, url).timeout(endpoint.read_timeout());
        if let Some(body) = body {
            request = request.json(body);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| classify(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| classify(&e))?;
        let latency = started.elapsed();

        if !status.is_success() {
            return Err(AttemptError::Status {
                code: status.as_u16(),
                body: text,
            });
        }

        // A 2xx body that is not JSON is treated like a broken connection
        if !text.trim().is_empty() {
            if let Err(e) = serde_json::from_str::<Value>(&text) {
                return Err(AttemptError::Connection(format!(
                    "invalid JSON in response body: {}",
                    e
                )));
            }
        }

        Ok(CallResult {
            status: status.as_u16(),
            body: text,
            latency,
        })
    }

    fn cancelled(
        &self,
        endpoint: &ServiceEndpoint,
        operation: &str,
        url: &str,
        attempts: u32,
    ) -> DispatchFailure {
        self.record(endpoint, operation, attempts.saturating_sub(1), "cancelled", Duration::ZERO);
        debug!(endpoint = %endpoint.name(), operation, url, attempts, "Dispatch cancelled");
        DispatchFailure::new(
            FailureKind::Cancelled,
            format!("call to {} cancelled by caller", url),
            attempts,
        )
    }

    fn record(&self, endpoint: &ServiceEndpoint, operation: &str, attempt: u32, outcome: &str, elapsed: Duration) {
        debug!(
            endpoint = %endpoint.name(),
            operation,
            attempt,
            outcome,
            "Dispatch attempt finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_attempt(endpoint.name(), operation, outcome, elapsed);
        }
    }
}

fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).unwrap_or(Value::Null)
    }
}
