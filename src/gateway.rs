//! Gateway service: health aggregation and pass-through to downstreams
//!
//! Routes:
//! - `GET /health` - the gateway's own liveness
//! - `GET /services/status` - aggregated downstream health
//! - `GET /services/{name}/health` - one downstream's probe result
//! - `GET /{service}/health` - raw pass-through of a downstream's `/health`
//! - `POST /{service}/{operation}` - forward a JSON body to a downstream
//! - `GET /metrics` - Prometheus metrics

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchFailure, FailureKind};
use crate::health_check::HealthAggregator;
use crate::metrics::MeshMetrics;
use crate::server::{
    detail_response, json_response, not_found, response, status_from_code, Handler, HttpResponse,
    DEFAULT_MAX_BODY_BYTES,
};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::{Method, StatusCode};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Front door of the mesh
pub struct Gateway {
    dispatcher: Dispatcher,
    health: HealthAggregator,
    metrics: MeshMetrics,
    max_body_bytes: usize,
}

impl Gateway {
    pub fn new(dispatcher: Dispatcher, metrics: MeshMetrics) -> Self {
        Gateway {
            health: HealthAggregator::new(dispatcher.clone()),
            dispatcher,
            metrics,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Cap on accepted request bodies
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Route one request
    pub async fn handle(
        &self,
        method: &Method,
        path: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> HttpResponse {
        let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        match (method, segments.as_slice()) {
            (&Method::GET, ["health"]) => json_response(
                StatusCode::OK,
                &json!({
                    "status": "healthy",
                    "service": "gateway",
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            ),
            (&Method::GET, ["metrics"]) => {
                response(StatusCode::OK, "text/plain; version=0.0.4", self.metrics.render())
            }
            (&Method::GET, ["services", "status"]) => {
                let report = self.health.check_all().await;
                json_response(StatusCode::OK, &report)
            }
            (&Method::GET, ["services", name, "health"]) => match self.health.check_one(name).await {
                Some(entry) => json_response(StatusCode::OK, &entry),
                None => detail_response(StatusCode::NOT_FOUND, format!("Unknown service '{}'", name)),
            },
            (&Method::GET, [service, "health"]) => {
                self.forward(service, "health", Method::GET, None, cancel).await
            }
            (&Method::POST, [service, operation @ ..]) if !operation.is_empty() => {
                let payload = match parse_payload(&body) {
                    Ok(payload) => payload,
                    Err(message) => return detail_response(StatusCode::BAD_REQUEST, message),
                };
                let operation = operation.join("/");
                self.forward(service, &operation, Method::POST, payload.as_ref(), cancel)
                    .await
            }
            _ => not_found(),
        }
    }

    async fn forward(
        &self,
        service: &str,
        operation: &str,
        method: Method,
        payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> HttpResponse {
        if self.dispatcher.registry().get(service).is_none() {
            return detail_response(StatusCode::NOT_FOUND, format!("Unknown service '{}'", service));
        }

        match self
            .dispatcher
            .call_with_cancel(service, operation, method, payload, cancel)
            .await
        {
            Ok(body) => {
                info!(service, operation, "Forwarded request");
                json_response(StatusCode::OK, &body)
            }
            Err(failure) => {
                warn!(service, operation, kind = %failure.kind, "Forwarded request failed");
                json_response(
                    status_from_code(failure.to_http_status()),
                    &json!({ "detail": failure_detail(&failure) }),
                )
            }
        }
    }
}

/// Detail for a failed forward; a downstream's own `{"detail": ...}` is passed through
fn failure_detail(failure: &DispatchFailure) -> Value {
    if let FailureKind::UpstreamStatus(_) = failure.kind {
        if let Ok(Value::Object(mut body)) = serde_json::from_str::<Value>(&failure.message) {
            if let Some(detail) = body.remove("detail") {
                return detail;
            }
        }
    }
    Value::String(failure.message.clone())
}

/// Empty body means no payload; anything else must be JSON
fn parse_payload(body: &Bytes) -> Result<Option<Value>, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| format!("Invalid JSON body: {}", e))
}

#[async_trait]
impl Handler for Gateway {
    async fn route(
        &self,
        method: &Method,
        path: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> HttpResponse {
        self.handle(method, path, body, cancel).await
    }

    fn describe_routes(&self) -> Vec<&'static str> {
        vec![
            "GET  /health",
            "GET  /services/status",
            "GET  /services/{name}/health",
            "GET  /{service}/health",
            "POST /{service}/{operation}",
            "GET  /metrics",
        ]
    }

    fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}
