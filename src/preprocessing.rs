//! Preprocessing service: cached text transforms over HTTP
//!
//! Every transform goes through one [`CachingExecutor`]; each operation has
//! its own tiered cache and counters. Texts longer than the offload threshold
//! are computed on the blocking worker pool.

use crate::caching_executor::CachingExecutor;
use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::metrics::MeshMetrics;
use crate::models::{
    CleanedTextResponse, FullPreprocessResponse, NormalizedTextResponse, TextOptions, TextRequest,
    TokenizedTextResponse,
};
use crate::server::{
    detail_response, json_response, not_found, response, status_from_code, Handler, HttpResponse,
    DEFAULT_MAX_BODY_BYTES,
};
use crate::shared_store::SharedStore;
use crate::text::{self, TransformOutput};
use crate::tiered_cache::CacheSwitch;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Operations with their own cache
pub const OPERATIONS: [&str; 3] = ["clean", "tokenize", "normalize"];

type Transform = fn(&str, &TextOptions) -> TransformOutput;

/// Text preprocessing backend
pub struct PreprocessingService {
    executor: CachingExecutor<TransformOutput>,
    offload_threshold_chars: usize,
    metrics: MeshMetrics,
    max_body_bytes: usize,
}

impl PreprocessingService {
    pub fn new(
        executor: CachingExecutor<TransformOutput>,
        offload_threshold_chars: usize,
        metrics: MeshMetrics,
    ) -> Self {
        PreprocessingService {
            executor,
            offload_threshold_chars,
            metrics,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Cap on accepted request bodies
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Build the service and its per-operation caches from configuration
    pub fn from_config(
        config: &MeshConfig,
        shared: Option<Arc<dyn SharedStore>>,
        switch: CacheSwitch,
        metrics: MeshMetrics,
    ) -> Self {
        let executor = CachingExecutor::from_config(
            &OPERATIONS,
            &config.cache,
            shared,
            switch,
            config.preprocessing.max_blocking_tasks,
            Some(metrics.clone()),
        );
        Self::new(executor, config.preprocessing.offload_threshold_chars, metrics)
            .with_max_body_bytes(config.preprocessing.max_body_bytes)
    }

    pub fn executor(&self) -> &CachingExecutor<TransformOutput> {
        &self.executor
    }

    pub async fn clean(&self, request: &TextRequest) -> Result<CleanedTextResponse> {
        request.validate()?;
        match self.run("clean", &request.text, &request.options, text::clean_output).await? {
            TransformOutput::Cleaned { text, operations } => Ok(CleanedTextResponse {
                original_text: request.text.clone(),
                cleaned_text: text,
                operations_applied: operations,
            }),
            other => Err(unexpected("clean", &other)),
        }
    }

    pub async fn tokenize(&self, request: &TextRequest) -> Result<TokenizedTextResponse> {
        request.validate()?;
        let tokens = self.tokens(&request.text, &request.options).await?;
        Ok(TokenizedTextResponse {
            original_text: request.text.clone(),
            token_count: tokens.len(),
            tokens,
        })
    }

    pub async fn normalize(&self, request: &TextRequest) -> Result<NormalizedTextResponse> {
        request.validate()?;
        let (normalized, operations) = self.normalized(&request.text, &request.options).await?;
        Ok(NormalizedTextResponse {
            original_text: request.text.clone(),
            normalized_text: normalized,
            operations_applied: operations,
        })
    }

    /// clean, then normalize, then tokenize; each step uses its own cache
    pub async fn full_preprocess(&self, request: &TextRequest) -> Result<FullPreprocessResponse> {
        request.validate()?;
        let cleaned = self.clean(request).await?;

        let (normalized, normalize_ops) =
            self.normalized(&cleaned.cleaned_text, &request.options).await?;
        let tokens = self.tokens(&normalized, &request.options).await?;

        let mut operations = cleaned.operations_applied;
        operations.extend(normalize_ops);
        operations.push("tokenized".to_string());

        Ok(FullPreprocessResponse {
            original_text: request.text.clone(),
            cleaned_text: cleaned.cleaned_text,
            normalized_text: normalized,
            token_count: tokens.len(),
            tokens,
            operations_applied: operations,
        })
    }

    /// `/cache/stats` body
    pub fn cache_stats(&self) -> Value {
        let mut body = Map::new();
        body.insert("enabled".to_string(), json!(self.executor.switch().is_enabled()));
        for (operation, stats) in self.executor.stats() {
            body.insert(operation, json!(stats));
        }
        Value::Object(body)
    }

    async fn tokens(&self, text: &str, options: &TextOptions) -> Result<Vec<String>> {
        match self.run("tokenize", text, options, text::tokenize_output).await? {
            TransformOutput::Tokens(tokens) => Ok(tokens),
            other => Err(unexpected("tokenize", &other)),
        }
    }

    async fn normalized(&self, text: &str, options: &TextOptions) -> Result<(String, Vec<String>)> {
        match self.run("normalize", text, options, text::normalize_output).await? {
            TransformOutput::Normalized { text, operations } => Ok((text, operations)),
            other => Err(unexpected("normalize", &other)),
        }
    }

    async fn run(
        &self,
        operation: &str,
        text: &str,
        options: &TextOptions,
        transform: Transform,
    ) -> Result<TransformOutput> {
        let started = Instant::now();
        let length = text.chars().count();

        let output = if length > self.offload_threshold_chars {
            self.executor
                .execute_offloaded(operation, text, options, transform)
                .await?
        } else {
            self.executor.execute(operation, text, options, transform).await
        };

        info!(
            operation,
            text_length = length,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Text operation completed"
        );
        Ok(output)
    }

    /// Route one request
    pub async fn handle(&self, method: &Method, path: &str, body: Bytes) -> HttpResponse {
        match (method, path) {
            (&Method::GET, "/health") => json_response(
                StatusCode::OK,
                &json!({"status": "healthy", "service": "preprocessing"}),
            ),
            (&Method::GET, "/ready") => json_response(
                StatusCode::OK,
                &json!({"status": "ready", "service": "preprocessing"}),
            ),
            (&Method::GET, "/cache/stats") => json_response(StatusCode::OK, &self.cache_stats()),
            (&Method::GET, "/metrics") => {
                response(StatusCode::OK, "text/plain; version=0.0.4", self.metrics.render())
            }
            (&Method::POST, "/clean") => {
                with_request(&body, |request| async move { self.clean(&request).await }).await
            }
            (&Method::POST, "/tokenize") => {
                with_request(&body, |request| async move { self.tokenize(&request).await }).await
            }
            (&Method::POST, "/normalize") => {
                with_request(&body, |request| async move { self.normalize(&request).await }).await
            }
            (&Method::POST, "/full-preprocess") => {
                with_request(&body, |request| async move { self.full_preprocess(&request).await })
                    .await
            }
            _ => not_found(),
        }
    }
}

/// Decode a [`TextRequest`], run `operation` and render its result
async fn with_request<T, F, Fut>(body: &Bytes, operation: F) -> HttpResponse
where
    T: Serialize,
    F: FnOnce(TextRequest) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let request: TextRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            return detail_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Invalid request body: {}", e),
            )
        }
    };

    match operation(request).await {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(e) => {
            if !matches!(e, MeshError::Validation(_)) {
                error!("Text operation failed: {}", e);
            }
            detail_response(status_from_code(e.to_http_status()), e.to_string())
        }
    }
}

fn unexpected(operation: &str, output: &TransformOutput) -> MeshError {
    MeshError::InternalError(format!(
        "operation '{}' produced an unexpected result: {:?}",
        operation, output
    ))
}

#[async_trait]
impl Handler for PreprocessingService {
    async fn route(
        &self,
        method: &Method,
        path: &str,
        body: Bytes,
        _cancel: &CancellationToken,
    ) -> HttpResponse {
        self.handle(method, path, body).await
    }

    fn describe_routes(&self) -> Vec<&'static str> {
        vec![
            "POST /clean",
            "POST /tokenize",
            "POST /normalize",
            "POST /full-preprocess",
            "GET  /health",
            "GET  /ready",
            "GET  /cache/stats",
            "GET  /metrics",
        ]
    }

    fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}
