//! HTTP plumbing shared by the gateway and the preprocessing service
//!
//! Both services implement [`Handler`]; [`serve`] runs the hyper accept loop
//! until the shutdown token fires.

use crate::error::Result;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type HttpResponse = Response<Full<Bytes>>;

/// Request body cap when a handler does not set its own (1 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Routes one request to a response
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Answer `method path` with `body`
    ///
    /// `cancel` fires when the server shuts down; long waits should observe it.
    async fn route(
        &self,
        method: &Method,
        path: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> HttpResponse;

    /// Routes listed in the startup log
    fn describe_routes(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Larger request bodies are answered with 413 before routing
    fn max_body_bytes(&self) -> usize {
        DEFAULT_MAX_BODY_BYTES
    }
}

/// Build a response with the given content type
pub fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Serialize `body` as JSON
pub fn json_response(status: StatusCode, body: &impl Serialize) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => response(status, "application/json", bytes),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                r#"{"detail":"failed to serialize response"}"#,
            )
        }
    }
}

/// `{"detail": message}` error body
pub fn detail_response(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    json_response(status, &serde_json::json!({ "detail": message.into() }))
}

pub fn not_found() -> HttpResponse {
    detail_response(StatusCode::NOT_FOUND, "Not Found")
}

/// Status from a numeric code, falling back to 500 for out-of-range values
pub fn status_from_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Accept connections on `addr` until `shutdown` fires
///
/// # Arguments
/// * `name` - Service name for logs
/// * `addr` - Address to bind, e.g. "0.0.0.0:8000"
/// * `handler` - Request router
/// * `shutdown` - Stops accepting and cancels in-flight work
pub async fn serve<H: Handler>(
    name: &str,
    addr: SocketAddr,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(name, listener, handler, shutdown).await
}

/// Same as [`serve`] on an already bound listener
pub async fn serve_listener<H: Handler>(
    name: &str,
    listener: TcpListener,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("{} listening on http://{}", name, addr);
    for route in handler.describe_routes() {
        info!("  {}", route);
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("{} shutting down", name);
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };

        debug!(peer = %peer, "Accepted connection");
        let io = TokioIo::new(stream);
        let handler = handler.clone();
        let shutdown = shutdown.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let handler = handler.clone();
                let cancel = shutdown.child_token();
                async move { Ok::<_, Infallible>(dispatch(handler.as_ref(), req, &cancel).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection: {:?}", err);
            }
        });
    }
}

async fn dispatch<H: Handler>(
    handler: &H,
    req: Request<hyper::body::Incoming>,
    cancel: &CancellationToken,
) -> HttpResponse {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let limit = handler.max_body_bytes();
    let body = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            debug!(method = %method, path = %path, limit, "Request body too large");
            return detail_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("request body exceeds {} bytes", limit),
            );
        }
        Err(e) => {
            return detail_response(StatusCode::BAD_REQUEST, format!("failed to read body: {}", e));
        }
    };

    let response = handler.route(&method, &path, body, cancel).await;
    debug!(method = %method, path = %path, status = response.status().as_u16(), "Request served");
    response
}
