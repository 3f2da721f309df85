//! Integration tests for the Dispatcher against mock downstreams

use http::Method;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use text_mesh::{Dispatcher, FailureKind, MeshMetrics, ServiceEndpoint, ServiceRegistry};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(base: &str, read_timeout: Duration, max_retries: u32, backoff: Duration) -> ServiceEndpoint {
    ServiceEndpoint::new(
        "backend",
        base,
        Duration::from_secs(1),
        read_timeout,
        max_retries,
        backoff,
    )
    .unwrap()
}

fn dispatcher(endpoint: ServiceEndpoint) -> Dispatcher {
    Dispatcher::new(ServiceRegistry::new(vec![endpoint]).unwrap()).unwrap()
}

/// Mount a handler that counts requests and answers with `template`
async fn counting_mock(server: &MockServer, http_method: &str, route: &str, template: ResponseTemplate) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();
    Mock::given(method(http_method))
        .and(path(route))
        .respond_with(move |_req: &wiremock::Request| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            template.clone()
        })
        .mount(server)
        .await;
    counter
}

#[tokio::test]
async fn test_timeout_retries_then_exhausted() {
    let server = MockServer::start().await;
    let counter = counting_mock(
        &server,
        "GET",
        "/health",
        ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
    )
    .await;

    let dispatcher = dispatcher(endpoint(&server.uri(), Duration::from_millis(100), 2, Duration::from_millis(1)));
    let failure = dispatcher
        .call("backend", "health", Method::GET, None)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert!(failure.message.starts_with("timeout"));
    assert_eq!(failure.attempts, 3);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(failure.to_http_status(), 503);
}

#[tokio::test]
async fn test_fail_once_then_succeed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .and(body_json(serde_json::json!({"text": "hi"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"cleaned_text": "hi"})))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(endpoint(&server.uri(), Duration::from_secs(2), 3, Duration::from_millis(1)));
    let payload = serde_json::json!({"text": "hi"});
    let body = dispatcher
        .call("backend", "clean", Method::POST, Some(&payload))
        .await
        .unwrap();

    assert_eq!(body["cleaned_text"], "hi");
    // Expectations (exactly one call each) are verified when the server drops
}

#[tokio::test]
async fn test_connection_refused() {
    // Grab a free port, then close it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dispatcher = dispatcher(endpoint(
        &format!("http://127.0.0.1:{}", port),
        Duration::from_secs(1),
        1,
        Duration::from_millis(1),
    ));
    let failure = dispatcher
        .call("backend", "health", Method::GET, None)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::ConnectionError);
    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.to_http_status(), 503);
}

#[tokio::test]
async fn test_non_json_success_body_is_retried() {
    let server = MockServer::start().await;
    let counter = counting_mock(&server, "GET", "/health", ResponseTemplate::new(200).set_body_string("<html>")).await;

    let dispatcher = dispatcher(endpoint(&server.uri(), Duration::from_secs(1), 1, Duration::from_millis(1)));
    let failure = dispatcher
        .call("backend", "health", Method::GET, None)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::ConnectionError);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_success_body_is_null() {
    let server = MockServer::start().await;
    counting_mock(&server, "POST", "/purge", ResponseTemplate::new(204)).await;

    let dispatcher = dispatcher(endpoint(&server.uri(), Duration::from_secs(1), 0, Duration::ZERO));
    let body = dispatcher.call("backend", "purge", Method::POST, None).await.unwrap();
    assert!(body.is_null());
}

#[tokio::test]
async fn test_cancel_during_backoff() {
    let server = MockServer::start().await;
    let counter = counting_mock(&server, "GET", "/health", ResponseTemplate::new(503)).await;

    // Backoff far longer than the test
    let dispatcher = dispatcher(endpoint(&server.uri(), Duration::from_secs(1), 3, Duration::from_secs(30)));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let failure = dispatcher
        .call_with_cancel("backend", "health", Method::GET, None, &cancel)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.attempts, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_already_cancelled_makes_no_request() {
    let server = MockServer::start().await;
    let counter = counting_mock(&server, "GET", "/health", ResponseTemplate::new(200)).await;

    let dispatcher = dispatcher(endpoint(&server.uri(), Duration::from_secs(1), 0, Duration::ZERO));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = dispatcher
        .call_with_cancel("backend", "health", Method::GET, None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.attempts, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_backoff_is_exponential() {
    let server = MockServer::start().await;
    counting_mock(&server, "GET", "/health", ResponseTemplate::new(500)).await;

    // Sleeps of 50 + 100 + 200 ms before the last attempt
    let dispatcher = dispatcher(endpoint(&server.uri(), Duration::from_secs(1), 3, Duration::from_millis(50)));
    let started = Instant::now();
    let failure = dispatcher
        .call("backend", "health", Method::GET, None)
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 4);
    assert!(started.elapsed() >= Duration::from_millis(350));
}

#[tokio::test]
async fn test_each_attempt_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})))
        .mount(&server)
        .await;

    let metrics = MeshMetrics::new().unwrap();
    let dispatcher = dispatcher(endpoint(&server.uri(), Duration::from_secs(1), 3, Duration::from_millis(1)))
        .with_metrics(metrics.clone());

    dispatcher.call("backend", "health", Method::GET, None).await.unwrap();

    assert_eq!(metrics.attempts("backend", "health", "upstream_status"), 2);
    assert_eq!(metrics.attempts("backend", "health", "success"), 1);
}
