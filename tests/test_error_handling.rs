// Unit tests for failure classification and the retry decision

use std::time::Duration;
use text_mesh::dispatcher::{next_step, AttemptError, RetryStep};
use text_mesh::{DispatchFailure, FailureKind, MeshError, ServiceEndpoint};

fn endpoint(max_retries: u32) -> ServiceEndpoint {
    ServiceEndpoint::new(
        "sentiment",
        "http://localhost:8002",
        Duration::from_secs(5),
        Duration::from_secs(30),
        max_retries,
        Duration::from_millis(100),
    )
    .unwrap()
}

#[test]
fn test_every_failure_is_retried_until_the_last_attempt() {
    let ep = endpoint(3);
    let errors = [
        AttemptError::Timeout("read timed out".to_string()),
        AttemptError::Status { code: 404, body: "missing".to_string() },
        AttemptError::Status { code: 503, body: "busy".to_string() },
        AttemptError::Connection("refused".to_string()),
    ];

    for error in errors {
        for attempt in 0..3 {
            match next_step(&ep, attempt, error.clone()) {
                RetryStep::Retry { next_attempt, .. } => assert_eq!(next_attempt, attempt + 1),
                RetryStep::Fail(f) => panic!("attempt {} of {:?} should retry, got {}", attempt, error, f),
            }
        }
        assert!(matches!(next_step(&ep, 3, error), RetryStep::Fail(_)));
    }
}

#[test]
fn test_backoff_doubles() {
    let ep = endpoint(3);
    let delays: Vec<Duration> = (0..3)
        .map(|attempt| match next_step(&ep, attempt, AttemptError::Connection("x".into())) {
            RetryStep::Retry { after, .. } => after,
            RetryStep::Fail(_) => unreachable!(),
        })
        .collect();

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]
    );
}

#[test]
fn test_final_timeout_is_retries_exhausted() {
    let ep = endpoint(2);
    match next_step(&ep, 2, AttemptError::Timeout("read timed out".into())) {
        RetryStep::Fail(failure) => {
            assert_eq!(failure.kind, FailureKind::RetriesExhausted);
            assert_eq!(failure.attempts, 3);
            assert!(failure.message.starts_with("timeout:"));
            assert_eq!(failure.to_http_status(), 503);
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_final_status_keeps_code_and_body() {
    let ep = endpoint(0);
    match next_step(&ep, 0, AttemptError::Status { code: 500, body: "boom".into() }) {
        RetryStep::Fail(failure) => {
            assert_eq!(failure, DispatchFailure::new(FailureKind::UpstreamStatus(500), "boom", 1));
            assert_eq!(failure.to_http_status(), 502);
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_final_connection_error() {
    let ep = endpoint(1);
    match next_step(&ep, 1, AttemptError::Connection("refused".into())) {
        RetryStep::Fail(failure) => {
            assert_eq!(failure.kind, FailureKind::ConnectionError);
            assert_eq!(failure.attempts, 2);
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_failure_kind_statuses() {
    assert_eq!(FailureKind::Timeout.to_http_status(), 504);
    assert_eq!(FailureKind::UpstreamStatus(404).to_http_status(), 502);
    assert_eq!(FailureKind::ConnectionError.to_http_status(), 503);
    assert_eq!(FailureKind::RetriesExhausted.to_http_status(), 503);
    assert_eq!(FailureKind::Cancelled.to_http_status(), 499);
}

#[test]
fn test_mesh_error_display() {
    let err = MeshError::ConfigError("bad".to_string());
    assert_eq!(err.to_string(), "Configuration error: bad");
    assert_eq!(err.to_http_status(), 500);

    let io: MeshError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(io, MeshError::IoError(_)));
}
