use std::time::Duration;

use vpsie_autoscaler::cloud::CloudError;
use vpsie_autoscaler::cloud::breaker::{CircuitBreaker, CircuitState};
use vpsie_autoscaler::cloud::limiter::RateLimiter;

/// The documented recovery cycle: Closed trips Open on sustained failures,
/// HalfOpen admits one probe after the timeout, and the probe's outcome
/// decides the next state.
#[tokio::test(start_paused = true)]
async fn test_breaker_full_recovery_cycle() {
    let breaker = CircuitBreaker::new(10, 4, 0.5, Duration::from_secs(30));

    // Healthy traffic
    for _ in 0..6 {
        breaker.record_success();
    }
    assert_eq!(breaker.state(), CircuitState::Closed);

    // A burst of failures crosses the ratio and trips the breaker
    for _ in 0..6 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.check(), "calls fail fast while Open");

    // Timeout elapses: exactly one probe is admitted
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(breaker.check());
    assert!(!breaker.check(), "second caller is still rejected");

    // Failed probe reopens; the next window grants another probe
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(breaker.check());

    // Successful probe closes and traffic flows again
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.check());
}

/// Burst behaviour: the bucket admits a full burst, rejects the next call at
/// a zero deadline, and serves it when the deadline allows a refill wait.
#[tokio::test(start_paused = true)]
async fn test_limiter_burst_then_refill() {
    let limiter = RateLimiter::new(60); // one token per second

    for _ in 0..60 {
        assert!(limiter.acquire(Duration::ZERO).await);
    }
    assert!(!limiter.acquire(Duration::ZERO).await);

    // With a generous deadline the call waits out the refill instead
    assert!(limiter.acquire(Duration::from_secs(3)).await);

    // Long idle refills to capacity, never beyond
    tokio::time::advance(Duration::from_secs(7200)).await;
    assert!(limiter.available().await <= 60.0);
}

/// Retry policy boundary: exactly the transient kinds are retryable.
#[test]
fn test_retry_classification_boundary() {
    let retryable = [
        CloudError::ServerError { status: 500 },
        CloudError::ServerError { status: 503 },
        CloudError::Timeout,
        CloudError::Transport("connection reset".to_string()),
    ];
    for err in &retryable {
        assert!(err.is_retryable(), "{err} must be retried");
    }

    let terminal = [
        CloudError::Unauthorized,
        CloudError::Forbidden,
        CloudError::NotFound,
        CloudError::RateLimited,
        CloudError::CircuitOpen,
        CloudError::ServerError { status: 404 },
        CloudError::Decode("truncated".to_string()),
    ];
    for err in &terminal {
        assert!(!err.is_retryable(), "{err} must not be retried");
    }
}

/// Metric labels for error kinds are stable strings operators can alert on.
#[test]
fn test_error_kind_labels() {
    let cases: [(CloudError, &str); 6] = [
        (CloudError::Unauthorized, "unauthorized"),
        (CloudError::RateLimited, "rate_limited"),
        (CloudError::ServerError { status: 502 }, "server_error"),
        (CloudError::CircuitOpen, "circuit_open"),
        (CloudError::Timeout, "timeout"),
        (CloudError::Transport("x".to_string()), "transport"),
    ];
    for (err, label) in cases {
        assert_eq!(err.kind(), label);
    }
}
