use super::*;
use crate::failure::{ErrorKind, FailureSignal};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

fn scripted(failures: Vec<FailureSignal>) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<&'static str, FailureSignal>>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
        std::future::ready(match failures.get(n) {
            Some(signal) => Err(signal.clone()),
            None => Ok("done"),
        })
    };
    (calls, op)
}

#[test]
fn test_default_policy_values() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts(), 3);
    assert_eq!(policy.initial_delay(), Duration::from_secs(1));
    assert_eq!(policy.backoff_multiplier(), 2.0);
    assert_eq!(policy.max_delay(), Duration::from_secs(60));
}

#[test]
fn test_delays_double_and_cap() {
    let policy = RetryPolicy::new(6, Duration::from_secs(10), 2.0, Duration::from_secs(30))
        .expect("valid policy");
    assert_eq!(
        policy.delays(),
        vec![
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(30),
            Duration::from_secs(30),
            Duration::from_secs(30),
        ]
    );
}

#[test]
fn test_invalid_policies_are_rejected() {
    assert_eq!(
        RetryPolicy::new(0, Duration::from_secs(1), 2.0, Duration::from_secs(60)),
        Err(PolicyError::NoAttempts)
    );
    assert!(matches!(
        RetryPolicy::new(3, Duration::from_secs(1), 0.5, Duration::from_secs(60)),
        Err(PolicyError::InvalidMultiplier(_))
    ));
    assert!(matches!(
        RetryPolicy::new(3, Duration::from_secs(90), 2.0, Duration::from_secs(60)),
        Err(PolicyError::DelayOutOfRange { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success_sleeps_backoff_sum() {
    let policy = RetryPolicy::default();
    let (calls, op) = scripted(vec![
        FailureSignal::Throttled("throttled".into()),
        FailureSignal::ServiceUnavailable("503".into()),
    ]);

    let start = Instant::now();
    let result = execute(&policy, op).await;

    assert_eq!(result, Ok("done"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_makes_exactly_one_attempt() {
    let policy = RetryPolicy::new(10, Duration::from_secs(1), 2.0, Duration::from_secs(60))
        .expect("valid policy");
    let (calls, op) = scripted(vec![FailureSignal::InvalidCredentials("bad key".into())]);

    let start = Instant::now();
    let err = execute(&policy, op).await.expect_err("should fail");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.attempts, 1);
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_failure_is_not_retried() {
    let policy = RetryPolicy::default();
    let (calls, op) = scripted(vec![FailureSignal::ToolUnreachable("spawn failed".into())]);

    let err = execute(&policy, op).await.expect_err("should fail");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.kind(), ErrorKind::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attempts_return_last_failure_without_trailing_delay() {
    let policy = RetryPolicy::default();
    let (calls, op) = scripted(vec![
        FailureSignal::Throttled("1".into()),
        FailureSignal::Throttled("2".into()),
        FailureSignal::Throttled("3".into()),
    ]);

    let start = Instant::now();
    let err = execute(&policy, op).await.expect_err("should exhaust");

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.attempts, 3);
    assert_eq!(err.detail, "3");
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_observer_sees_every_failed_attempt() {
    let policy = RetryPolicy::default();
    let (_calls, op) = scripted(vec![
        FailureSignal::Throttled("a".into()),
        FailureSignal::Throttled("b".into()),
        FailureSignal::Throttled("c".into()),
    ]);

    let mut seen = Vec::new();
    let result = execute_with_observer(&policy, op, |attempt| seen.push(attempt.clone())).await;

    assert!(result.is_err());
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].next_delay, Some(Duration::from_secs(1)));
    assert_eq!(seen[1].next_delay, Some(Duration::from_secs(2)));
    assert_eq!(seen[2].next_delay, None);
    assert_eq!(seen[2].attempt, 3);
}
