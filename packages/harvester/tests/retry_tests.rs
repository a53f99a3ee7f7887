//! Retry policy around whole harvest attempts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use harvester::{CancelSignal, HarvestError, RetryExecutor};

fn executor() -> RetryExecutor {
    RetryExecutor::new(3, Duration::from_millis(1))
}

#[tokio::test]
async fn succeeds_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let result = executor()
        .run(&CancelSignal::new(), |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(HarvestError::step("navigate", "stale element"))
                } else {
                    Ok(call)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_after_exactly_three_invocations() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = executor()
        .run(&CancelSignal::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HarvestError::step("navigate", "stale element")) }
        })
        .await;

    assert!(matches!(
        result,
        Err(HarvestError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn attempt_numbers_are_passed_through() {
    let seen = std::sync::Mutex::new(Vec::new());
    let _: Result<(), _> = executor()
        .run(&CancelSignal::new(), |attempt| {
            seen.lock().unwrap().push(attempt);
            async { Err(HarvestError::step("navigate", "stale element")) }
        })
        .await;

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn cancellation_is_never_retried() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = executor()
        .run(&CancelSignal::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HarvestError::Cancelled) }
        })
        .await;

    assert!(matches!(result, Err(HarvestError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn authentication_failures_short_circuit() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = executor()
        .run(&CancelSignal::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HarvestError::Authentication("credential rejected".into())) }
        })
        .await;

    assert!(matches!(result, Err(HarvestError::Authentication(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn backoff_sleep_observes_cancellation() {
    // A long base delay would stall the test if the sleep ignored the signal.
    let executor = RetryExecutor::new(3, Duration::from_secs(3600));
    let cancel = CancelSignal::new();
    cancel.cancel();

    let calls = AtomicU32::new(0);
    let result: Result<(), _> = executor
        .run(&cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HarvestError::step("navigate", "stale element")) }
        })
        .await;

    assert!(matches!(result, Err(HarvestError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
