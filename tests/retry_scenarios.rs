mod common;

use common::test_helpers::{fail_times, memory_executor, unit};
use secondwind::memory::{MemoryConnector, MemoryError};
use secondwind::{Failure, FailureKind, Mode, RetryExecutor, RetryPredicate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn deadlock_twice_then_success() {
    let mut executor = memory_executor(3);
    let calls = Arc::new(AtomicUsize::new(0));

    let result = executor.run(fail_times(calls.clone(), 2, "deadlock")).await;

    assert_eq!(result, Ok(2));
    assert_eq!(executor.exception_stack().len(), 2);
    assert_eq!(executor.attempt_count(), 2);
    assert!(executor
        .exception_stack()
        .iter()
        .all(|f| f == &Failure::Operation(MemoryError::Query("deadlock".into()))));
}

#[tokio::test]
async fn syntax_error_surfaces_unchanged_after_exhaustion() {
    let mut executor = memory_executor(2);
    let calls = Arc::new(AtomicUsize::new(0));

    let err = executor.run(fail_times(calls.clone(), usize::MAX, "syntax error")).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Operation);
    assert_eq!(err.to_string(), "syntax error");
    assert_eq!(executor.exception_stack().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn predicate_can_classify_by_error() {
    let mut executor = memory_executor(10);
    executor.set_retry_predicate(|ctx| {
        ctx.last_exception()
            .map(|f| matches!(f.error(), MemoryError::Query(msg) if msg.contains("deadlock")))
            .unwrap_or(false)
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let ok = executor.run(fail_times(calls.clone(), 3, "deadlock detected")).await;
    assert_eq!(ok, Ok(3));

    calls.store(0, Ordering::SeqCst);
    let err = executor.run(fail_times(calls.clone(), 3, "syntax error")).await.unwrap_err();
    assert_eq!(err.to_string(), "syntax error");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.exception_stack().len(), 1);
}

#[tokio::test]
async fn deadline_predicate_cuts_off_retries() {
    let deadline = Instant::now() + Duration::from_millis(50);
    let mut executor = RetryExecutor::builder(MemoryConnector::new())
        .max_attempts(1_000)
        .fallible_retry_predicate(move |_| {
            if Instant::now() < deadline {
                Ok(true)
            } else {
                Err(MemoryError::Query("deadline exceeded".into()))
            }
        })
        .build()
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let err = executor
        .run(unit(move |_h| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err::<(), _>(MemoryError::Query("lock timeout".into()))
            })
        }))
        .await
        .unwrap_err();

    assert_eq!(err, Failure::Predicate(MemoryError::Query("deadline exceeded".into())));
    assert!(calls.load(Ordering::SeqCst) < 1_000);
    assert_eq!(executor.attempt_count(), calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn checked_mode_recovers_a_connection_dropped_between_calls() {
    let mut executor = memory_executor(3);
    let link = executor.connector().link();

    executor.run(unit(|h| Box::pin(async move { h.put("a", "1") }))).await.unwrap();
    link.disconnect();

    let value = executor.run(unit(|h| Box::pin(async move { h.get("a") }))).await.unwrap();
    assert_eq!(value.as_deref(), Some("1"));
    assert_eq!(executor.attempt_count(), 0);
    assert_eq!(link.connections(), 2);
}

#[tokio::test]
async fn unchecked_mode_retries_on_the_dead_handle() {
    let mut executor = memory_executor(3);
    let link = executor.connector().link();
    executor.run(unit(|h| Box::pin(async move { h.put("a", "1") }))).await.unwrap();
    link.disconnect();

    let err = executor
        .run_with_mode(Mode::Unchecked, unit(|h| Box::pin(async move { h.get("a") })))
        .await
        .unwrap_err();

    assert_eq!(err, Failure::Operation(MemoryError::Disconnected));
    assert_eq!(executor.exception_stack().len(), 3);
    assert_eq!(link.connections(), 1, "unchecked never reconnects");
}

#[tokio::test]
async fn refused_connections_are_recorded_as_connect_failures() {
    let mut executor = memory_executor(4);
    let link = executor.connector().link();
    link.refuse_connections(2);

    let calls = Arc::new(AtomicUsize::new(0));
    let result = executor.run(fail_times(calls.clone(), 0, "unused")).await;

    assert_eq!(result, Ok(0));
    assert_eq!(executor.attempt_count(), 2);
    assert!(executor.exception_stack().iter().all(Failure::is_connect));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fixup_rides_out_a_single_drop_per_attempt() {
    let mut executor = memory_executor(2);
    executor.set_default_mode(Mode::Fixup);
    let link = executor.connector().link();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let written = executor
        .txn(unit(move |h| {
            let link = link.clone();
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                h.put("order:7", "paid")?;
                if n == 0 {
                    link.disconnect();
                }
                h.get("order:7")
            })
        }))
        .await
        .unwrap();

    assert_eq!(written.as_deref(), Some("paid"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(executor.exception_stack().is_empty());
    assert_eq!(executor.connector().link().committed("order:7").as_deref(), Some("paid"));
}

#[tokio::test]
async fn override_does_not_leak_into_the_next_call() {
    let mut executor = memory_executor(2);
    let link = executor.connector().link();
    executor.run(unit(|h| Box::pin(async move { h.put("a", "1") }))).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    executor
        .run_with_mode(Mode::Unchecked, fail_times(calls.clone(), usize::MAX, "boom"))
        .await
        .unwrap_err();
    assert_eq!(executor.mode(), Mode::Checked);

    link.disconnect();
    let value = executor.run(unit(|h| Box::pin(async move { h.get("a") }))).await.unwrap();
    assert_eq!(value.as_deref(), Some("1"), "checked mode is back in effect");
}

#[tokio::test]
async fn per_call_predicate_via_execute_with() {
    let mut executor = memory_executor(5);
    let calls = Arc::new(AtomicUsize::new(0));

    let err = executor
        .execute_with(
            Some(Mode::Checked),
            secondwind::Boundary::Bare,
            RetryPredicate::new(|ctx| ctx.attempt_count() < 2),
            fail_times(calls.clone(), usize::MAX, "busy"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "busy");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
