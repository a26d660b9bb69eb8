#![allow(dead_code)]

use futures::future::BoxFuture;
use secondwind::memory::{MemoryConnector, MemoryError, MemoryHandle};
use secondwind::{InstantSleeper, RetryExecutor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pin down the higher-ranked signature of a unit of work over `MemoryHandle`.
pub fn unit<T, F>(f: F) -> F
where
    F: for<'h> FnMut(&'h mut MemoryHandle) -> BoxFuture<'h, Result<T, MemoryError>> + Send,
{
    f
}

/// Executor over a fresh in-memory store that never actually sleeps.
pub fn memory_executor(max_attempts: usize) -> RetryExecutor<MemoryConnector> {
    RetryExecutor::builder(MemoryConnector::new())
        .max_attempts(max_attempts)
        .with_sleeper(InstantSleeper)
        .build()
        .expect("valid executor settings")
}

/// Fails with `message` on the first `failures` invocations, then returns the invocation index.
pub fn fail_times(
    calls: Arc<AtomicUsize>,
    failures: usize,
    message: &'static str,
) -> impl for<'h> FnMut(&'h mut MemoryHandle) -> BoxFuture<'h, Result<usize, MemoryError>> + Send {
    unit(move |_h| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if n < failures {
                Err(MemoryError::Query(message.to_string()))
            } else {
                Ok(n)
            }
        })
    })
}
