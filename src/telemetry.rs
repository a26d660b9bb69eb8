//! Structured events emitted by the executor.
//!
//! Every outer call reports what happened to a [`TelemetrySink`]: reconnects performed by fixup
//! mode, each retry, and the terminal outcome. Sinks are plain `tower::Service<ExecutionEvent>`s so
//! they compose with standard tower combinators. Emission is best effort: a sink that is not ready
//! or that fails never affects the call being observed.

use crate::mode::Mode;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// Events emitted during one outer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// An attempt failed and another one is about to start.
    Retry {
        /// Failed attempts so far (1-indexed).
        attempt: usize,
        /// Attempt ceiling.
        max_attempts: usize,
        /// Pause before the next attempt.
        delay: Duration,
        /// Rendered failure of the attempt.
        error: String,
    },
    /// Fixup mode found the handle disconnected and reconnected for a second invocation.
    Reconnected { mode: Mode },
    /// The call succeeded.
    Succeeded { failed_attempts: usize },
    /// The attempt ceiling was reached.
    Exhausted { attempts: usize },
    /// The retry predicate declined or failed.
    Rejected { attempts: usize },
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionEvent::Retry { attempt, max_attempts, delay, error } => {
                write!(f, "Retry(#{}/{}, delay={:?}, error={})", attempt, max_attempts, delay, error)
            }
            ExecutionEvent::Reconnected { mode } => write!(f, "Reconnected(mode={})", mode),
            ExecutionEvent::Succeeded { failed_attempts } => {
                write!(f, "Succeeded(failed_attempts={})", failed_attempts)
            }
            ExecutionEvent::Exhausted { attempts } => write!(f, "Exhausted(attempts={})", attempts),
            ExecutionEvent::Rejected { attempts } => write!(f, "Rejected(attempts={})", attempts),
        }
    }
}

/// A sink that consumes execution events.
pub trait TelemetrySink:
    Service<ExecutionEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + Sync + 'static;
}

/// Send `event` to `sink` if it becomes ready; errors are dropped.
pub async fn emit_best_effort<S>(sink: S, event: ExecutionEvent)
where
    S: Service<ExecutionEvent, Response = ()> + Send,
    S::Future: Send,
{
    use tower::ServiceExt;

    if let Ok(mut ready) = sink.ready_oneshot().await {
        let _ = ready.call(event).await;
    }
}

/// Discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<ExecutionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = futures::future::Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: ExecutionEvent) -> Self::Future {
        futures::future::ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<ExecutionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = futures::future::Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ExecutionEvent) -> Self::Future {
        tracing::info!(event = %event, "execution_event");
        futures::future::ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory, evicting the oldest beyond capacity.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(1_024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<ExecutionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = futures::future::Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ExecutionEvent) -> Self::Future {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.capacity {
            events.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push(event);
        futures::future::ready(Ok(()))
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
