//! Convenient re-exports for common secondwind types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    boundary::Boundary,
    config::{ExecutorConfig, DEFAULT_MAX_ATTEMPTS},
    connector::Connector,
    context::{ExceptionStack, RetryContext, RetryPredicate},
    error::{BuildError, Failure, FailureKind},
    executor::{RetryExecutor, RetryExecutorBuilder},
    jitter::Jitter,
    mode::Mode,
    telemetry::{ExecutionEvent, TelemetrySink},
};
pub use futures::future::BoxFuture;
