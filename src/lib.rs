#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # secondwind
//!
//! Retry-governed execution of units of work against a reconnectable database handle.
//!
//! ## Features
//!
//! - **Three connection modes**: unchecked, checked (ping before each attempt) and fixup
//!   (reconnect and run again only when a failure coincides with a dropped handle)
//! - **Attempt ceiling** with a per-call exception stack recording every failed attempt
//! - **Pluggable retry predicate**, fallible or not, replaceable per executor or per call
//! - **Transaction and savepoint boundaries** applied to every attempt
//! - **Backoff and jitter** between attempts, with injectable sleepers for tests
//! - **Execution events** delivered to `tower::Service` sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use secondwind::memory::MemoryConnector;
//! use secondwind::{Backoff, Mode, RetryExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut executor = RetryExecutor::builder(MemoryConnector::new())
//!         .max_attempts(3)
//!         .default_mode(Mode::Fixup)
//!         .backoff(Backoff::exponential(Duration::from_millis(10)))
//!         .build()
//!         .unwrap();
//!
//!     let result = executor
//!         .txn(|h| Box::pin(async move { h.put("user:1", "ada") }))
//!         .await;
//!
//!     assert!(result.is_ok());
//!     assert_eq!(executor.attempt_count(), 0);
//! }
//! ```

pub mod backoff;
pub mod boundary;
pub mod config;
pub mod connector;
pub mod context;
mod controller;
pub mod error;
pub mod executor;
pub mod jitter;
pub mod memory;
pub mod mode;
pub mod prelude;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use boundary::Boundary;
pub use config::ExecutorConfig;
pub use connector::Connector;
pub use context::{ExceptionStack, RetryContext, RetryPredicate};
pub use error::{BuildError, Failure, FailureKind};
pub use executor::{RetryExecutor, RetryExecutorBuilder};
pub use jitter::Jitter;
pub use mode::{Mode, ParseModeError};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use telemetry::{ExecutionEvent, LogSink, MemorySink, NullSink, TelemetrySink};
