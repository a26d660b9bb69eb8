//! The retry loop.
//!
//! [`RetryExecutor`] owns a [`Connector`] and runs units of work against it until one attempt
//! succeeds, the retry predicate declines, or the attempt ceiling is reached.
//!
//! Semantics:
//! - Each outer call starts with a fresh [`RetryContext`]: zero attempts, empty exception stack.
//! - An attempt is one pass through the [`Mode`] controller. Fixup's internal second invocation
//!   belongs to the same attempt and is never counted separately.
//! - Every failed attempt is pushed onto the exception stack *before* any decision is made.
//! - The ceiling is checked before the predicate, so a predicate cannot extend the ceiling.
//! - On exhaustion or rejection the caller receives the last failure unchanged. A predicate that
//!   errors replaces it with [`Failure::Predicate`].
//! - A per-call mode override applies only for the duration of the call.
//! - A call started while the connector reports an open transaction runs exactly once, outside
//!   the retry loop: reconnecting would silently discard the enclosing transaction.
//!
//! Operations receive the handle and return a boxed future borrowing it:
//!
//! ```rust
//! use secondwind::memory::MemoryConnector;
//! use secondwind::{Mode, RetryExecutor};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut executor = RetryExecutor::builder(MemoryConnector::new())
//!     .max_attempts(3)
//!     .default_mode(Mode::Fixup)
//!     .build()
//!     .unwrap();
//!
//! let stored = executor
//!     .txn(|h| {
//!         Box::pin(async move {
//!             h.put("greeting", "hello")?;
//!             h.get("greeting")
//!         })
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(stored.as_deref(), Some("hello"));
//! assert_eq!(executor.attempt_count(), 0);
//! # });
//! ```

use crate::backoff::Backoff;
use crate::boundary::Boundary;
use crate::config::ExecutorConfig;
use crate::connector::Connector;
use crate::context::{ExceptionStack, RetryContext, RetryPredicate};
use crate::controller::ModeController;
use crate::error::{BuildError, Failure};
use crate::jitter::Jitter;
use crate::mode::{Mode, ModeScope};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{emit_best_effort, ExecutionEvent, NullSink, TelemetrySink};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tower::util::BoxCloneService;
use tower::{BoxError, ServiceExt};

type EventSink = BoxCloneService<ExecutionEvent, (), BoxError>;

fn box_sink<S>(sink: S) -> EventSink
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    BoxCloneService::new(sink.map_err(|e| Box::new(e) as BoxError))
}

/// Retry-governed executor over a reconnectable handle.
///
/// Calls take `&mut self`: one outer call at a time per executor. Use one executor per worker.
pub struct RetryExecutor<C: Connector> {
    connector: C,
    config: ExecutorConfig,
    mode: Mode,
    predicate: RetryPredicate<C::Error>,
    context: RetryContext<C::Error>,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    sink: EventSink,
    savepoints: u64,
}

impl<C> fmt::Debug for RetryExecutor<C>
where
    C: Connector + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("connector", &self.connector)
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("attempt_count", &self.context.attempt_count())
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("predicate", &self.predicate)
            .field("sleeper", &self.sleeper)
            .field("sink", &"<sink>")
            .finish()
    }
}

impl<C: Connector> RetryExecutor<C> {
    /// Executor with default settings: 10 attempts, checked mode, no pauses.
    pub fn new(connector: C) -> Self {
        Self::assemble(
            connector,
            ExecutorConfig::default(),
            RetryPredicate::always(),
            Backoff::None,
            Jitter::None,
            Arc::new(TokioSleeper),
            box_sink(NullSink),
        )
    }

    /// Start a builder around `connector`.
    pub fn builder(connector: C) -> RetryExecutorBuilder<C> {
        RetryExecutorBuilder::new(connector)
    }

    /// Executor from plain settings, validated.
    pub fn from_config(connector: C, config: ExecutorConfig) -> Result<Self, BuildError> {
        Self::builder(connector).config(config).build()
    }

    fn assemble(
        connector: C,
        config: ExecutorConfig,
        predicate: RetryPredicate<C::Error>,
        backoff: Backoff,
        jitter: Jitter,
        sleeper: Arc<dyn Sleeper>,
        sink: EventSink,
    ) -> Self {
        Self {
            connector,
            mode: config.default_mode,
            context: RetryContext::new(config.max_attempts),
            config,
            predicate,
            backoff,
            jitter,
            sleeper,
            sink,
            savepoints: 0,
        }
    }

    /// Failed attempts recorded by the most recent call.
    pub fn attempt_count(&self) -> usize {
        self.context.attempt_count()
    }

    /// Failures recorded by the most recent call, oldest first.
    pub fn exception_stack(&self) -> &ExceptionStack<C::Error> {
        self.context.exceptions()
    }

    /// Full retry context of the most recent call.
    pub fn context(&self) -> &RetryContext<C::Error> {
        &self.context
    }

    /// Currently effective mode. Equal to the default whenever no call is running.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn default_mode(&self) -> Mode {
        self.config.default_mode
    }

    pub fn set_default_mode(&mut self, mode: Mode) {
        self.config.default_mode = mode;
        self.mode = mode;
    }

    pub fn max_attempts(&self) -> usize {
        self.config.max_attempts
    }

    /// Change the attempt ceiling for subsequent calls.
    pub fn set_max_attempts(&mut self, max_attempts: usize) -> Result<(), BuildError> {
        if max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(max_attempts));
        }
        self.config.max_attempts = max_attempts;
        Ok(())
    }

    pub fn debug_logging(&self) -> bool {
        self.config.debug_logging
    }

    pub fn set_debug_logging(&mut self, enabled: bool) {
        self.config.debug_logging = enabled;
    }

    /// Current settings.
    pub fn config(&self) -> ExecutorConfig {
        self.config
    }

    pub fn retry_predicate(&self) -> &RetryPredicate<C::Error> {
        &self.predicate
    }

    /// Replace the retry predicate.
    pub fn set_retry_predicate<F>(&mut self, predicate: F)
    where
        F: Fn(&RetryContext<C::Error>) -> bool + Send + Sync + 'static,
    {
        self.predicate = RetryPredicate::new(predicate);
    }

    /// Replace the retry predicate with one that may abort the loop with its own error.
    pub fn set_fallible_retry_predicate<F>(&mut self, predicate: F)
    where
        F: Fn(&RetryContext<C::Error>) -> Result<bool, C::Error> + Send + Sync + 'static,
    {
        self.predicate = RetryPredicate::fallible(predicate);
    }

    /// Restore the always-retry predicate.
    pub fn reset_retry_predicate(&mut self) {
        self.predicate = RetryPredicate::always();
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Direct access to the connector, e.g. to open a transaction that later calls nest in.
    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    pub fn into_connector(self) -> C {
        self.connector
    }
}

impl<C> RetryExecutor<C>
where
    C: Connector,
    C::Error: Clone,
{
    /// Run `operation` with no implicit transaction, in the default mode.
    pub async fn run<T, F>(&mut self, operation: F) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        self.execute(None, Boundary::Bare, operation).await
    }

    /// Run `operation` with no implicit transaction, in `mode`.
    pub async fn run_with_mode<T, F>(&mut self, mode: Mode, operation: F) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        self.execute(Some(mode), Boundary::Bare, operation).await
    }

    /// Run `operation` inside a transaction, in the default mode. Each attempt is its own
    /// transaction.
    pub async fn txn<T, F>(&mut self, operation: F) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        self.execute(None, Boundary::Transaction, operation).await
    }

    /// Run `operation` inside a transaction, in `mode`.
    pub async fn txn_with_mode<T, F>(&mut self, mode: Mode, operation: F) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        self.execute(Some(mode), Boundary::Transaction, operation).await
    }

    /// Run `operation` under a savepoint when a transaction is already open (once, no retry),
    /// or as a retried transaction otherwise.
    pub async fn svp<T, F>(&mut self, operation: F) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        self.execute(None, Boundary::Savepoint, operation).await
    }

    /// Run `operation` under `boundary`, in `mode` or the default mode.
    pub async fn execute<T, F>(
        &mut self,
        mode: Option<Mode>,
        boundary: Boundary,
        operation: F,
    ) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        let predicate = self.predicate.clone();
        self.drive(mode, boundary, predicate, operation).await
    }

    /// Like [`execute`](Self::execute), consulting `predicate` instead of the configured one.
    pub async fn execute_with<T, F>(
        &mut self,
        mode: Option<Mode>,
        boundary: Boundary,
        predicate: RetryPredicate<C::Error>,
        operation: F,
    ) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        self.drive(mode, boundary, predicate, operation).await
    }

    async fn drive<T, F>(
        &mut self,
        mode: Option<Mode>,
        boundary: Boundary,
        predicate: RetryPredicate<C::Error>,
        mut operation: F,
    ) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        let Self { connector, config, mode: slot, context, backoff, jitter, sleeper, sink, savepoints, .. } =
            self;

        context.reset(config.max_attempts);
        let scope = ModeScope::enter(slot, mode.unwrap_or(config.default_mode));

        if connector.is_in_transaction() {
            *savepoints += 1;
            let name = format!("secondwind_sp_{}", savepoints);
            tracing::debug!(?boundary, "transaction already open; running once without retry");
            return boundary.invoke_nested(connector, &mut operation, &name).await;
        }

        let mut controller = ModeController::new(connector, scope.mode());
        loop {
            let outcome = controller.invoke(boundary, &mut operation).await;
            if controller.take_reconnected() {
                emit_best_effort(sink.clone(), ExecutionEvent::Reconnected { mode: scope.mode() })
                    .await;
            }

            let failure = match outcome {
                Ok(value) => {
                    let failed_attempts = context.attempt_count();
                    emit_best_effort(sink.clone(), ExecutionEvent::Succeeded { failed_attempts })
                        .await;
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            context.record(failure.clone());
            let attempts = context.attempt_count();

            if context.exhausted() {
                if config.debug_logging {
                    tracing::error!(attempts, error = %failure, "retry attempts exhausted");
                }
                emit_best_effort(sink.clone(), ExecutionEvent::Exhausted { attempts }).await;
                return Err(failure);
            }

            match predicate.decide(context) {
                Ok(true) => {}
                Ok(false) => {
                    if config.debug_logging {
                        tracing::warn!(attempts, error = %failure, "retry declined by predicate");
                    }
                    emit_best_effort(sink.clone(), ExecutionEvent::Rejected { attempts }).await;
                    return Err(failure);
                }
                Err(error) => {
                    if config.debug_logging {
                        tracing::warn!(attempts, error = %failure, "retry predicate failed");
                    }
                    emit_best_effort(sink.clone(), ExecutionEvent::Rejected { attempts }).await;
                    return Err(Failure::Predicate(error));
                }
            }

            let delay = jitter.apply(backoff.delay(attempts));
            if config.debug_logging {
                tracing::warn!(
                    attempt = attempts,
                    max_attempts = context.max_attempts(),
                    error = %failure,
                    ?delay,
                    "attempt failed; retrying"
                );
            }
            emit_best_effort(
                sink.clone(),
                ExecutionEvent::Retry {
                    attempt: attempts,
                    max_attempts: context.max_attempts(),
                    delay,
                    error: failure.to_string(),
                },
            )
            .await;
            if !delay.is_zero() {
                sleeper.sleep(delay).await;
            }
        }
    }
}

/// Builder for [`RetryExecutor`].
pub struct RetryExecutorBuilder<C: Connector> {
    connector: C,
    config: ExecutorConfig,
    predicate: RetryPredicate<C::Error>,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    sink: EventSink,
}

impl<C: Connector> RetryExecutorBuilder<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            config: ExecutorConfig::default(),
            predicate: RetryPredicate::always(),
            backoff: Backoff::None,
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
            sink: box_sink(NullSink),
        }
    }

    /// Replace all plain settings at once.
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Failed attempts allowed per call. Must be > 0.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn default_mode(mut self, mode: Mode) -> Self {
        self.config.default_mode = mode;
        self
    }

    pub fn debug_logging(mut self, enabled: bool) -> Self {
        self.config.debug_logging = enabled;
        self
    }

    pub fn retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RetryContext<C::Error>) -> bool + Send + Sync + 'static,
    {
        self.predicate = RetryPredicate::new(predicate);
        self
    }

    pub fn fallible_retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RetryContext<C::Error>) -> Result<bool, C::Error> + Send + Sync + 'static,
    {
        self.predicate = RetryPredicate::fallible(predicate);
        self
    }

    /// Pause schedule between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Receive [`ExecutionEvent`]s.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.sink = box_sink(sink);
        self
    }

    /// Build the executor, validating settings.
    pub fn build(self) -> Result<RetryExecutor<C>, BuildError> {
        self.config.validate()?;
        Ok(RetryExecutor::assemble(
            self.connector,
            self.config,
            self.predicate,
            self.backoff,
            self.jitter,
            self.sleeper,
            self.sink,
        ))
    }
}
