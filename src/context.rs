//! Per-call retry state: the failure history and the context handed to retry predicates.

use crate::error::Failure;
use std::fmt;
use std::sync::Arc;

/// Ordered history of the failures seen during one outer call.
///
/// Append-only while the call runs; cleared when the next call starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionStack<E> {
    entries: Vec<Failure<E>>,
}

impl<E> Default for ExceptionStack<E> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<E> ExceptionStack<E> {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn push(&mut self, failure: Failure<E>) {
        self.entries.push(failure);
    }

    /// The most recent failure.
    pub fn last(&self) -> Option<&Failure<E>> {
        self.entries.last()
    }

    /// Forget all recorded failures.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failures in the order they were raised.
    pub fn iter(&self) -> std::slice::Iter<'_, Failure<E>> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Failure<E>] {
        &self.entries
    }
}

impl<'a, E> IntoIterator for &'a ExceptionStack<E> {
    type Item = &'a Failure<E>;
    type IntoIter = std::slice::Iter<'a, Failure<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// State of the retry loop, as seen by retry predicates and by callers after a call returns.
///
/// Invariant: `exceptions().len() == attempt_count()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext<E> {
    attempt_count: usize,
    max_attempts: usize,
    exceptions: ExceptionStack<E>,
}

impl<E> RetryContext<E> {
    pub(crate) fn new(max_attempts: usize) -> Self {
        Self { attempt_count: 0, max_attempts, exceptions: ExceptionStack::new() }
    }

    /// Start a fresh outer call.
    pub(crate) fn reset(&mut self, max_attempts: usize) {
        self.attempt_count = 0;
        self.max_attempts = max_attempts;
        self.exceptions.clear();
    }

    /// Record a failed attempt.
    pub(crate) fn record(&mut self, failure: Failure<E>) {
        self.exceptions.push(failure);
        self.attempt_count += 1;
    }

    /// Whether the attempt ceiling has been reached.
    pub(crate) fn exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Failed attempts so far in this call.
    pub fn attempt_count(&self) -> usize {
        self.attempt_count
    }

    /// Attempt ceiling for this call.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Attempts left before the ceiling is hit.
    pub fn remaining_attempts(&self) -> usize {
        self.max_attempts.saturating_sub(self.attempt_count)
    }

    /// Failures recorded so far in this call.
    pub fn exceptions(&self) -> &ExceptionStack<E> {
        &self.exceptions
    }

    /// The failure from the attempt that just ended.
    pub fn last_exception(&self) -> Option<&Failure<E>> {
        self.exceptions.last()
    }
}

/// Decides, after a failed attempt, whether the loop may try again.
///
/// Returning `Err` aborts the loop; that error is reported as [`Failure::Predicate`] in place of
/// the pending failure.
#[derive(Clone)]
pub struct RetryPredicate<E> {
    decide: Arc<dyn Fn(&RetryContext<E>) -> Result<bool, E> + Send + Sync>,
}

impl<E> RetryPredicate<E> {
    /// Predicate that always allows another attempt.
    pub fn always() -> Self {
        Self { decide: Arc::new(|_| Ok(true)) }
    }

    /// Wrap an infallible decision function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RetryContext<E>) -> bool + Send + Sync + 'static,
    {
        Self { decide: Arc::new(move |ctx| Ok(f(ctx))) }
    }

    /// Wrap a decision function that may itself fail.
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn(&RetryContext<E>) -> Result<bool, E> + Send + Sync + 'static,
    {
        Self { decide: Arc::new(f) }
    }

    pub(crate) fn decide(&self, ctx: &RetryContext<E>) -> Result<bool, E> {
        (self.decide)(ctx)
    }
}

impl<E> Default for RetryPredicate<E> {
    fn default() -> Self {
        Self::always()
    }
}

impl<E> fmt::Debug for RetryPredicate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryPredicate(<fn>)")
    }
}
