//! Error types for retry-governed execution.
//!
//! Every failure that reaches a caller is a [`Failure<E>`], where `E` is the connector's error
//! type. The variant records *where* the failure happened; the wrapped `E` is always the error
//! the resource actually produced. Exhausting the attempt ceiling or having the retry predicate
//! decline never produces a synthetic error: the caller receives the last failure unchanged.

use thiserror::Error;

/// Unified failure type produced by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure<E> {
    /// The caller's operation failed (or a commit issued on its behalf).
    #[error("{0}")]
    Operation(E),
    /// Obtaining a handle from the connector failed.
    #[error("connect failed: {0}")]
    Connect(E),
    /// A rollback failed while unwinding a failed transaction.
    #[error("rollback failed ({rollback}) after transaction error: {error}")]
    Rollback {
        /// The failure that triggered the rollback.
        error: E,
        /// The failure raised by the rollback itself.
        rollback: E,
    },
    /// The retry predicate raised instead of deciding.
    #[error("retry predicate failed: {0}")]
    Predicate(E),
}

/// Tag describing which stage produced a [`Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Failure raised by the unit of work.
    Operation,
    /// Failure raised while obtaining a handle.
    Connect,
    /// Structural failure: the rollback of a failed transaction also failed.
    Rollback,
    /// Failure raised by the retry predicate.
    Predicate,
}

impl<E> Failure<E> {
    /// The stage that produced this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Operation(_) => FailureKind::Operation,
            Self::Connect(_) => FailureKind::Connect,
            Self::Rollback { .. } => FailureKind::Rollback,
            Self::Predicate(_) => FailureKind::Predicate,
        }
    }

    /// Borrow the underlying error. For `Rollback` this is the error that triggered the rollback.
    pub fn error(&self) -> &E {
        match self {
            Self::Operation(e) | Self::Connect(e) | Self::Predicate(e) => e,
            Self::Rollback { error, .. } => error,
        }
    }

    /// Consume the failure and return the underlying error.
    pub fn into_error(self) -> E {
        match self {
            Self::Operation(e) | Self::Connect(e) | Self::Predicate(e) => e,
            Self::Rollback { error, .. } => error,
        }
    }

    /// The error raised by a failed rollback, if this is a `Rollback` failure.
    pub fn rollback_error(&self) -> Option<&E> {
        match self {
            Self::Rollback { rollback, .. } => Some(rollback),
            _ => None,
        }
    }

    /// Check if the operation itself failed.
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// Check if obtaining a handle failed.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }

    /// Check if a rollback failed.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }

    /// Check if the retry predicate failed.
    pub fn is_predicate(&self) -> bool {
        matches!(self, Self::Predicate(_))
    }
}

/// Errors produced while building an executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}
