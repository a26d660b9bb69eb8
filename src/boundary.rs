//! Transaction boundaries around a single invocation of a unit of work.
//!
//! - `Bare` runs the operation against the handle with no implicit commit or rollback.
//! - `Transaction` brackets the operation in `begin`/`commit`; any failure is rolled back before
//!   it is reported, so the retry loop always restarts from a clean transactional state.
//! - `Savepoint` behaves like `Transaction` when no transaction is open. Inside an already-open
//!   transaction it wraps the operation in a savepoint instead.
//!
//! A unit started while the connector already reports an open transaction is a nested sub-unit:
//! it is executed once through [`Boundary::invoke_nested`] and never retried, because a reconnect
//! would silently discard the enclosing transaction.

use crate::connector::Connector;
use crate::error::Failure;
use futures::future::BoxFuture;

/// How one invocation of a unit of work is bracketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Boundary {
    /// No implicit commit or rollback.
    Bare,
    /// Commit on success, roll back on failure.
    Transaction,
    /// Savepoint inside an open transaction, full transaction otherwise.
    Savepoint,
}

impl Boundary {
    /// Whether this boundary opens a transaction when none is active.
    pub fn is_transactional(&self) -> bool {
        !matches!(self, Boundary::Bare)
    }

    /// Run the operation once under this boundary on a connector with no open transaction.
    pub(crate) async fn invoke<C, T, F>(
        self,
        connector: &mut C,
        operation: &mut F,
    ) -> Result<T, Failure<C::Error>>
    where
        C: Connector,
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        match self {
            Boundary::Bare => invoke_bare(connector, operation).await,
            Boundary::Transaction | Boundary::Savepoint => {
                invoke_transaction(connector, operation).await
            }
        }
    }

    /// Run the operation once inside a transaction the caller already opened.
    ///
    /// `Transaction` and `Bare` join the enclosing transaction without a commit of their own.
    /// `Savepoint` brackets the operation in the named savepoint.
    pub(crate) async fn invoke_nested<C, T, F>(
        self,
        connector: &mut C,
        operation: &mut F,
        savepoint: &str,
    ) -> Result<T, Failure<C::Error>>
    where
        C: Connector,
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        match self {
            Boundary::Bare | Boundary::Transaction => invoke_bare(connector, operation).await,
            Boundary::Savepoint => invoke_savepoint(connector, operation, savepoint).await,
        }
    }
}

async fn invoke_bare<C, T, F>(connector: &mut C, operation: &mut F) -> Result<T, Failure<C::Error>>
where
    C: Connector,
    F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
{
    let handle = connector.handle().await.map_err(Failure::Connect)?;
    operation(handle).await.map_err(Failure::Operation)
}

async fn invoke_transaction<C, T, F>(
    connector: &mut C,
    operation: &mut F,
) -> Result<T, Failure<C::Error>>
where
    C: Connector,
    F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
{
    connector.handle().await.map_err(Failure::Connect)?;
    connector.begin().await.map_err(Failure::Operation)?;

    let outcome = match connector.handle().await {
        Ok(handle) => operation(handle).await.map_err(Failure::Operation),
        Err(e) => Err(Failure::Connect(e)),
    };
    let outcome = match outcome {
        Ok(value) => connector.commit().await.map(|()| value).map_err(Failure::Operation),
        Err(failure) => Err(failure),
    };

    match outcome {
        Ok(value) => Ok(value),
        Err(failure) => Err(unwind(connector, failure).await),
    }
}

/// Roll back after a failed transaction body or commit.
///
/// A handle that no longer reports an open transaction was already rolled back by the store
/// (typically because the connection dropped), so no rollback is issued.
async fn unwind<C: Connector>(connector: &mut C, failure: Failure<C::Error>) -> Failure<C::Error> {
    if !connector.is_in_transaction() {
        return failure;
    }
    match connector.rollback().await {
        Ok(()) => failure,
        Err(rollback) => Failure::Rollback { error: failure.into_error(), rollback },
    }
}

async fn invoke_savepoint<C, T, F>(
    connector: &mut C,
    operation: &mut F,
    name: &str,
) -> Result<T, Failure<C::Error>>
where
    C: Connector,
    F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
{
    connector.savepoint(name).await.map_err(Failure::Operation)?;

    let outcome = match connector.handle().await {
        Ok(handle) => operation(handle).await.map_err(Failure::Operation),
        Err(e) => Err(Failure::Connect(e)),
    };
    let outcome = match outcome {
        Ok(value) => {
            connector.release_savepoint(name).await.map(|()| value).map_err(Failure::Operation)
        }
        Err(failure) => Err(failure),
    };

    match outcome {
        Ok(value) => Ok(value),
        Err(failure) => match connector.rollback_to_savepoint(name).await {
            Ok(()) => Err(failure),
            Err(rollback) => Err(Failure::Rollback { error: failure.into_error(), rollback }),
        },
    }
}
