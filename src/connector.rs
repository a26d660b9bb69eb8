//! The connection-management contract consumed by the executor.
//!
//! The executor never opens, pings, or closes connections itself. It drives a [`Connector`],
//! which owns the physical handle and decides how reconnection and disposal happen.
//!
//! Contract:
//! - `probe` is a non-destructive liveness check of the held handle. Its answer may be stale as
//!   soon as it returns.
//! - `acquire` returns a usable handle, replacing the held one when it is missing or dead. It is
//!   idempotent when the held handle is alive. Disposal of a replaced handle is the connector's job.
//! - `handle` returns the held handle without validating it, opening one only when none is held.
//! - Transaction and savepoint methods operate on the held handle. `is_in_transaction` must report
//!   `true` between a successful `begin` and the matching `commit`/`rollback`, and must report
//!   `false` after the handle was replaced (a dropped connection implicitly rolls back).

use async_trait::async_trait;

/// Source of reconnectable handles.
#[async_trait]
pub trait Connector: Send {
    /// The resource handed to units of work.
    type Handle: Send;
    /// Error raised by the connector and by operations against the handle.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Liveness check of the held handle. Returns `false` when no handle is held.
    async fn probe(&mut self) -> bool;

    /// A usable handle, reconnecting if necessary.
    async fn acquire(&mut self) -> Result<&mut Self::Handle, Self::Error>;

    /// The held handle as-is, opened lazily on first use.
    async fn handle(&mut self) -> Result<&mut Self::Handle, Self::Error>;

    /// Whether a transaction is open on the held handle.
    fn is_in_transaction(&self) -> bool;

    /// Start a transaction on the held handle.
    async fn begin(&mut self) -> Result<(), Self::Error>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), Self::Error>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), Self::Error>;

    /// Create a named savepoint inside the open transaction.
    async fn savepoint(&mut self, name: &str) -> Result<(), Self::Error>;

    /// Release a savepoint, keeping its work in the enclosing transaction.
    async fn release_savepoint(&mut self, name: &str) -> Result<(), Self::Error>;

    /// Discard work done since the savepoint was created.
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), Self::Error>;
}
