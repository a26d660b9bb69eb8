//! In-memory [`Connector`] with fault injection.
//!
//! `MemoryConnector` keeps a shared key/value store and hands out [`MemoryHandle`]s that behave
//! like connections: each connect produces a new handle, and a [`MemoryLink`] can drop the live
//! connection at any moment. Writes made inside a transaction are buffered on the handle and only
//! reach the store on commit, so a dropped connection discards them the way a real server would.
//!
//! It is the reference implementation of the connector contract and the workhorse of the test
//! suite.
//!
//! ```rust
//! use secondwind::memory::MemoryConnector;
//! use secondwind::RetryExecutor;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut executor = RetryExecutor::new(MemoryConnector::new());
//! executor.txn(|h| Box::pin(async move { h.put("answer", "42") })).await.unwrap();
//! assert_eq!(executor.connector().link().committed("answer").as_deref(), Some("42"));
//! # });
//! ```

use crate::connector::Connector;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Errors raised by the in-memory connector and its handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// The handle's connection was dropped.
    #[error("connection lost")]
    Disconnected,
    /// A connection attempt was refused.
    #[error("connection refused")]
    ConnectionRefused,
    /// A statement failed on a live connection.
    #[error("{0}")]
    Query(String),
    /// A transaction command was issued with no open transaction.
    #[error("no transaction is open")]
    NoTransaction,
    /// `begin` was issued while a transaction was already open.
    #[error("a transaction is already open")]
    TransactionOpen,
    /// The named savepoint does not exist.
    #[error("savepoint `{0}` does not exist")]
    UnknownSavepoint(String),
}

#[derive(Debug, Default)]
struct Shared {
    committed: BTreeMap<String, String>,
    live: Option<u64>,
    generation: u64,
    connects: usize,
    refuse: usize,
    fail_commit: bool,
    fail_rollback: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Control and inspection handle for a [`MemoryConnector`]'s shared state.
///
/// Cheap to clone; operations under test capture one to inject faults mid-flight.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryLink {
    /// Drop the live connection. Its open transaction, if any, is lost.
    pub fn disconnect(&self) {
        lock(&self.shared).live = None;
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_connections(&self, n: usize) {
        lock(&self.shared).refuse = n;
    }

    /// Make the next commit fail on a live connection.
    pub fn fail_next_commit(&self) {
        lock(&self.shared).fail_commit = true;
    }

    /// Make the next rollback fail; the failure also drops the connection.
    pub fn fail_next_rollback(&self) {
        lock(&self.shared).fail_rollback = true;
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> usize {
        lock(&self.shared).connects
    }

    /// Whether a connection is currently live.
    pub fn is_connected(&self) -> bool {
        lock(&self.shared).live.is_some()
    }

    /// Committed value for `key`.
    pub fn committed(&self, key: &str) -> Option<String> {
        lock(&self.shared).committed.get(key).cloned()
    }

    /// Number of committed keys.
    pub fn committed_len(&self) -> usize {
        lock(&self.shared).committed.len()
    }
}

type Overlay = BTreeMap<String, Option<String>>;

#[derive(Debug, Default)]
struct Txn {
    writes: Overlay,
    savepoints: Vec<(String, Overlay)>,
}

/// A single in-memory connection.
#[derive(Debug)]
pub struct MemoryHandle {
    id: u64,
    shared: Arc<Mutex<Shared>>,
    txn: Option<Txn>,
}

impl MemoryHandle {
    /// Connection id; a new id is issued on every reconnect.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn is_live(&self) -> bool {
        lock(&self.shared).live == Some(self.id)
    }

    fn ensure_live(&mut self) -> Result<(), MemoryError> {
        if self.is_live() {
            Ok(())
        } else {
            self.txn = None;
            Err(MemoryError::Disconnected)
        }
    }

    /// Whether this connection has an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some() && self.is_live()
    }

    /// Read a key, seeing this connection's uncommitted writes.
    pub fn get(&mut self, key: &str) -> Result<Option<String>, MemoryError> {
        self.ensure_live()?;
        if let Some(pending) = self.txn.as_ref().and_then(|t| t.writes.get(key)) {
            return Ok(pending.clone());
        }
        Ok(lock(&self.shared).committed.get(key).cloned())
    }

    /// Write a key; buffered until commit inside a transaction.
    pub fn put(&mut self, key: &str, value: &str) -> Result<(), MemoryError> {
        self.write(key, Some(value.to_string()))
    }

    /// Delete a key; buffered until commit inside a transaction.
    pub fn delete(&mut self, key: &str) -> Result<(), MemoryError> {
        self.write(key, None)
    }

    fn write(&mut self, key: &str, value: Option<String>) -> Result<(), MemoryError> {
        self.ensure_live()?;
        match self.txn.as_mut() {
            Some(txn) => {
                txn.writes.insert(key.to_string(), value);
            }
            None => apply(&mut lock(&self.shared).committed, key.to_string(), value),
        }
        Ok(())
    }
}

fn apply(store: &mut BTreeMap<String, String>, key: String, value: Option<String>) {
    match value {
        Some(v) => {
            store.insert(key, v);
        }
        None => {
            store.remove(&key);
        }
    }
}

/// [`Connector`] over an in-memory store.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
    handle: Option<MemoryHandle>,
}

impl MemoryConnector {
    /// Empty store, no connection opened yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Control handle sharing this connector's state.
    pub fn link(&self) -> MemoryLink {
        MemoryLink { shared: self.shared.clone() }
    }

    fn connect(&mut self) -> Result<(), MemoryError> {
        let mut shared = lock(&self.shared);
        if shared.refuse > 0 {
            shared.refuse -= 1;
            return Err(MemoryError::ConnectionRefused);
        }
        shared.generation += 1;
        shared.connects += 1;
        let id = shared.generation;
        shared.live = Some(id);
        drop(shared);
        // The replaced handle, if any, is dropped here.
        self.handle = Some(MemoryHandle { id, shared: self.shared.clone(), txn: None });
        Ok(())
    }

    fn live_handle(&mut self) -> Result<&mut MemoryHandle, MemoryError> {
        let handle = self.handle.as_mut().ok_or(MemoryError::Disconnected)?;
        handle.ensure_live()?;
        Ok(handle)
    }

    /// Consume an injected rollback fault. A failed rollback also drops the connection.
    fn rollback_fault(&self) -> bool {
        let mut shared = lock(&self.shared);
        if std::mem::take(&mut shared.fail_rollback) {
            shared.live = None;
            true
        } else {
            false
        }
    }

    fn txn(&mut self) -> Result<&mut Txn, MemoryError> {
        self.live_handle()?.txn.as_mut().ok_or(MemoryError::NoTransaction)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Handle = MemoryHandle;
    type Error = MemoryError;

    async fn probe(&mut self) -> bool {
        self.handle.as_ref().is_some_and(MemoryHandle::is_live)
    }

    async fn acquire(&mut self) -> Result<&mut MemoryHandle, MemoryError> {
        if !self.probe().await {
            self.connect()?;
        }
        self.handle.as_mut().ok_or(MemoryError::Disconnected)
    }

    async fn handle(&mut self) -> Result<&mut MemoryHandle, MemoryError> {
        if self.handle.is_none() {
            self.connect()?;
        }
        self.handle.as_mut().ok_or(MemoryError::Disconnected)
    }

    fn is_in_transaction(&self) -> bool {
        self.handle.as_ref().is_some_and(MemoryHandle::in_transaction)
    }

    async fn begin(&mut self) -> Result<(), MemoryError> {
        let handle = self.live_handle()?;
        if handle.txn.is_some() {
            return Err(MemoryError::TransactionOpen);
        }
        handle.txn = Some(Txn::default());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), MemoryError> {
        let handle = self.live_handle()?;
        if handle.txn.is_none() {
            return Err(MemoryError::NoTransaction);
        }
        let mut shared = lock(&handle.shared);
        if std::mem::take(&mut shared.fail_commit) {
            return Err(MemoryError::Query("commit failed".into()));
        }
        if let Some(txn) = handle.txn.take() {
            for (key, value) in txn.writes {
                apply(&mut shared.committed, key, value);
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), MemoryError> {
        if self.rollback_fault() {
            return Err(MemoryError::Query("rollback failed".into()));
        }
        let handle = self.live_handle()?;
        handle.txn.take().map(|_| ()).ok_or(MemoryError::NoTransaction)
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), MemoryError> {
        let txn = self.txn()?;
        let snapshot = txn.writes.clone();
        txn.savepoints.push((name.to_string(), snapshot));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), MemoryError> {
        let txn = self.txn()?;
        let pos = txn
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| MemoryError::UnknownSavepoint(name.to_string()))?;
        txn.savepoints.truncate(pos);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), MemoryError> {
        if self.rollback_fault() {
            return Err(MemoryError::Query("rollback failed".into()));
        }
        let txn = self.txn()?;
        let pos = txn
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| MemoryError::UnknownSavepoint(name.to_string()))?;
        let (_, snapshot) = txn.savepoints.remove(pos);
        txn.savepoints.truncate(pos);
        txn.writes = snapshot;
        Ok(())
    }
}
