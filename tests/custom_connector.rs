use async_trait::async_trait;
use futures::future::BoxFuture;
use secondwind::{Connector, Failure, Mode, RetryExecutor};
use std::io;
use std::sync::{Arc, Mutex};

type SessionError = Arc<io::Error>;

/// Session whose liveness is controlled by the test.
struct Session {
    id: usize,
    alive: bool,
}

impl Session {
    fn query(&self, sql: &str) -> Result<String, SessionError> {
        if !self.alive {
            return Err(Arc::new(io::Error::new(io::ErrorKind::BrokenPipe, "server closed the connection")));
        }
        Ok(format!("{}@{}", sql, self.id))
    }
}

/// Records every boundary call so tests can assert the exact protocol.
#[derive(Default)]
struct ScriptedConnector {
    session: Option<Session>,
    opened: usize,
    in_txn: bool,
    journal: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    fn note(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }

    fn open(&mut self) {
        self.opened += 1;
        self.in_txn = false;
        self.session = Some(Session { id: self.opened, alive: true });
        self.note(format!("connect {}", self.opened));
    }

    fn kill(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.alive = false;
        }
        self.in_txn = false;
    }
}

fn gone() -> SessionError {
    Arc::new(io::Error::new(io::ErrorKind::NotConnected, "no session"))
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Handle = Session;
    type Error = SessionError;

    async fn probe(&mut self) -> bool {
        self.session.as_ref().is_some_and(|s| s.alive)
    }

    async fn acquire(&mut self) -> Result<&mut Session, SessionError> {
        if !self.probe().await {
            self.open();
        }
        self.session.as_mut().ok_or_else(gone)
    }

    async fn handle(&mut self) -> Result<&mut Session, SessionError> {
        if self.session.is_none() {
            self.open();
        }
        self.session.as_mut().ok_or_else(gone)
    }

    fn is_in_transaction(&self) -> bool {
        self.in_txn
    }

    async fn begin(&mut self) -> Result<(), SessionError> {
        self.note("begin");
        self.in_txn = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SessionError> {
        self.note("commit");
        self.in_txn = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SessionError> {
        self.note("rollback");
        self.in_txn = false;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        self.note(format!("savepoint {}", name));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        self.note(format!("release {}", name));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        self.note(format!("rollback to {}", name));
        Ok(())
    }
}

fn select<F>(f: F) -> F
where
    F: for<'h> FnMut(&'h mut Session) -> BoxFuture<'h, Result<String, SessionError>> + Send,
{
    f
}

#[tokio::test]
async fn transaction_protocol_per_attempt() {
    let connector = ScriptedConnector::default();
    let journal = connector.journal.clone();
    let mut executor = RetryExecutor::builder(connector).max_attempts(3).build().unwrap();

    let mut seen = 0;
    let result = executor
        .txn(select(move |s| {
            seen += 1;
            let first = seen == 1;
            Box::pin(async move {
                if first {
                    return Err(Arc::new(io::Error::new(io::ErrorKind::Other, "deadlock")));
                }
                s.query("select 1")
            })
        }))
        .await
        .unwrap();

    assert_eq!(result, "select 1@1");
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["connect 1", "begin", "rollback", "begin", "commit"]
    );
}

#[tokio::test]
async fn fixup_reconnects_and_replays_the_transaction() {
    let connector = ScriptedConnector::default();
    let journal = connector.journal.clone();
    let mut executor = RetryExecutor::builder(connector).default_mode(Mode::Fixup).build().unwrap();

    let mut killed = false;
    let result = executor
        .txn(select(move |s| {
            if !killed {
                killed = true;
                s.alive = false;
            }
            Box::pin(async move { s.query("select 2") })
        }))
        .await;

    assert_eq!(result.as_deref().ok(), Some("select 2@2"));
    assert_eq!(executor.attempt_count(), 0);
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["connect 1", "begin", "rollback", "connect 2", "begin", "commit"]
    );
}

#[tokio::test]
async fn non_clone_errors_travel_behind_arc() {
    let mut executor = RetryExecutor::builder(ScriptedConnector::default())
        .max_attempts(2)
        .build()
        .unwrap();
    executor.connector_mut().handle().await.unwrap();
    executor.connector_mut().kill();

    let err = executor
        .run_with_mode(Mode::Unchecked, select(|s| Box::pin(async move { s.query("select 3") })))
        .await
        .unwrap_err();

    assert!(matches!(&err, Failure::Operation(e) if e.kind() == io::ErrorKind::BrokenPipe));
    assert_eq!(executor.exception_stack().len(), 2);
}
