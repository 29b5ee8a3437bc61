//! In-memory test doubles for the connection seam.
//!
//! [`MockConnector`] hands out [`MockConnection`]s that record every
//! statement, keep writes in a per-connection transaction buffer until
//! `COMMIT`, and can be told to fail or hang on demand. Available to this
//! crate's tests and, through the `testing` feature, to dependent crates.
//!
//! ```rust,ignore
//! let connector = MockConnector::new();
//! let pool = Pool::new(Arc::new(connector.clone()), PoolOptions::default());
//! connector.fail_on("COMMIT");
//! ```

use crate::connection::{Connection, Connector};
use crate::error::DbError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Fail,
    Hang,
    Broken,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    /// Bumped by `restart`; connections from an older generation are dead.
    generation: u64,
    opened: u64,
    closed: u64,
    dropped: u64,
    fail_connects: bool,
    hang_connects: bool,
    faults: Vec<(String, Fault)>,
    scalar: Option<String>,
    statements: Vec<(u64, String)>,
    committed: Vec<String>,
}

impl MockState {
    fn fault_for(&self, sql: &str) -> Option<Fault> {
        let sql = sql.trim().to_ascii_uppercase();
        self.faults
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, fault)| *fault)
    }
}

/// A [`Connector`] whose connections live entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent connect fail with [`DbError::Connection`].
    pub fn fail_connects(&self, fail: bool) {
        self.state.lock().fail_connects = fail;
    }

    /// Makes every subsequent connect wait forever.
    pub fn hang_connects(&self, hang: bool) {
        self.state.lock().hang_connects = hang;
    }

    /// Statements starting with `prefix` (case-insensitive) fail.
    pub fn fail_on(&self, prefix: &str) {
        self.state
            .lock()
            .faults
            .push((prefix.to_ascii_uppercase(), Fault::Fail));
    }

    /// Statements starting with `prefix` (case-insensitive) never complete.
    pub fn hang_on(&self, prefix: &str) {
        self.state
            .lock()
            .faults
            .push((prefix.to_ascii_uppercase(), Fault::Hang));
    }

    /// Statements starting with `prefix` fail as if the socket had been cut,
    /// with a connection-class error.
    pub fn break_on(&self, prefix: &str) {
        self.state
            .lock()
            .faults
            .push((prefix.to_ascii_uppercase(), Fault::Broken));
    }

    /// Simulates a server restart: every connection opened so far fails all
    /// further statements with a connection error, new ones work normally.
    pub fn restart(&self) {
        self.state.lock().generation += 1;
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.faults.clear();
        state.fail_connects = false;
        state.hang_connects = false;
    }

    /// The value returned by `fetch_scalar`.
    pub fn set_scalar(&self, value: Option<&str>) {
        self.state.lock().scalar = value.map(str::to_string);
    }

    /// Every statement issued so far, across all connections, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .statements
            .iter()
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Writes that became durable through `COMMIT`.
    pub fn committed_writes(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    pub fn opened(&self) -> u64 {
        self.state.lock().opened
    }

    /// Connections closed gracefully through [`Connection::close`].
    pub fn closed(&self) -> u64 {
        self.state.lock().closed
    }

    /// Connections that still exist, idle or borrowed.
    pub fn live(&self) -> u64 {
        let state = self.state.lock();
        state.opened - state.dropped
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let (fail, hang) = {
            let state = self.state.lock();
            (state.fail_connects, state.hang_connects)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(DbError::Connection("mock: connection refused".to_string()));
        }

        let (id, generation) = {
            let mut state = self.state.lock();
            state.next_id += 1;
            state.opened += 1;
            (state.next_id, state.generation)
        };
        Ok(Box::new(MockConnection {
            id,
            generation,
            state: self.state.clone(),
            pending: Vec::new(),
            in_transaction: false,
        }))
    }

    fn describe(&self) -> String {
        "mock://in-memory".to_string()
    }
}

/// A connection produced by [`MockConnector`].
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    generation: u64,
    state: Arc<Mutex<MockState>>,
    /// Writes made since `BEGIN`, invisible to everyone else until `COMMIT`.
    pending: Vec<String>,
    in_transaction: bool,
}

impl MockConnection {
    async fn run(&mut self, sql: &str) -> Result<(), DbError> {
        let fault = {
            let mut state = self.state.lock();
            state.statements.push((self.id, sql.to_string()));
            if self.generation != state.generation {
                Some(Fault::Broken)
            } else {
                state.fault_for(sql)
            }
        };
        match fault {
            Some(Fault::Hang) => std::future::pending::<()>().await,
            Some(Fault::Fail) => return Err(DbError::Query(format!("mock: '{sql}' failed"))),
            Some(Fault::Broken) => {
                return Err(DbError::Connection("mock: broken pipe".to_string()));
            }
            None => {}
        }

        let keyword = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "BEGIN" => {
                self.in_transaction = true;
                self.pending.clear();
            }
            "COMMIT" => {
                self.in_transaction = false;
                let writes = std::mem::take(&mut self.pending);
                self.state.lock().committed.extend(writes);
            }
            "ROLLBACK" => {
                self.in_transaction = false;
                self.pending.clear();
            }
            "INSERT" | "UPDATE" | "DELETE" => {
                if self.in_transaction {
                    self.pending.push(sql.to_string());
                } else {
                    self.state.lock().committed.push(sql.to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.run(sql).await?;
        Ok(1)
    }

    async fn fetch_scalar(&mut self, sql: &str) -> Result<Option<String>, DbError> {
        self.run(sql).await?;
        Ok(self.state.lock().scalar.clone())
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.run("SELECT 1").await
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.state.lock().closed += 1;
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.lock().dropped += 1;
    }
}

/// Polls `condition` until it holds, for background cleanup that runs on a
/// spawned task. Panics after roughly one second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition was not reached in time");
}
