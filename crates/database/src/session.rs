//! Sessions: one connection plus one explicit transaction per unit of work.
//!
//! A [`Session`] starts with `BEGIN` and ends in exactly one of two terminal
//! states, committed or rolled back. Nothing is committed implicitly; writes
//! become visible only through [`Session::commit`].
//!
//! A session that goes out of scope while still active (early return,
//! panic, cancelled future) is rolled back and its connection released on a
//! background task, so no exit path leaks a connection.

use crate::error::DbError;
use crate::pool::{Pool, PooledConnection};
use futures::future::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Committed,
    RolledBack,
}

/// Hands out sessions over a shared [`Pool`].
#[derive(Debug, Clone)]
pub struct SessionManager {
    pool: Pool,
}

impl SessionManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Borrows a connection and begins a transaction on it.
    pub async fn open_session(&self) -> Result<Session, DbError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::SessionAcquisition(Box::new(e)))?;

        if let Err(e) = conn.execute("BEGIN").await {
            conn.discard().await;
            // A connection that died under BEGIN means no usable connection
            // could be obtained, not that a transaction failed.
            if e.is_unavailable() {
                return Err(DbError::SessionAcquisition(Box::new(e)));
            }
            return Err(DbError::transaction("begin", e));
        }

        Ok(Session {
            conn: Some(conn),
            pool: self.pool.clone(),
            state: SessionState::Active,
        })
    }

    /// Runs `work` inside a fresh session.
    ///
    /// Commits when `work` returns `Ok`. When it returns `Err`, the
    /// transaction is rolled back and that same error value is returned to
    /// the caller untouched; a failing rollback is only logged. Errors of the
    /// session itself (acquisition, commit) are converted with `E::from`.
    ///
    /// ```rust,ignore
    /// let id = sessions
    ///     .run(|session| Box::pin(async move {
    ///         session.execute("INSERT INTO resume (title) VALUES ('cv')").await?;
    ///         Ok::<_, AppError>(())
    ///     }))
    ///     .await?;
    /// ```
    pub async fn run<F, T, E>(&self, work: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        let mut session = self.open_session().await?;

        match work(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    tracing::error!(error = %rollback_err, "Rollback failed after unit of work error");
                }
                Err(err)
            }
        }
    }
}

/// A unit of work's exclusive hold on one connection and its transaction.
pub struct Session {
    // `Some` while active; taken by the terminal operations and by drop.
    conn: Option<PooledConnection>,
    pool: Pool,
    state: SessionState,
}

impl Session {
    fn conn(&mut self) -> Result<&mut PooledConnection, DbError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::Query("session is no longer active".to_string()))
    }

    pub async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.conn()?.execute(sql).await
    }

    pub async fn fetch_scalar(&mut self, sql: &str) -> Result<Option<String>, DbError> {
        self.conn()?.fetch_scalar(sql).await
    }

    /// Commits and releases the connection.
    ///
    /// On failure the server has already aborted the transaction; the
    /// connection is discarded rather than returned.
    pub async fn commit(mut self) -> Result<(), DbError> {
        let Some(mut conn) = self.conn.take() else {
            return Err(DbError::transaction("commit", "session is no longer active"));
        };

        match conn.execute("COMMIT").await {
            Ok(_) => {
                self.state = SessionState::Committed;
                self.pool.release(conn).await;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::RolledBack;
                conn.discard().await;
                Err(DbError::transaction("commit", e))
            }
        }
    }

    /// Rolls back and releases the connection. A connection whose rollback
    /// failed is discarded; closing it aborts the transaction server-side.
    pub async fn rollback(mut self) -> Result<(), DbError> {
        let Some(mut conn) = self.conn.take() else {
            return Err(DbError::transaction("rollback", "session is no longer active"));
        };
        self.state = SessionState::RolledBack;

        match conn.execute("ROLLBACK").await {
            Ok(_) => {
                self.pool.release(conn).await;
                Ok(())
            }
            Err(e) => {
                conn.discard().await;
                Err(DbError::transaction("rollback", e))
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("state", &self.state).finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        self.state = SessionState::RolledBack;

        let pool = self.pool.clone();
        let timeout = pool.options().acquire_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Active session dropped; rolling back in the background");
                handle.spawn(async move {
                    match tokio::time::timeout(timeout, conn.execute("ROLLBACK")).await {
                        Ok(Ok(_)) => pool.release(conn).await,
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "Background rollback failed; discarding connection");
                            conn.discard().await;
                        }
                        Err(_) => {
                            tracing::warn!("Background rollback timed out; discarding connection");
                        }
                    }
                });
            }
            Err(_) => {
                // No runtime to roll back on. Dropping the connection closes
                // the socket, which aborts the transaction server-side.
                tracing::warn!("Active session dropped outside a runtime; discarding connection");
                drop(conn);
            }
        }
    }
}
