use crate::connection::{Connector, PgConnector};
use crate::descriptor::ConnectionDescriptor;
use crate::error::DbError;
use crate::pool::{Pool, PoolOptions};
use configuration::DatabaseSettings;
use parking_lot::Mutex;
use std::sync::Arc;

enum State {
    Stopped,
    Starting,
    Running(Pool),
}

/// Process start/stop hooks for the connection pool.
///
/// `on_start` creates the pool and checks that the database answers;
/// `on_stop` disposes it. Starting twice without a stop in between is a
/// [`DbError::Lifecycle`] error. Stopping when nothing was started is a no-op.
pub struct Lifecycle {
    connector: Arc<dyn Connector>,
    options: PoolOptions,
    state: Mutex<State>,
}

impl Lifecycle {
    pub fn new(connector: Arc<dyn Connector>, options: PoolOptions) -> Self {
        Self {
            connector,
            options,
            state: Mutex::new(State::Stopped),
        }
    }

    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self, DbError> {
        let connector = PgConnector::new(ConnectionDescriptor::from_settings(settings), settings.echo)?;
        Ok(Self::new(Arc::new(connector), PoolOptions::from_settings(settings)))
    }

    pub async fn on_start(&self) -> Result<Pool, DbError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Stopped) {
                return Err(DbError::Lifecycle(
                    "on_start called while the pool is already started".to_string(),
                ));
            }
            *state = State::Starting;
        }

        let pool = Pool::new(self.connector.clone(), self.options.clone());
        let guard = StartGuard {
            state: &self.state,
            pending: Some(pool.clone()),
        };

        if let Err(e) = verify(&pool).await {
            guard.abort().await;
            tracing::error!(error = %e, "Database is not reachable at startup");
            return Err(e);
        }

        guard.complete(pool.clone());
        tracing::info!("Database pool initialized");
        Ok(pool)
    }

    pub async fn on_stop(&self) {
        let pool = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(pool) => pool,
                State::Starting => {
                    // Let the in-flight start finish and record itself.
                    *state = State::Starting;
                    tracing::warn!("on_stop called while the pool is still starting; ignoring");
                    return;
                }
                State::Stopped => {
                    tracing::debug!("on_stop called without a running pool; nothing to do");
                    return;
                }
            }
        };

        pool.dispose().await;
        tracing::info!("Database pool shut down");
    }

    /// The running pool, if any.
    pub fn pool(&self) -> Option<Pool> {
        match &*self.state.lock() {
            State::Running(pool) => Some(pool.clone()),
            _ => None,
        }
    }
}

/// Owns the `Starting` state for the duration of `on_start`. If the start
/// neither completes nor aborts (its future was dropped mid-verify), drop
/// puts the coordinator back to `Stopped` and disposes the half-built pool.
struct StartGuard<'a> {
    state: &'a Mutex<State>,
    pending: Option<Pool>,
}

impl StartGuard<'_> {
    fn complete(mut self, pool: Pool) {
        self.pending = None;
        *self.state.lock() = State::Running(pool);
    }

    async fn abort(mut self) {
        if let Some(pool) = self.pending.take() {
            *self.state.lock() = State::Stopped;
            pool.dispose().await;
        }
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        let Some(pool) = self.pending.take() else {
            return;
        };
        *self.state.lock() = State::Stopped;
        tracing::warn!("Database startup was cancelled; pool discarded");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { pool.dispose().await });
        }
    }
}

async fn verify(pool: &Pool) -> Result<(), DbError> {
    let mut conn = pool.acquire().await?;
    conn.ping().await?;
    pool.release(conn).await;
    Ok(())
}
