//! Connection pool implementation.
//!
//! The pool is the only shared mutable resource in the service. It is created
//! once (by the lifecycle coordinator or a one-shot command), passed by
//! reference to everything that needs connections, and disposed exactly once.
//!
//! Two strategies are supported:
//!
//! - [`PoolStrategy::Queue`]: at most `max_connections` connections exist at
//!   once; released connections are kept idle and handed out again.
//! - [`PoolStrategy::Null`]: every acquire opens a fresh connection and every
//!   release closes it. Nothing is cached, nothing is bounded.

use crate::connection::{Connection, Connector, PgConnector};
use crate::descriptor::ConnectionDescriptor;
use crate::error::DbError;
use configuration::{DatabaseSettings, PoolStrategy};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub strategy: PoolStrategy,
    /// Upper bound on connections checked out at once. Ignored by the null strategy.
    pub max_connections: u32,
    /// How long `acquire` may wait, including the connect handshake.
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            strategy: PoolStrategy::Queue,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolOptions {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            strategy: settings.pool_strategy,
            max_connections: settings.max_connections,
            acquire_timeout: settings.acquire_timeout(),
        }
    }
}

/// A snapshot of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    /// `None` for the null strategy.
    pub max: Option<u32>,
    pub closed: bool,
}

/// A pool of PostgreSQL connections.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    options: PoolOptions,
    /// Guarded together with `closed` so a release racing a dispose can never
    /// park a connection in a pool that has already been drained.
    idle: Mutex<Vec<Box<dyn Connection>>>,
    /// Capacity bound for the queue strategy.
    permits: Option<Arc<Semaphore>>,
    closed: AtomicBool,
    in_use: AtomicUsize,
}

impl Pool {
    /// Creates a pool without opening any connection; the first `acquire`
    /// does that.
    pub fn new(connector: Arc<dyn Connector>, options: PoolOptions) -> Self {
        let permits = match options.strategy {
            PoolStrategy::Queue => Some(Arc::new(Semaphore::new(
                options.max_connections.max(1) as usize,
            ))),
            PoolStrategy::Null => None,
        };

        tracing::info!(
            url = %connector.describe(),
            strategy = %options.strategy,
            max = options.max_connections,
            "Connection pool created"
        );

        Self {
            inner: Arc::new(PoolInner {
                connector,
                options,
                idle: Mutex::new(Vec::new()),
                permits,
                closed: AtomicBool::new(false),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates a pool backed by [`PgConnector`].
    pub fn for_descriptor(
        descriptor: ConnectionDescriptor,
        echo: bool,
        options: PoolOptions,
    ) -> Result<Self, DbError> {
        let connector = PgConnector::new(descriptor, echo)?;
        Ok(Self::new(Arc::new(connector), options))
    }

    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self, DbError> {
        Self::for_descriptor(
            ConnectionDescriptor::from_settings(settings),
            settings.echo,
            PoolOptions::from_settings(settings),
        )
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    /// Borrows a live idle connection or opens a new one.
    ///
    /// Waits at most `acquire_timeout` for capacity, the idle health checks
    /// and the handshake together.
    pub async fn acquire(&self) -> Result<PooledConnection, DbError> {
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let timeout = self.inner.options.acquire_timeout;
        match tokio::time::timeout(timeout, self.acquire_inner()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?timeout, "Timed out acquiring a database connection");
                Err(DbError::AcquireTimeout(timeout))
            }
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConnection, DbError> {
        let permit = match &self.inner.permits {
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| DbError::PoolClosed)?,
            ),
            None => None,
        };

        // Re-check: dispose may have run while we waited for capacity.
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        // Idle connections may have died while parked (server restart,
        // network blip). Each one is pinged before it is handed out; a dead
        // one is dropped and the next candidate tried, ending in a fresh
        // connect. All of it counts against `acquire_timeout`.
        let conn = loop {
            let reused = self.inner.idle.lock().pop();
            match reused {
                Some(mut conn) => match conn.ping().await {
                    Ok(()) => {
                        tracing::trace!("Reusing idle connection");
                        break conn;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Idle connection is dead; discarding it");
                    }
                },
                None => break self.inner.connector.connect().await?,
            }
        };

        Ok(PooledConnection::new(conn, permit, self.inner.clone()))
    }

    /// Returns a borrowed connection.
    ///
    /// Under the queue strategy the connection is parked for reuse; under the
    /// null strategy, or once the pool is disposed, it is closed.
    pub async fn release(&self, conn: PooledConnection) {
        conn.release().await;
    }

    /// Closes every idle connection and makes further `acquire` calls fail
    /// with [`DbError::PoolClosed`]. Connections still borrowed are closed
    /// when they come back. Calling this more than once is a no-op.
    pub async fn dispose(&self) {
        let drained = {
            let mut idle = self.inner.idle.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *idle)
        };

        if let Some(permits) = &self.inner.permits {
            permits.close();
        }

        let count = drained.len();
        for conn in drained {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "Error closing idle connection during dispose");
            }
        }

        tracing::info!(closed_idle = count, "Connection pool disposed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.inner.idle.lock().len(),
            in_use: self.inner.in_use.load(Ordering::SeqCst),
            max: self
                .inner
                .permits
                .as_ref()
                .map(|_| self.inner.options.max_connections),
            closed: self.is_closed(),
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.inner.connector.describe())
            .field("options", &self.inner.options)
            .field("status", &self.status())
            .finish()
    }
}

/// A connection borrowed from a [`Pool`].
///
/// Hand it back with [`Pool::release`]. Dropping it without doing so
/// discards the physical connection (its state is unknown, e.g. after a
/// timeout mid-statement) and frees its capacity slot.
pub struct PooledConnection {
    // Always `Some` until `release`/`discard` or drop.
    conn: Option<Box<dyn Connection>>,
    _permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn new(
        conn: Box<dyn Connection>,
        permit: Option<OwnedSemaphorePermit>,
        pool: Arc<PoolInner>,
    ) -> Self {
        pool.in_use.fetch_add(1, Ordering::SeqCst);
        Self {
            conn: Some(conn),
            _permit: permit,
            pool,
        }
    }

    async fn release(mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        let to_close = match self.pool.options.strategy {
            PoolStrategy::Queue => {
                let mut idle = self.pool.idle.lock();
                if self.pool.closed.load(Ordering::SeqCst) {
                    Some(conn)
                } else {
                    idle.push(conn);
                    None
                }
            }
            PoolStrategy::Null => Some(conn),
        };

        if let Some(conn) = to_close {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "Error closing released connection");
            }
        }
        // The permit is returned when `self` drops, after the connection is
        // already back in the idle list.
    }

    /// Closes the physical connection instead of returning it to the pool.
    /// Used when its state can no longer be trusted.
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "Error closing discarded connection");
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("released", &self.conn.is_none())
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("connection is present until released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("connection is present until released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
        if self.conn.take().is_some() {
            tracing::debug!("Borrowed connection dropped without release; discarding it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    fn queue_pool(connector: &MockConnector, max: u32) -> Pool {
        Pool::new(
            Arc::new(connector.clone()),
            PoolOptions {
                strategy: PoolStrategy::Queue,
                max_connections: max,
                acquire_timeout: Duration::from_millis(200),
            },
        )
    }

    fn null_pool(connector: &MockConnector) -> Pool {
        Pool::new(
            Arc::new(connector.clone()),
            PoolOptions {
                strategy: PoolStrategy::Null,
                max_connections: 1,
                acquire_timeout: Duration::from_millis(200),
            },
        )
    }

    #[tokio::test]
    async fn pool_is_lazy() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 2);

        assert_eq!(connector.opened(), 0);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(connector.opened(), 1);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn queue_pool_reuses_released_connections() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 2);

        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;
        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;

        assert_eq!(connector.opened(), 1);
        assert_eq!(
            pool.status(),
            PoolStatus {
                idle: 1,
                in_use: 0,
                max: Some(2),
                closed: false
            }
        );
    }

    #[tokio::test]
    async fn dead_idle_connections_are_replaced_on_acquire() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 3);

        let held: Vec<_> = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        for conn in held {
            pool.release(conn).await;
        }
        assert_eq!(pool.status().idle, 3);

        connector.restart();
        let mut conn = pool.acquire().await.unwrap();
        conn.ping().await.unwrap();
        pool.release(conn).await;

        // All three stale connections were tried and thrown away.
        assert_eq!(connector.opened(), 4);
        assert_eq!(connector.live(), 1);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn live_idle_connections_are_checked_before_reuse() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 1);

        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;
        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;

        assert_eq!(connector.statements(), ["SELECT 1"]);
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn null_pool_opens_and_closes_every_time() {
        let connector = MockConnector::new();
        let pool = null_pool(&connector);

        for _ in 0..3 {
            let conn = pool.acquire().await.unwrap();
            pool.release(conn).await;
        }

        assert_eq!(connector.opened(), 3);
        assert_eq!(connector.closed(), 3);
        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().max, None);
    }

    #[tokio::test]
    async fn exhausted_queue_pool_times_out() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 1);

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DbError::AcquireTimeout(_)));

        pool.release(held).await;
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn waiter_gets_the_connection_once_it_is_released() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 1);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.release(held).await;

        waiter.await.unwrap().unwrap();
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_a_connection_error_and_frees_capacity() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 1);

        connector.fail_connects(true);
        assert!(matches!(
            pool.acquire().await,
            Err(DbError::Connection(_))
        ));

        connector.fail_connects(false);
        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn dropped_connection_is_discarded_not_reused() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 1);

        let conn = pool.acquire().await.unwrap();
        drop(conn);

        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().in_use, 0);
        assert_eq!(connector.live(), 0);

        // The capacity slot came back with the drop.
        let conn = pool.acquire().await.unwrap();
        assert_eq!(connector.opened(), 2);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_closes_idle_connections() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 2);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a).await;
        pool.release(b).await;

        pool.dispose().await;
        pool.dispose().await;

        assert!(pool.is_closed());
        assert_eq!(connector.closed(), 2);
        assert_eq!(connector.live(), 0);
        assert!(matches!(pool.acquire().await, Err(DbError::PoolClosed)));
    }

    #[tokio::test]
    async fn connection_released_after_dispose_is_closed() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 2);

        let conn = pool.acquire().await.unwrap();
        pool.dispose().await;
        pool.release(conn).await;

        assert_eq!(pool.status().idle, 0);
        assert_eq!(connector.live(), 0);
    }

    #[tokio::test]
    async fn dispose_wakes_waiters() {
        let connector = MockConnector::new();
        let pool = Pool::new(
            Arc::new(connector.clone()),
            PoolOptions {
                strategy: PoolStrategy::Queue,
                max_connections: 1,
                acquire_timeout: Duration::from_secs(10),
            },
        );

        let _held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.dispose().await;

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(DbError::PoolClosed)));
    }

    #[tokio::test]
    async fn concurrent_acquire_and_release_stay_within_bounds() {
        let connector = MockConnector::new();
        let pool = queue_pool(&connector, 3);

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let conn = loop {
                        match pool.acquire().await {
                            Ok(conn) => break conn,
                            Err(DbError::AcquireTimeout(_)) => continue,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    };
                    tokio::task::yield_now().await;
                    pool.release(conn).await;
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(connector.opened() <= 3);
        assert_eq!(pool.status().in_use, 0);
    }
}
