use crate::error::DbError;
use crate::pool::Pool;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on a single connectivity check.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether the database answered the last probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Connected,
    Disconnected,
}

impl DatabaseStatus {
    pub fn is_connected(self) -> bool {
        self == DatabaseStatus::Connected
    }
}

/// Answers "is the database reachable right now" within a bounded time.
///
/// Every check borrows its own connection and gives it back (or discards
/// it) before returning; no session is reused or pinned between checks.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    pool: Pool,
    default_timeout: Duration,
}

impl LivenessProbe {
    pub fn new(pool: Pool) -> Self {
        Self::with_timeout(pool, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(pool: Pool, default_timeout: Duration) -> Self {
        Self {
            pool,
            default_timeout,
        }
    }

    /// Runs a `SELECT 1` round trip.
    ///
    /// Never fails: a timeout or any connection fault is reported as
    /// [`DatabaseStatus::Disconnected`]. `timeout` overrides the default for
    /// this call only.
    pub async fn check_connectivity(&self, timeout: Option<Duration>) -> DatabaseStatus {
        let timeout = timeout.unwrap_or(self.default_timeout);

        match tokio::time::timeout(timeout, self.round_trip()).await {
            Ok(Ok(())) => DatabaseStatus::Connected,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Database liveness probe failed");
                DatabaseStatus::Disconnected
            }
            Err(_) => {
                tracing::warn!(?timeout, "Database liveness probe timed out");
                DatabaseStatus::Disconnected
            }
        }
    }

    async fn round_trip(&self) -> Result<(), DbError> {
        let mut conn = self.pool.acquire().await?;
        // A failed ping drops `conn` without release, which discards it.
        conn.ping().await?;
        self.pool.release(conn).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolOptions;
    use crate::testing::MockConnector;
    use configuration::PoolStrategy;
    use std::sync::Arc;

    fn probe(connector: &MockConnector) -> LivenessProbe {
        let pool = Pool::new(
            Arc::new(connector.clone()),
            PoolOptions {
                strategy: PoolStrategy::Queue,
                max_connections: 2,
                acquire_timeout: Duration::from_secs(5),
            },
        );
        LivenessProbe::with_timeout(pool, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn reachable_database_is_connected() {
        let connector = MockConnector::new();
        let probe = probe(&connector);

        assert_eq!(probe.check_connectivity(None).await, DatabaseStatus::Connected);
        assert_eq!(connector.statements(), ["SELECT 1"]);
        assert_eq!(probe.pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn connect_failure_is_disconnected_not_an_error() {
        let connector = MockConnector::new();
        connector.fail_connects(true);
        let probe = probe(&connector);

        assert_eq!(probe.check_connectivity(None).await, DatabaseStatus::Disconnected);
    }

    #[tokio::test]
    async fn hanging_connect_is_cut_off_by_the_timeout() {
        let connector = MockConnector::new();
        connector.hang_connects(true);
        let probe = probe(&connector);

        let started = std::time::Instant::now();
        let status = probe
            .check_connectivity(Some(Duration::from_millis(30)))
            .await;

        assert_eq!(status, DatabaseStatus::Disconnected);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn hanging_query_does_not_poison_the_pool() {
        let connector = MockConnector::new();
        connector.hang_on("SELECT 1");
        let probe = probe(&connector);

        assert_eq!(probe.check_connectivity(None).await, DatabaseStatus::Disconnected);
        assert_eq!(probe.pool.status().idle, 0);
        assert_eq!(probe.pool.status().in_use, 0);
        assert_eq!(connector.live(), 0);

        connector.clear_faults();
        assert_eq!(probe.check_connectivity(None).await, DatabaseStatus::Connected);
    }

    #[tokio::test]
    async fn server_restart_does_not_make_a_reachable_database_look_down() {
        let connector = MockConnector::new();
        let pool = Pool::new(
            Arc::new(connector.clone()),
            PoolOptions {
                strategy: PoolStrategy::Queue,
                max_connections: 3,
                acquire_timeout: Duration::from_secs(5),
            },
        );
        let held = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        for conn in held {
            pool.release(conn).await;
        }
        let probe = LivenessProbe::with_timeout(pool, Duration::from_millis(500));

        connector.restart();

        for _ in 0..4 {
            assert_eq!(probe.check_connectivity(None).await, DatabaseStatus::Connected);
        }
        assert_eq!(connector.live(), 1);
    }

    #[tokio::test]
    async fn disposed_pool_is_disconnected() {
        let connector = MockConnector::new();
        let probe = probe(&connector);
        probe.pool.dispose().await;

        assert_eq!(probe.check_connectivity(None).await, DatabaseStatus::Disconnected);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DatabaseStatus::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }
}
