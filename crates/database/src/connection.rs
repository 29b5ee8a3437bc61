use crate::descriptor::ConnectionDescriptor;
use crate::error::DbError;
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Executor, PgConnection};
use std::str::FromStr;

/// One physical connection to the database.
///
/// Statements on a connection are strictly sequential; callers hold it
/// through `&mut` and never share it between tasks.
#[async_trait]
pub trait Connection: Send {
    /// Runs a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    /// Runs a query and returns the first column of the first row as text.
    async fn fetch_scalar(&mut self, sql: &str) -> Result<Option<String>, DbError>;

    /// Cheapest possible round trip.
    async fn ping(&mut self) -> Result<(), DbError>;

    /// Gracefully terminates the connection.
    async fn close(self: Box<Self>) -> Result<(), DbError>;
}

/// Opens new physical connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError>;

    /// Where this connector points, safe for logging.
    fn describe(&self) -> String;
}

// ==============================================================================
// PostgreSQL (sqlx)
// ==============================================================================

/// Connects to PostgreSQL with a bare `sqlx::PgConnection` per call.
pub struct PgConnector {
    options: PgConnectOptions,
    descriptor: ConnectionDescriptor,
    echo: bool,
}

impl PgConnector {
    pub fn new(descriptor: ConnectionDescriptor, echo: bool) -> Result<Self, DbError> {
        let options = PgConnectOptions::from_str(&descriptor.url()).map_err(|e| {
            DbError::Connection(format!(
                "invalid connection URL {}: {e}",
                descriptor.redacted_url()
            ))
        })?;
        // With echo on, PgConn logs each statement itself.
        let options = options.disable_statement_logging();

        Ok(Self {
            options,
            descriptor,
            echo,
        })
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let inner = self.options.connect().await.map_err(|e| {
            DbError::Connection(format!("{}: {e}", self.descriptor.redacted_url()))
        })?;
        tracing::debug!(url = %self.descriptor.redacted_url(), "Opened database connection");
        Ok(Box::new(PgConn {
            inner,
            echo: self.echo,
        }))
    }

    fn describe(&self) -> String {
        self.descriptor.redacted_url()
    }
}

struct PgConn {
    inner: PgConnection,
    echo: bool,
}

impl PgConn {
    fn echo(&self, sql: &str) {
        if self.echo {
            tracing::info!(target: "database::echo", "{sql}");
        }
    }
}

#[async_trait]
impl Connection for PgConn {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.echo(sql);
        let result = (&mut self.inner).execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_scalar(&mut self, sql: &str) -> Result<Option<String>, DbError> {
        self.echo(sql);
        let value = sqlx::query_scalar::<_, String>(sql)
            .fetch_optional(&mut self.inner)
            .await?;
        Ok(value)
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.echo("SELECT 1");
        sqlx::Connection::ping(&mut self.inner).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        sqlx::Connection::close(self.inner).await?;
        Ok(())
    }
}
