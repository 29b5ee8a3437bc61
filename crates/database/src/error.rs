use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// The network or authentication handshake with the server failed.
    #[error("Failed to connect to the database: {0}")]
    Connection(String),

    #[error("Timed out after {0:?} waiting for a database connection")]
    AcquireTimeout(std::time::Duration),

    #[error("The connection pool has been disposed")]
    PoolClosed,

    /// The session manager could not obtain a connection for a new session.
    #[error("Could not open a database session: {0}")]
    SessionAcquisition(#[source] Box<DbError>),

    /// BEGIN, COMMIT or ROLLBACK itself failed.
    #[error("Transaction {operation} failed: {message}")]
    Transaction {
        operation: &'static str,
        message: String,
    },

    /// A statement issued inside a session failed.
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid schema identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Lifecycle misuse: {0}")]
    Lifecycle(String),
}

impl DbError {
    pub(crate) fn transaction(operation: &'static str, source: impl std::fmt::Display) -> Self {
        DbError::Transaction {
            operation,
            message: source.to_string(),
        }
    }

    /// True for errors that mean "the database could not be reached right now",
    /// as opposed to errors in the work itself.
    pub fn is_unavailable(&self) -> bool {
        match self {
            DbError::Connection(_) | DbError::AcquireTimeout(_) | DbError::PoolClosed => true,
            DbError::SessionAcquisition(inner) => inner.is_unavailable(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => DbError::Connection(err.to_string()),
            other => DbError::Query(other.to_string()),
        }
    }
}
