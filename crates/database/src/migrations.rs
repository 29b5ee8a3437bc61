//! Read-only view of the schema migration state.
//!
//! Migrations themselves are applied by an external tool (`sqlx migrate`),
//! which records them in `_sqlx_migrations`. This module only reports the
//! newest applied version so a developer can spot a stale schema at startup.

use crate::session::SessionManager;
use std::fmt;

const CURRENT_VERSION_SQL: &str = "SELECT version::text FROM _sqlx_migrations \
     WHERE success ORDER BY version DESC LIMIT 1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    /// The newest successfully applied migration version.
    Current(String),
    NoneApplied,
    /// The state could not be read (database down, table missing, ...).
    Unavailable(String),
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStatus::Current(version) => write!(f, "current version {version}"),
            MigrationStatus::NoneApplied => f.write_str("no migrations applied"),
            MigrationStatus::Unavailable(reason) => write!(f, "unavailable ({reason})"),
        }
    }
}

/// Looks up the current migration version inside a short read-only session.
/// Never fails; problems are folded into [`MigrationStatus::Unavailable`].
pub async fn migration_status(sessions: &SessionManager) -> MigrationStatus {
    let result = sessions
        .run(|session| Box::pin(async move { session.fetch_scalar(CURRENT_VERSION_SQL).await }))
        .await;

    match result {
        Ok(Some(version)) => MigrationStatus::Current(version),
        Ok(None) => MigrationStatus::NoneApplied,
        Err(e) => MigrationStatus::Unavailable(e.to_string()),
    }
}

/// Logs the migration state the way the server does at startup in debug mode.
pub async fn log_migration_status(sessions: &SessionManager) {
    match migration_status(sessions).await {
        MigrationStatus::Current(version) => {
            tracing::info!(%version, "Current database migration version");
        }
        MigrationStatus::NoneApplied => {
            tracing::warn!("No migrations have been applied yet");
        }
        MigrationStatus::Unavailable(reason) => {
            tracing::warn!(%reason, "Could not check migration status");
        }
    }
}
