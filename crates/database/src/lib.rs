//! # Database Crate
//!
//! Owns everything between the service and PostgreSQL: where to connect,
//! how connections are pooled, how a unit of work gets its transaction, and
//! how readiness is probed.
//!
//! ## Architectural Principles
//!
//! - **Explicit ownership:** there is no global engine. The [`Lifecycle`]
//!   coordinator creates one [`Pool`] at process start and disposes it at
//!   stop; the pool is passed by handle to the [`SessionManager`] and the
//!   [`LivenessProbe`].
//! - **Scoped transactions:** a [`Session`] always ends in exactly one of
//!   commit or rollback, and its connection is released on every exit path,
//!   including panics and cancelled futures.
//! - **A narrow driver seam:** pooling and transactions talk to the
//!   [`Connection`]/[`Connector`] traits. [`PgConnector`] is the sqlx-backed
//!   production implementation; `testing::MockConnector` is an in-memory one.
//!
//! ## Public API
//!
//! - `ConnectionDescriptor`: resolves the canonical connection URL.
//! - `Pool`, `PoolOptions`: acquire/release/dispose of physical connections.
//! - `SessionManager`, `Session`: one transaction per unit of work.
//! - `LivenessProbe`, `DatabaseStatus`: bounded connectivity check.
//! - `Lifecycle`: start/stop hooks.
//! - `naming::name_for`: schema object naming convention.
//! - `migrations::migration_status`: read-only migration version lookup.
//! - `DbError`: the error type of this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod lifecycle;
pub mod migrations;
pub mod naming;
pub mod pool;
pub mod probe;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{Connection, Connector, PgConnector};
pub use descriptor::ConnectionDescriptor;
pub use error::DbError;
pub use lifecycle::Lifecycle;
pub use migrations::{MigrationStatus, log_migration_status, migration_status};
pub use naming::{ConstraintKind, NAMING_CONVENTION, name_for};
pub use pool::{Pool, PoolOptions, PoolStatus, PooledConnection};
pub use probe::{DEFAULT_PROBE_TIMEOUT, DatabaseStatus, LivenessProbe};
pub use session::{Session, SessionManager};
