use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Every key this crate understands. Keys are matched case-insensitively;
/// anything not listed here is ignored rather than rejected.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "app_version",
    "debug",
    "app_host",
    "app_port",
    "postgres_db",
    "postgres_user",
    "postgres_password",
    "postgres_host",
    "postgres_port",
    "database_url",
    "database_echo",
    "database_pool",
    "database_pool_size",
    "database_acquire_timeout",
    "database_probe_timeout",
];

/// The root configuration structure for the entire application.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
}

/// Settings for the HTTP service itself.
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Reported by the health endpoints.
    pub version: String,
    /// Enables verbose logging and the startup migration status check.
    pub debug: bool,
    pub host: String,
    pub port: u16,
}

/// How the connection pool hands out physical connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolStrategy {
    /// Idle connections are kept and reused, bounded by `max_connections`.
    #[default]
    Queue,
    /// A fresh connection per acquire, closed again on release.
    /// Suited to one-shot tools such as the migration status command.
    Null,
}

impl FromStr for PoolStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" | "queuepool" | "pool" => Ok(PoolStrategy::Queue),
            "null" | "nullpool" | "none" => Ok(PoolStrategy::Null),
            other => Err(ConfigError::ValidationError(format!(
                "unknown pool strategy '{other}' (expected 'queue' or 'null')"
            ))),
        }
    }
}

impl fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolStrategy::Queue => f.write_str("queue"),
            PoolStrategy::Null => f.write_str("null"),
        }
    }
}

/// Database connection and pool settings.
///
/// The connection components are always populated (with defaults); when
/// `url` is set it replaces them wholesale.
#[derive(Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub url: Option<String>,
    /// Log every statement sent to the database.
    pub echo: bool,
    pub pool_strategy: PoolStrategy,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

// The password must never reach the logs, so Debug is written by hand.
impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("echo", &self.echo)
            .field("pool_strategy", &self.pool_strategy)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .finish()
    }
}

// ==============================================================================
// Raw (flat) representation
// ==============================================================================

/// The flat shape the sources are deserialized into before being grouped.
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default = "default_app_version")]
    app_version: String,
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_host")]
    app_host: String,
    #[serde(default = "default_port")]
    app_port: u16,

    #[serde(default = "default_postgres_db")]
    postgres_db: String,
    #[serde(default = "default_postgres_user")]
    postgres_user: String,
    #[serde(default = "default_postgres_password")]
    postgres_password: String,
    #[serde(default = "default_postgres_host")]
    postgres_host: String,
    #[serde(default = "default_postgres_port")]
    postgres_port: u16,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    database_echo: bool,
    #[serde(default = "default_database_pool")]
    database_pool: String,
    #[serde(default = "default_database_pool_size")]
    database_pool_size: u32,
    #[serde(default = "default_acquire_timeout")]
    database_acquire_timeout: u64,
    #[serde(default = "default_probe_timeout")]
    database_probe_timeout: u64,
}

fn default_app_version() -> String {
    "1.0.0".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_postgres_db() -> String {
    "resume_agent".to_string()
}
fn default_postgres_user() -> String {
    "postgres".to_string()
}
fn default_postgres_password() -> String {
    "password".to_string()
}
fn default_postgres_host() -> String {
    "postgres".to_string()
}
fn default_postgres_port() -> u16 {
    5432
}
fn default_database_pool() -> String {
    "queue".to_string()
}
fn default_database_pool_size() -> u32 {
    10
}
fn default_acquire_timeout() -> u64 {
    5
}
fn default_probe_timeout() -> u64 {
    2
}

impl TryFrom<RawSettings> for Settings {
    type Error = ConfigError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        Ok(Settings {
            app: AppSettings {
                version: raw.app_version,
                debug: raw.debug,
                host: raw.app_host,
                port: raw.app_port,
            },
            database: DatabaseSettings {
                host: raw.postgres_host,
                port: raw.postgres_port,
                name: raw.postgres_db,
                user: raw.postgres_user,
                password: raw.postgres_password,
                // An empty DATABASE_URL means "not set".
                url: raw.database_url.filter(|url| !url.trim().is_empty()),
                echo: raw.database_echo,
                pool_strategy: raw.database_pool.parse()?,
                max_connections: raw.database_pool_size,
                acquire_timeout_secs: raw.database_acquire_timeout,
                probe_timeout_secs: raw.database_probe_timeout,
            },
        })
    }
}

impl Settings {
    /// Builds settings from an explicit list of key/value pairs, as if they
    /// were environment variables. Unrecognized keys are skipped.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::build(config::Config::builder(), vars)
    }

    pub(crate) fn build<I, K, V>(
        mut builder: config::ConfigBuilder<config::builder::DefaultState>,
        vars: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let key = key.as_ref().to_ascii_lowercase();
            if RECOGNIZED_KEYS.contains(&key.as_str()) {
                builder = builder.set_override(key, value.into())?;
            }
        }

        let raw = builder.build()?.try_deserialize::<RawSettings>()?;
        let settings = Settings::try_from(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values that would only fail later, at connect time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        if db.url.is_none() {
            if db.host.trim().is_empty() {
                return Err(invalid("POSTGRES_HOST must not be empty"));
            }
            if db.user.trim().is_empty() {
                return Err(invalid("POSTGRES_USER must not be empty"));
            }
            if db.name.trim().is_empty() {
                return Err(invalid("POSTGRES_DB must not be empty"));
            }
            if db.port == 0 {
                return Err(invalid("POSTGRES_PORT must be greater than zero"));
            }
        }
        if db.max_connections == 0 {
            return Err(invalid("DATABASE_POOL_SIZE must be at least 1"));
        }
        if db.acquire_timeout_secs == 0 {
            return Err(invalid("DATABASE_ACQUIRE_TIMEOUT must be at least 1 second"));
        }
        if db.probe_timeout_secs == 0 {
            return Err(invalid("DATABASE_PROBE_TIMEOUT must be at least 1 second"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = Settings::from_vars(no_vars()).unwrap();

        assert_eq!(settings.app.version, "1.0.0");
        assert!(!settings.app.debug);
        assert_eq!(settings.app.port, 8000);
        assert_eq!(settings.database.host, "postgres");
        assert_eq!(settings.database.port, 5432);
        assert_eq!(settings.database.name, "resume_agent");
        assert_eq!(settings.database.user, "postgres");
        assert_eq!(settings.database.password, "password");
        assert_eq!(settings.database.url, None);
        assert_eq!(settings.database.pool_strategy, PoolStrategy::Queue);
        assert_eq!(settings.database.acquire_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let settings = Settings::from_vars([
            ("POSTGRES_HOST", "db.internal"),
            ("postgres_port", "6543"),
            ("Debug", "true"),
            ("APP_VERSION", "2.3.4"),
        ])
        .unwrap();

        assert_eq!(settings.database.host, "db.internal");
        assert_eq!(settings.database.port, 6543);
        assert!(settings.app.debug);
        assert_eq!(settings.app.version, "2.3.4");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings = Settings::from_vars([
            ("PATH", "/usr/bin"),
            ("SOME.WEIRD[KEY]", "x"),
            ("POSTGRES_DB", "other"),
        ])
        .unwrap();

        assert_eq!(settings.database.name, "other");
    }

    #[test]
    fn bind_address_ignores_shell_host_and_port() {
        let settings = Settings::from_vars([
            ("HOST", "workstation.local"),
            ("PORT", "1234"),
        ])
        .unwrap();
        assert_eq!(settings.app.host, "0.0.0.0");
        assert_eq!(settings.app.port, 8000);

        let settings =
            Settings::from_vars([("APP_HOST", "127.0.0.1"), ("app_port", "9000")]).unwrap();
        assert_eq!(settings.app.host, "127.0.0.1");
        assert_eq!(settings.app.port, 9000);
    }

    #[test]
    fn empty_database_url_counts_as_unset() {
        let settings = Settings::from_vars([("DATABASE_URL", "  ")]).unwrap();
        assert_eq!(settings.database.url, None);
    }

    #[test]
    fn pool_strategy_is_parsed_loosely() {
        let settings = Settings::from_vars([("DATABASE_POOL", "NullPool")]).unwrap();
        assert_eq!(settings.database.pool_strategy, PoolStrategy::Null);

        let err = Settings::from_vars([("DATABASE_POOL", "sharded")]).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let err = Settings::from_vars([("DATABASE_POOL_SIZE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_port_is_a_load_error() {
        let err = Settings::from_vars([("POSTGRES_PORT", "not-a-port")]).unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }

    #[test]
    fn debug_output_hides_credentials() {
        let settings = Settings::from_vars([
            ("POSTGRES_PASSWORD", "hunter2"),
            ("DATABASE_URL", "postgresql://u:hunter2@h/db"),
        ])
        .unwrap();

        let rendered = format!("{:?}", settings.database);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
