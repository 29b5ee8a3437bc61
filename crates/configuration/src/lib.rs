//! # Configuration Crate
//!
//! Loads the service settings from an optional `config.toml` and the process
//! environment (after reading a `.env` file when one is present). The result
//! is a validated, strongly-typed [`Settings`] value handed to the rest of
//! the application at startup; nothing is read from the environment after
//! that point.

use crate::error::ConfigError;
use std::path::PathBuf;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{AppSettings, DatabaseSettings, PoolStrategy, Settings, RECOGNIZED_KEYS};

/// What became of the `.env` file. Settings are loaded before logging is
/// set up (the log level depends on them), so the outcome is handed back
/// for the caller to [`EnvFile::log`] once a subscriber is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvFile {
    Loaded(PathBuf),
    Missing,
    Unreadable(String),
}

impl EnvFile {
    fn from_result(result: Result<PathBuf, dotenvy::Error>) -> Self {
        match result {
            Ok(path) => EnvFile::Loaded(path),
            Err(e) if e.not_found() => EnvFile::Missing,
            Err(e) => EnvFile::Unreadable(e.to_string()),
        }
    }

    pub fn log(&self) {
        match self {
            EnvFile::Loaded(path) => {
                tracing::debug!(path = %path.display(), "Loaded environment from .env")
            }
            EnvFile::Missing => {}
            EnvFile::Unreadable(error) => {
                tracing::warn!(%error, "Ignoring unreadable .env file")
            }
        }
    }
}

/// Loads the application configuration.
///
/// Resolution order, later sources winning:
/// 1. built-in defaults
/// 2. `config.toml` in the working directory (optional, lowercase keys)
/// 3. process environment, including anything loaded from `.env`
pub fn load_settings() -> Result<(Settings, EnvFile), ConfigError> {
    let env_file = EnvFile::from_result(dotenvy::dotenv());

    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false));

    let settings = Settings::build(builder, std::env::vars())?;
    Ok((settings, env_file))
}
