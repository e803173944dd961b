//! Runtime configuration read from `HEPACHECK_*` environment variables.
//!
//! Field key sources are resolved separately by
//! [`KeySources`](crate::domain::field_crypto::KeySources).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::application::DEFAULT_EXPLAINER_RETRY;

pub const BIND_ADDR_ENV: &str = "HEPACHECK_BIND_ADDR";
pub const ARTIFACT_DIR_ENV: &str = "HEPACHECK_ARTIFACT_DIR";
pub const DB_PATH_ENV: &str = "HEPACHECK_DB_PATH";
pub const EXPLAINER_RETRY_ENV: &str = "HEPACHECK_EXPLAINER_RETRY_SECS";
pub const LOG_MODE_ENV: &str = "HEPACHECK_LOG_MODE";
pub const LOG_FILE_ENV: &str = "HEPACHECK_LOG_FILE";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_ARTIFACT_DIR: &str = "artifacts";
const DEFAULT_DB_PATH: &str = "hepacheck.db";
const DEFAULT_LOG_FILE: &str = "hepacheck.log";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not a valid socket address: {value}")]
    InvalidAddress { name: &'static str, value: String },

    #[error("{name} must be a non-negative integer, got {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must be one of stdout, file, auto; got {value}")]
    InvalidLogMode { name: &'static str, value: String },
}

/// Where formatted log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Stdout,
    File,
    /// File when stdout is a terminal, stdout otherwise
    Auto,
}

impl LogMode {
    /// Resolve `Auto` against the current terminal state.
    #[must_use]
    pub fn use_file(self, interactive: bool) -> bool {
        match self {
            Self::Stdout => false,
            Self::File => true,
            Self::Auto => interactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub artifact_dir: PathBuf,
    /// `None` disables persistence.
    pub db_path: Option<PathBuf>,
    pub explainer_retry: Duration,
    pub log_mode: LogMode,
    pub log_file: PathBuf,
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable is set to an unparsable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string());

        let bind_addr = match get(BIND_ADDR_ENV).filter(|v| !v.is_empty()) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidAddress {
                name: BIND_ADDR_ENV,
                value,
            })?,
            None => DEFAULT_BIND_ADDR
                .parse()
                .map_err(|_| ConfigError::InvalidAddress {
                    name: BIND_ADDR_ENV,
                    value: DEFAULT_BIND_ADDR.to_string(),
                })?,
        };

        let artifact_dir = get(ARTIFACT_DIR_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ARTIFACT_DIR.to_string())
            .into();

        // Set-but-empty disables persistence; unset uses the default.
        let db_path = match get(DB_PATH_ENV) {
            Some(value) if value.is_empty() => None,
            Some(value) => Some(PathBuf::from(value)),
            None => Some(PathBuf::from(DEFAULT_DB_PATH)),
        };

        let explainer_retry = match get(EXPLAINER_RETRY_ENV).filter(|v| !v.is_empty()) {
            Some(value) => value
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidNumber {
                    name: EXPLAINER_RETRY_ENV,
                    value,
                })?,
            None => DEFAULT_EXPLAINER_RETRY,
        };

        let log_mode = match get(LOG_MODE_ENV).filter(|v| !v.is_empty()) {
            None => LogMode::Auto,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "stdout" => LogMode::Stdout,
                "file" => LogMode::File,
                "auto" => LogMode::Auto,
                _ => {
                    return Err(ConfigError::InvalidLogMode {
                        name: LOG_MODE_ENV,
                        value,
                    })
                }
            },
        };

        let log_file = get(LOG_FILE_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string())
            .into();

        Ok(Self {
            bind_addr,
            artifact_dir,
            db_path,
            explainer_retry,
            log_mode,
            log_file,
        })
    }
}
