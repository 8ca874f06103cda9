//! Configuration error types

use std::path::PathBuf;

use bftledger_crypto::CryptoError;
use bftledger_types::{MembershipError, ProcessId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to parse JSON config at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unsupported membership file format: {0} (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Process {0} is not in the membership")]
    UnknownProcess(ProcessId),

    #[error("Key material error: {0}")]
    Key(#[from] CryptoError),

    #[error("XDG directory error: {0}")]
    Xdg(String),
}

impl From<MembershipError> for ConfigError {
    fn from(error: MembershipError) -> Self {
        Self::Validation(error.to_string())
    }
}
