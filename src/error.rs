use std::path::PathBuf;

use thiserror::Error;

/// Convenient result alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// vmexecd library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read configuration file at {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Configuration at {path} could not be parsed: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Configuration validation failed: {message}")]
    InvalidConfig { message: String },

    #[error("request rejected: {message}")]
    BadRequest { message: String },

    #[error("failed to stage execution filesystem: {message}")]
    Staging { message: String },

    #[error("failed to start hypervisor: {message}")]
    HypervisorStart { message: String },

    #[error("hypervisor configuration call failed: {message}")]
    HypervisorConfig { message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
        }
    }

    pub fn staging(message: impl Into<String>) -> Self {
        Error::Staging {
            message: message.into(),
        }
    }

    pub fn hypervisor_start(message: impl Into<String>) -> Self {
        Error::HypervisorStart {
            message: message.into(),
        }
    }

    pub fn hypervisor_config(message: impl Into<String>) -> Self {
        Error::HypervisorConfig {
            message: message.into(),
        }
    }

    /// Whether this error should be surfaced to the caller as HTTP 400 rather
    /// than HTTP 500. Mirrors the validation/internal split in `src/app/error.rs`
    /// of the orchestrator this service is descended from.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Error::BadRequest { .. })
    }
}
