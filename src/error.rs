use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the process supervisor's control operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process '{0}' is already registered")]
    DuplicateProcess(String),

    #[error("process '{0}' not found")]
    ProcessNotFound(String),

    #[error("invalid process '{name}': {reason}")]
    InvalidProcess { name: String, reason: String },

    #[error("failed to spawn process '{name}': {source}")]
    ProcessSpawn {
        name: String,
        source: std::io::Error,
    },

    #[error("process '{0}' has exhausted its restart attempts")]
    RetriesExhausted(String),

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors raised while reading or writing the supervisor state file
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot encode state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("state I/O task failed: {0}")]
    Task(String),
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
