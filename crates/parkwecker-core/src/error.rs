use std::path::PathBuf;

use thiserror::Error;

/// Failures of the Cache Store. Absorbed everywhere except install.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache entry {0}")]
    Corrupt(String, #[source] serde_json::Error),

    #[error("Failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid cache generation name: {0}")]
    InvalidName(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Transport-level failures of the Network Fetch capability.
///
/// HTTP error statuses are not failures; they come back as responses.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Offline")]
    Offline,

    #[error("Unsupported request: {0}")]
    Unsupported(String),
}

/// Install failures. The new generation is not marked ready.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to fetch core file {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Core file {url} returned unusable response (status {status})")]
    BadResponse { url: String, status: u16 },

    #[error("Invalid core file path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Cache store failure during install: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lifecycle operations invoked out of order by the host.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Cannot {operation} while worker is {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::lifecycle::WorkerState,
    },
}
