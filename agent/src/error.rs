//! Unified error handling for the agent.

use crate::{config::ConfigError, remote::RemoteError, store::StorageError};

/// Agent error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A remote failure that may succeed later.
    #[error("Network error: {0}")]
    Network(RemoteError),

    /// The remote refused the request. Retrying the same payload will not help.
    #[error("Remote rejected request: {0}")]
    RemoteRejected(RemoteError),

    #[error("Validation error: {0}")]
    Validation(#[from] feedsync_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        if e.is_retryable() {
            Error::Network(e)
        } else {
            Error::RemoteRejected(e)
        }
    }
}

impl Error {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Storage(_))
    }
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, Error>;
