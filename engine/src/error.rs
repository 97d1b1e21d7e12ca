//! Error types for the feedsync engine.

use crate::{PostId, UserId};
use thiserror::Error;

/// Validation errors raised before anything is written or queued for sync.
///
/// These are never retried: the caller has to fix the input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("post title must not be empty")]
    EmptyTitle,

    #[error("post body must not be empty")]
    EmptyBody,

    #[error("invalid author id: {0}")]
    InvalidAuthor(UserId),

    #[error("invalid post id: {0}")]
    InvalidPostId(PostId),

    #[error("no local post with temporary id {0}")]
    UnknownTemporaryPost(PostId),

    #[error("search query must not be empty")]
    EmptyQuery,

    #[error("invalid cache key: {0}")]
    InvalidKey(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
