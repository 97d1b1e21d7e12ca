//! Remote data source: the abstract capability the cache and sync engine
//! talk to, plus its error taxonomy.

mod credentials;
mod http;

pub use credentials::{CredentialProvider, StaticToken};
pub use http::HttpRemoteSource;

use async_trait::async_trait;
use feedsync_engine::{Comment, Post, PostId, User, UserId};

/// Why a remote call failed. Decided where the failure happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Could not reach the remote
    Connection,
    /// The remote did not answer in time
    Timeout,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    Server(u16),
    /// HTTP 4xx other than the ones below: the payload itself is refused
    Rejected(u16),
    NotFound,
    /// HTTP 401/403. Retryable: the credential provider may refresh the token.
    Unauthorized,
    /// The response body could not be decoded
    Decode,
}

impl RemoteErrorKind {
    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteErrorKind::Connection
                | RemoteErrorKind::Timeout
                | RemoteErrorKind::RateLimited
                | RemoteErrorKind::Server(_)
                | RemoteErrorKind::Unauthorized
        )
    }

    /// Classify an unsuccessful HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => RemoteErrorKind::Unauthorized,
            404 => RemoteErrorKind::NotFound,
            429 => RemoteErrorKind::RateLimited,
            500..=599 => RemoteErrorKind::Server(status),
            _ => RemoteErrorKind::Rejected(status),
        }
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteErrorKind::Connection => write!(f, "connection failed"),
            RemoteErrorKind::Timeout => write!(f, "timed out"),
            RemoteErrorKind::RateLimited => write!(f, "rate limited"),
            RemoteErrorKind::Server(status) => write!(f, "server error {}", status),
            RemoteErrorKind::Rejected(status) => write!(f, "rejected with {}", status),
            RemoteErrorKind::NotFound => write!(f, "not found"),
            RemoteErrorKind::Unauthorized => write!(f, "unauthorized"),
            RemoteErrorKind::Decode => write!(f, "invalid response"),
        }
    }
}

/// A failed remote call. `retryable` is fixed at construction from the kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    kind: RemoteErrorKind,
    message: String,
    retryable: bool,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Decode, message)
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::from_status(status), message)
    }

    pub fn kind(&self) -> RemoteErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote records the cache mirrors.
///
/// Read operations serve the repository's read-through path; the sync engine
/// only uses `create_post` and `set_favorite`.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_posts(&self) -> RemoteResult<Vec<Post>>;

    async fn fetch_post(&self, id: PostId) -> RemoteResult<Post>;

    async fn fetch_comments(&self, post_id: PostId) -> RemoteResult<Vec<Comment>>;

    async fn fetch_user(&self, id: UserId) -> RemoteResult<User>;

    /// Posts whose title or body contains `query`, case-insensitive.
    async fn search_posts(&self, query: &str) -> RemoteResult<Vec<Post>> {
        let posts = self.fetch_posts().await?;
        Ok(posts.into_iter().filter(|post| post.matches(query)).collect())
    }

    /// Create a post and return it with its server-assigned id.
    async fn create_post(&self, title: &str, body: &str, author_id: UserId) -> RemoteResult<Post>;

    /// Propagate a favorite/unfavorite. Sources without a favorites endpoint
    /// acknowledge locally.
    async fn set_favorite(
        &self,
        _user_id: UserId,
        _post_id: PostId,
        _is_favorite: bool,
    ) -> RemoteResult<()> {
        Ok(())
    }
}
