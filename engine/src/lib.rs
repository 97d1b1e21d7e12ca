//! # Feedsync Engine
//!
//! The data model of an offline cache for posts, comments and users.
//!
//! This crate holds the pure part of the offline cache: what a cached entry
//! looks like, when it expires, when a failed sync may be retried, and how keys
//! are laid out in the local store. Storage, networking and scheduling live in
//! the `feedsync-agent` crate.
//!
//! ## Design Principles
//!
//! - **No IO**: no files, network, or system clock
//! - **Explicit time**: every time-based predicate takes `now` as an argument
//! - **Value transitions**: sync marks consume an entry and return the new one
//!
//! ## Core Concepts
//!
//! ### Cache entries
//!
//! A [`CacheEntry`] wraps a domain record ([`Post`], [`Comment`], [`User`])
//! with `cachedAt` and the sync bookkeeping in [`SyncMeta`]:
//! - `needsSync` - local changes the remote has not seen
//! - `syncAttempts` - failed attempts since the last successful sync
//! - `syncError` - why the last attempt failed
//!
//! Optimistic entries are posts created locally under a negative temporary id.
//!
//! ### Cache metadata
//!
//! A [`CacheMetadata`] record describes one logical collection or query result
//! set: its [`DataType`], expiry deadline, access statistics and tags.
//!
//! ### Policies
//!
//! [`CachePolicy`] gives each data type a max age and a staleness threshold.
//! [`RetryPolicy`] caps sync attempts and optionally adds exponential backoff.
//!
//! ## Quick Start
//!
//! ```rust
//! use feedsync_engine::{CacheEntry, NewPost, RetryPolicy};
//!
//! let draft = NewPost::new("Hello", "First post", 1).unwrap();
//! let entry = CacheEntry::optimistic(draft.into_post(-1001), 1_706_745_600_000);
//! assert!(entry.needs_sync());
//!
//! let retry = RetryPolicy::default();
//! let failed = entry.mark_for_sync(Some("connection refused".into()));
//! assert_eq!(failed.sync_attempts(), 1);
//! assert!(failed.should_retry_sync(retry.max_attempts));
//! ```

pub mod clock;
pub mod entry;
pub mod error;
pub mod favorite;
pub mod history;
pub mod keys;
pub mod metadata;
pub mod policy;
pub mod record;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock};
pub use entry::{CacheEntry, CachedList, SearchResult, SyncMeta, SyncState, SyncTracked};
pub use error::Error;
pub use favorite::FavoritePost;
pub use history::SearchHistory;
pub use keys::Namespace;
pub use metadata::{CacheMetadata, CacheStatistics, DataType};
pub use policy::{CachePolicy, ExpiryPolicy, RetryPolicy};
pub use record::{Comment, NewPost, Post, User};

/// Type aliases for clarity
pub type PostId = i64;
pub type CommentId = i64;
pub type UserId = i64;
pub type CacheKey = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
