//! # Feedsync Agent
//!
//! The IO side of the offline cache: a SQLite-backed local store, a
//! read-through repository, the remote source, connectivity observation and
//! the background sync engine. The data model lives in `feedsync-engine`.
//!
//! ## Wiring
//!
//! ```rust,no_run
//! use feedsync_agent::{
//!     HttpRemoteSource, LocalStore, PostRepository, StaticToken, SyncConfig, SyncEngine,
//!     SystemClock, WatchConnectivity,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn run() -> feedsync_agent::Result<()> {
//! let store = Arc::new(LocalStore::new("sqlite://feedsync.db"));
//! store.open().await?;
//!
//! let remote = Arc::new(HttpRemoteSource::new(
//!     "https://jsonplaceholder.typicode.com",
//!     Duration::from_secs(10),
//!     Arc::new(StaticToken::none()),
//! )?);
//! let connectivity = WatchConnectivity::shared(true);
//! let clock = Arc::new(SystemClock);
//! let config = SyncConfig::default();
//!
//! let repository = PostRepository::new(
//!     store.clone(),
//!     remote.clone(),
//!     connectivity.clone(),
//!     clock.clone(),
//!     config.cache,
//! )
//! .await?;
//! let engine = SyncEngine::new(store, remote, connectivity, clock, config);
//! engine.initialize()?;
//!
//! repository.create_post("Hello", "Written offline", 1).await?;
//! engine.sync_pending_changes().await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod registry;
pub mod remote;
pub mod repository;
pub mod store;
pub mod sync;

pub use clock::SystemClock;
pub use config::{Config, ConfigError, SyncConfig};
pub use connectivity::{
    ConnectivityError, ConnectivityObserver, ConnectivityStream, HttpProbe, WatchConnectivity,
};
pub use error::{Error, Result};
pub use registry::MetadataRegistry;
pub use remote::{
    CredentialProvider, HttpRemoteSource, RemoteError, RemoteErrorKind, RemoteResult,
    RemoteSource, StaticToken,
};
pub use repository::PostRepository;
pub use store::{DirtyFilter, LocalStore, StorageError, StoreStats, StoreTransaction};
pub use sync::{
    CleanupReport, PhaseError, PhaseReport, SyncEngine, SyncOutcome, SyncPhase, SyncReport,
    SyncStatus, SyncTrigger,
};
