//! Read-through repository over the local store.
//!
//! Reads serve from cache and refresh from the remote when online and the
//! cached batch is stale. Writes go to the remote when possible and otherwise
//! queue a local mutation for the sync engine.

use crate::{
    connectivity::ConnectivityObserver,
    error::{Error, Result},
    registry::MetadataRegistry,
    remote::{RemoteError, RemoteErrorKind, RemoteSource},
    store::{LocalStore, StorageError, StoreStats},
};
use feedsync_engine::{
    keys, CacheEntry, CacheStatistics, CachePolicy, CachedList, Clock, Comment, DataType,
    FavoritePost, Namespace, NewPost, Post, PostId, SearchHistory, SearchResult, SyncTracked, User,
    UserId,
};
use serde::de::DeserializeOwned;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tracing::{debug, info, warn};

/// Temporary ids count down from just below this value.
const TEMP_ID_CEILING: PostId = -1000;

pub struct PostRepository {
    store: Arc<LocalStore>,
    registry: MetadataRegistry,
    remote: Arc<dyn RemoteSource>,
    connectivity: Arc<dyn ConnectivityObserver>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
    history: Mutex<SearchHistory>,
    next_temp_id: AtomicI64,
}

impl PostRepository {
    /// The store must already be open. Temporary ids continue below the
    /// lowest one still referenced by a post, favorite or comment list, so a
    /// leftover marker never attaches to a new post.
    pub async fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteSource>,
        connectivity: Arc<dyn ConnectivityObserver>,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Result<Self> {
        let mut lowest = 0;
        for key in store.keys(Namespace::Post).await? {
            lowest = keys::parse_post_id(&key).map_or(lowest, |id| id.min(lowest));
        }
        for key in store.keys(Namespace::Favorite).await? {
            lowest = keys::parse_favorite(&key).map_or(lowest, |(_, id)| id.min(lowest));
        }
        for key in store.keys(Namespace::Comments).await? {
            lowest = keys::parse_comments_post_id(&key).map_or(lowest, |id| id.min(lowest));
        }

        Ok(Self {
            registry: MetadataRegistry::new(store.clone(), clock.clone(), policy),
            store,
            remote,
            connectivity,
            clock,
            policy,
            history: Mutex::new(SearchHistory::default()),
            next_temp_id: AtomicI64::new(lowest.min(TEMP_ID_CEILING) - 1),
        })
    }

    /// The post feed: optimistic posts first (newest first), then by id.
    /// Refreshed from the remote when online and stale. With no cache and a
    /// failing remote the remote error is returned.
    pub async fn posts(&self) -> Result<Vec<CacheEntry<Post>>> {
        let mut refresh_error = None;
        if self.registry.needs_refresh(keys::ALL_POSTS).await? && self.is_online().await {
            match self.remote.fetch_posts().await {
                Ok(posts) => {
                    let count = posts.len();
                    self.cache_posts(posts).await?;
                    self.registry
                        .record(keys::ALL_POSTS, DataType::Posts, &[])
                        .await?;
                    debug!(count, "Post feed refreshed");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to refresh posts, serving cache");
                    refresh_error = Some(e);
                }
            }
        }

        self.registry.touch(keys::ALL_POSTS).await?;
        let mut posts: Vec<CacheEntry<Post>> = self.store.values(Namespace::Post).await?;
        if posts.is_empty() {
            if let Some(e) = refresh_error {
                return Err(e.into());
            }
        }
        sort_feed(&mut posts);
        Ok(posts)
    }

    /// One post. Fresh or dirty cache wins; otherwise fetched when online.
    pub async fn post(&self, id: PostId) -> Result<Option<CacheEntry<Post>>> {
        let key = keys::post(id);
        let cached: Option<CacheEntry<Post>> = self.cached(&key).await?;
        let stale_after = self.policy.posts.stale_after;
        let now = self.clock.now();

        let fresh = cached
            .as_ref()
            .is_some_and(|entry| entry.needs_sync() || !entry.is_stale(now, stale_after));
        if fresh || id < 0 || !self.is_online().await {
            return Ok(cached);
        }

        match self.remote.fetch_post(id).await {
            Ok(post) => {
                let entry = CacheEntry::fetched(post, self.clock.now());
                self.store.put(&key, &entry).await?;
                Ok(Some(entry))
            }
            Err(e) => fallback(cached, e),
        }
    }

    /// Comments of a post, cached as one list per post.
    pub async fn comments(&self, post_id: PostId) -> Result<Vec<CacheEntry<Comment>>> {
        let key = keys::comments(post_id);
        let cached: Option<CachedList<CacheEntry<Comment>>> = self.cached(&key).await?;
        let stale_after = self.policy.comments.stale_after;
        let now = self.clock.now();

        let fresh = cached
            .as_ref()
            .is_some_and(|list| list.needs_sync() || !list.is_stale(now, stale_after));
        if fresh || post_id < 0 || !self.is_online().await {
            self.registry.touch(&key).await?;
            return Ok(cached.map(|list| list.items).unwrap_or_default());
        }

        match self.remote.fetch_comments(post_id).await {
            Ok(comments) => {
                let now = self.clock.now();
                let list = CachedList::new(
                    comments
                        .into_iter()
                        .map(|comment| CacheEntry::fetched(comment, now))
                        .collect(),
                    now,
                );
                self.store.put(&key, &list).await?;
                let post_id = post_id.to_string();
                self.registry
                    .record(&key, DataType::Comments, &[("postId", post_id.as_str())])
                    .await?;
                Ok(list.items)
            }
            Err(e) => Ok(fallback(cached, e)?.map(|list| list.items).unwrap_or_default()),
        }
    }

    /// A user profile.
    pub async fn user(&self, id: UserId) -> Result<Option<CacheEntry<User>>> {
        let key = keys::user(id);
        let cached: Option<CacheEntry<User>> = self.cached(&key).await?;
        let stale_after = self.policy.users.stale_after;
        let now = self.clock.now();

        let fresh = cached
            .as_ref()
            .is_some_and(|entry| !entry.is_stale(now, stale_after));
        if fresh || !self.is_online().await {
            return Ok(cached);
        }

        match self.remote.fetch_user(id).await {
            Ok(user) => {
                let entry = CacheEntry::fetched(user, self.clock.now());
                self.store.put(&key, &entry).await?;
                Ok(Some(entry))
            }
            Err(e) => fallback(cached, e),
        }
    }

    /// Posts matching `query`. Results are cached per normalized query;
    /// offline with no cached result, cached posts are filtered locally.
    pub async fn search(&self, query: &str) -> Result<Vec<CacheEntry<Post>>> {
        let key = keys::search(query)?;
        let query = query.trim();
        self.history().record(query);

        let mut result: Option<SearchResult> = self.cached(&key).await?;
        let refresh = result.is_none() || self.registry.needs_refresh(&key).await?;
        if refresh && self.is_online().await {
            match self.remote.search_posts(query).await {
                Ok(posts) => {
                    let fresh = SearchResult {
                        query: query.to_string(),
                        post_ids: posts.iter().map(|post| post.id).collect(),
                        cached_at: self.clock.now(),
                    };
                    self.cache_posts(posts).await?;
                    self.store.put(&key, &fresh).await?;
                    self.registry
                        .record(&key, DataType::Search, &[("query", query)])
                        .await?;
                    result = Some(fresh);
                }
                Err(e) => warn!(query, error = %e, "Remote search failed, serving cache"),
            }
        }

        self.registry.touch(&key).await?;
        match result {
            Some(result) => self.load_posts(&result.post_ids).await,
            None => self.search_cached_posts(query).await,
        }
    }

    /// Create a post. Online, the remote creates it directly; offline or on a
    /// retryable failure it is stored optimistically under a temporary id
    /// and left for the sync engine. A rejection is returned to the caller.
    pub async fn create_post(
        &self,
        title: &str,
        body: &str,
        author_id: UserId,
    ) -> Result<CacheEntry<Post>> {
        let draft = NewPost::new(title, body, author_id)?;

        if self.is_online().await {
            let created = self
                .remote
                .create_post(draft.title(), draft.body(), draft.author_id())
                .await;
            match created {
                Ok(post) => {
                    let entry = CacheEntry::fetched(post, self.clock.now());
                    self.store.put(&keys::post(entry.record.id), &entry).await?;
                    info!(id = entry.record.id, "Post created");
                    return Ok(entry);
                }
                Err(e) if !e.is_retryable() => return Err(Error::RemoteRejected(e)),
                Err(e) => warn!(error = %e, "Create failed, queueing post for sync"),
            }
        }

        let temp_id = self.next_temp_id.fetch_sub(1, Ordering::SeqCst);
        let entry = CacheEntry::optimistic(draft.into_post(temp_id), self.clock.now());
        self.store.put(&keys::post(temp_id), &entry).await?;
        info!(temp_id, "Optimistic post queued for sync");
        Ok(entry)
    }

    /// Flip a user's favorite state for a post and queue it for sync.
    ///
    /// A temporary post id is only accepted while its optimistic post is
    /// stored; once synced the post is known by its server id.
    pub async fn toggle_favorite(&self, user_id: UserId, post_id: PostId) -> Result<FavoritePost> {
        if user_id <= 0 {
            return Err(feedsync_engine::Error::InvalidAuthor(user_id).into());
        }
        if post_id == 0 {
            return Err(feedsync_engine::Error::InvalidPostId(post_id).into());
        }

        let key = keys::favorite(user_id, post_id);
        let mut tx = self.store.begin().await?;
        if post_id < 0 && tx.sync_flag(&keys::post(post_id)).await?.is_none() {
            return Err(feedsync_engine::Error::UnknownTemporaryPost(post_id).into());
        }
        let current = tolerate_corrupt(tx.get::<FavoritePost>(&key).await)?
            .is_some_and(|favorite| favorite.is_favorite);
        let favorite = FavoritePost::pending(user_id, post_id, !current, self.clock.now());
        tx.put(&key, &favorite).await?;
        tx.commit().await?;

        debug!(user_id, post_id, is_favorite = favorite.is_favorite, "Favorite toggled");
        Ok(favorite)
    }

    /// A user's favorites, synced or not.
    pub async fn favorites(&self, user_id: UserId) -> Result<Vec<FavoritePost>> {
        let favorites: Vec<FavoritePost> = self.store.values(Namespace::Favorite).await?;
        Ok(favorites
            .into_iter()
            .filter(|favorite| favorite.user_id == user_id && favorite.is_favorite)
            .collect())
    }

    pub async fn is_favorite(&self, user_id: UserId, post_id: PostId) -> Result<bool> {
        Ok(self
            .cached::<FavoritePost>(&keys::favorite(user_id, post_id))
            .await?
            .is_some_and(|favorite| favorite.is_favorite))
    }

    /// Recent queries, most recent first.
    pub fn search_history(&self) -> Vec<String> {
        self.history().entries()
    }

    pub fn remove_from_search_history(&self, query: &str) -> bool {
        self.history().remove(query)
    }

    pub fn clear_search_history(&self) {
        self.history().clear();
    }

    /// Drop cached data without unsynced changes, and non-persistent
    /// metadata. Favorites are left alone.
    pub async fn clear_cache(&self) -> Result<u64> {
        let mut removed = 0;
        for data_type in DataType::ALL {
            removed += self
                .store
                .clear_clean(Namespace::for_data_type(data_type))
                .await?;
        }
        removed += self.registry.clear().await?;
        info!(removed, "Cache cleared");
        Ok(removed)
    }

    pub async fn store_stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats().await?)
    }

    pub async fn cache_statistics(&self) -> Result<CacheStatistics> {
        Ok(self.registry.statistics().await?)
    }

    async fn is_online(&self) -> bool {
        self.connectivity.is_connected().await
    }

    fn history(&self) -> MutexGuard<'_, SearchHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a cached value, treating undecodable entries as missing.
    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        tolerate_corrupt(self.store.get(key).await)
    }

    /// Store fetched posts without clobbering local changes.
    async fn cache_posts(&self, posts: Vec<Post>) -> Result<()> {
        let now = self.clock.now();
        for post in posts {
            let key = keys::post(post.id);
            if self.store.sync_flag(&key).await? == Some(true) {
                debug!(%key, "Keeping local changes over fetched post");
                continue;
            }
            self.store.put(&key, &CacheEntry::fetched(post, now)).await?;
        }
        Ok(())
    }

    async fn load_posts(&self, ids: &[PostId]) -> Result<Vec<CacheEntry<Post>>> {
        let mut posts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.cached(&keys::post(*id)).await? {
                posts.push(entry);
            }
        }
        Ok(posts)
    }

    async fn search_cached_posts(&self, query: &str) -> Result<Vec<CacheEntry<Post>>> {
        let posts: Vec<CacheEntry<Post>> = self.store.values(Namespace::Post).await?;
        let mut matches: Vec<_> = posts
            .into_iter()
            .filter(|entry| entry.record.matches(query))
            .collect();
        sort_feed(&mut matches);
        Ok(matches)
    }
}

/// Serve the cached value after a failed fetch. Without one, a missing
/// record is `None` and anything else is the error.
fn fallback<T>(cached: Option<T>, e: RemoteError) -> Result<Option<T>> {
    match cached {
        Some(value) => {
            warn!(error = %e, "Refresh failed, serving cache");
            Ok(Some(value))
        }
        None if e.kind() == RemoteErrorKind::NotFound => Ok(None),
        None => Err(e.into()),
    }
}

/// A corrupt entry reads as absent.
fn tolerate_corrupt<T>(read: std::result::Result<Option<T>, StorageError>) -> Result<Option<T>> {
    match read {
        Ok(value) => Ok(value),
        Err(StorageError::Corrupt { key, source }) => {
            warn!(%key, error = %source, "Ignoring corrupt cache entry");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Optimistic posts first, newest (lowest temporary id) first, then
/// ascending id.
fn sort_feed(posts: &mut [CacheEntry<Post>]) {
    posts.sort_by_key(|entry| (entry.record.id >= 0, entry.record.id));
}
