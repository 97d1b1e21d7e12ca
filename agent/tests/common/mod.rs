//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use feedsync_agent::{
    LocalStore, PostRepository, RemoteError, RemoteResult, RemoteSource, SyncConfig, SyncEngine,
    WatchConnectivity,
};
use feedsync_engine::{clock::DAY, Comment, ManualClock, Post, PostId, RetryPolicy, User, UserId};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Server ids handed out by [`MockRemote::create_post`] start here.
pub const FIRST_SERVER_ID: PostId = 55;

/// Scriptable in-memory remote.
#[derive(Default)]
pub struct MockRemote {
    posts: Mutex<Vec<Post>>,
    comments: Mutex<HashMap<PostId, Vec<Comment>>>,
    users: Mutex<HashMap<UserId, User>>,
    next_id: AtomicI64,
    create_failure: Mutex<Option<RemoteError>>,
    favorite_failure: Mutex<Option<RemoteError>>,
    fetch_failure: Mutex<Option<RemoteError>>,
    create_delay: Mutex<Option<Duration>>,
    favorite_delay: Mutex<Option<Duration>>,
    pub create_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub favorite_calls: Mutex<Vec<(UserId, PostId, bool)>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(FIRST_SERVER_ID),
            ..Self::default()
        })
    }

    pub fn with_posts(posts: Vec<Post>) -> Arc<Self> {
        let remote = Self::new();
        *remote.posts.lock().unwrap() = posts;
        remote
    }

    pub fn add_comments(&self, post_id: PostId, comments: Vec<Comment>) {
        self.comments.lock().unwrap().insert(post_id, comments);
    }

    pub fn add_user(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    /// Fail every create with `err` until cleared with `None`.
    pub fn fail_creates(&self, err: Option<RemoteError>) {
        *self.create_failure.lock().unwrap() = err;
    }

    pub fn fail_favorites(&self, err: Option<RemoteError>) {
        *self.favorite_failure.lock().unwrap() = err;
    }

    pub fn fail_fetches(&self, err: Option<RemoteError>) {
        *self.fetch_failure.lock().unwrap() = err;
    }

    pub fn delay_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_favorites(&self, delay: Duration) {
        *self.favorite_delay.lock().unwrap() = Some(delay);
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn created_posts(&self) -> Vec<Post> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|post| post.id >= FIRST_SERVER_ID)
            .cloned()
            .collect()
    }

    fn check_fetch(&self) -> RemoteResult<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.fetch_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn fetch_posts(&self) -> RemoteResult<Vec<Post>> {
        self.check_fetch()?;
        Ok(self.posts.lock().unwrap().clone())
    }

    async fn fetch_post(&self, id: PostId) -> RemoteResult<Post> {
        self.check_fetch()?;
        self.posts
            .lock()
            .unwrap()
            .iter()
            .find(|post| post.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::from_status(404, "no such post"))
    }

    async fn fetch_comments(&self, post_id: PostId) -> RemoteResult<Vec<Comment>> {
        self.check_fetch()?;
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(&post_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_user(&self, id: UserId) -> RemoteResult<User> {
        self.check_fetch()?;
        self.users
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RemoteError::from_status(404, "no such user"))
    }

    async fn create_post(&self, title: &str, body: &str, author_id: UserId) -> RemoteResult<Post> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.create_failure.lock().unwrap().clone();
        if let Some(err) = failure {
            return Err(err);
        }

        let post = Post {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: author_id,
            title: title.to_string(),
            body: body.to_string(),
        };
        self.posts.lock().unwrap().push(post.clone());
        Ok(post)
    }

    async fn set_favorite(
        &self,
        user_id: UserId,
        post_id: PostId,
        is_favorite: bool,
    ) -> RemoteResult<()> {
        self.favorite_calls
            .lock()
            .unwrap()
            .push((user_id, post_id, is_favorite));
        let delay = *self.favorite_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.favorite_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn post(id: PostId, title: &str) -> Post {
    Post {
        id,
        user_id: 1,
        title: title.to_string(),
        body: format!("body of {}", title),
    }
}

pub fn comment(id: i64, post_id: PostId) -> Comment {
    Comment {
        id,
        post_id,
        name: format!("comment {}", id),
        email: "reader@example.com".to_string(),
        body: "nice post".to_string(),
    }
}

/// Engine, repository and their collaborators over one in-memory store.
pub struct Harness {
    pub store: Arc<LocalStore>,
    pub remote: Arc<MockRemote>,
    pub connectivity: Arc<WatchConnectivity>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<SyncEngine>,
    pub repository: PostRepository,
}

/// Sync settings for tests: no timer, no jitter, three attempts.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        auto_sync: false,
        jitter: false,
        retry: RetryPolicy::default(),
        ..SyncConfig::default()
    }
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        Self::with(MockRemote::new(), online, test_config()).await
    }

    pub async fn with(remote: Arc<MockRemote>, online: bool, config: SyncConfig) -> Self {
        let store = Arc::new(LocalStore::in_memory());
        store.open().await.expect("Failed to open test store");
        Self::over(store, remote, online, config).await
    }

    /// Build over an existing store, e.g. to simulate a restart.
    pub async fn over(
        store: Arc<LocalStore>,
        remote: Arc<MockRemote>,
        online: bool,
        config: SyncConfig,
    ) -> Self {
        let connectivity = WatchConnectivity::shared(online);
        let clock = Arc::new(ManualClock::new(10 * DAY));

        let repository = PostRepository::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            clock.clone(),
            config.cache,
        )
        .await
        .expect("Failed to create repository");

        let engine = SyncEngine::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            clock.clone(),
            config,
        );

        Self {
            store,
            remote,
            connectivity,
            clock,
            engine,
            repository,
        }
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
