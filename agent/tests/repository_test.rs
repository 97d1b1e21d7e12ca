//! Integration tests for the read-through repository.

mod common;

use common::{comment, post, test_config, Harness, MockRemote, FIRST_SERVER_ID};
use feedsync_agent::{Error, RemoteError};
use feedsync_engine::{
    clock::{DAY, MINUTE},
    keys, CacheEntry, CacheMetadata, CachedList, FavoritePost, Post, User,
};
use std::sync::Arc;

fn seeded_remote() -> Arc<MockRemote> {
    MockRemote::with_posts(vec![
        post(1, "Rust ownership"),
        post(2, "Go channels"),
        post(3, "Rust lifetimes"),
    ])
}

async fn online() -> Harness {
    Harness::with(seeded_remote(), true, test_config()).await
}

fn ids(posts: &[CacheEntry<Post>]) -> Vec<i64> {
    posts.iter().map(|entry| entry.record.id).collect()
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn posts_are_read_through() {
    let h = online().await;

    let posts = h.repository.posts().await.unwrap();
    assert_eq!(ids(&posts), vec![1, 2, 3]);
    assert_eq!(h.remote.fetches(), 1);

    // Within the staleness window the cache answers.
    h.clock.advance(5 * MINUTE);
    h.repository.posts().await.unwrap();
    assert_eq!(h.remote.fetches(), 1);

    h.clock.advance(11 * MINUTE);
    h.repository.posts().await.unwrap();
    assert_eq!(h.remote.fetches(), 2);
}

#[tokio::test]
async fn posts_fall_back_to_cache() {
    let h = online().await;
    h.repository.posts().await.unwrap();

    h.connectivity.set_connected(false);
    h.clock.advance(60 * MINUTE);
    assert_eq!(ids(&h.repository.posts().await.unwrap()), vec![1, 2, 3]);
    assert_eq!(h.remote.fetches(), 1);

    h.connectivity.set_connected(true);
    h.remote.fail_fetches(Some(RemoteError::from_status(502, "bad gateway")));
    assert_eq!(h.repository.posts().await.unwrap().len(), 3);
}

#[tokio::test]
async fn posts_without_cache_surface_remote_error() {
    let h = online().await;
    h.remote.fail_fetches(Some(RemoteError::timeout("slow")));

    let err = h.repository.posts().await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn offline_empty_cache_is_empty_feed() {
    let h = Harness::with(seeded_remote(), false, test_config()).await;
    assert!(h.repository.posts().await.unwrap().is_empty());
    assert_eq!(h.remote.fetches(), 0);
}

#[tokio::test]
async fn single_post_refreshes_when_stale() {
    let h = online().await;

    let first = h.repository.post(1).await.unwrap().unwrap();
    assert_eq!(first.record.title, "Rust ownership");
    assert_eq!(h.remote.fetches(), 1);

    h.repository.post(1).await.unwrap();
    assert_eq!(h.remote.fetches(), 1);

    h.clock.advance(16 * MINUTE);
    h.repository.post(1).await.unwrap();
    assert_eq!(h.remote.fetches(), 2);

    assert!(h.repository.post(404).await.unwrap().is_none());
}

#[tokio::test]
async fn comments_are_cached_per_post() {
    let h = online().await;
    h.remote.add_comments(1, vec![comment(1, 1), comment(2, 1)]);

    assert_eq!(h.repository.comments(1).await.unwrap().len(), 2);

    h.connectivity.set_connected(false);
    h.clock.advance(60 * MINUTE);
    let cached = h.repository.comments(1).await.unwrap();
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().all(|c| c.record.post_id == 1));

    let meta = h
        .store
        .get::<CacheMetadata>(&keys::metadata(&keys::comments(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.tags.get("postId").map(String::as_str), Some("1"));
    assert_eq!(meta.access_count, 1);

    assert!(h.repository.comments(-1001).await.unwrap().is_empty());
}

#[tokio::test]
async fn users_are_cached() {
    let h = online().await;
    h.remote.add_user(User {
        id: 1,
        name: "Leanne Graham".into(),
        username: "Bret".into(),
        email: "leanne@example.com".into(),
    });

    assert_eq!(h.repository.user(1).await.unwrap().unwrap().record.username, "Bret");
    assert!(h.repository.user(9).await.unwrap().is_none());

    h.connectivity.set_connected(false);
    assert!(h.repository.user(1).await.unwrap().is_some());
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn search_caches_results_per_query() {
    let h = online().await;

    let results = h.repository.search("Rust").await.unwrap();
    assert_eq!(ids(&results), vec![1, 3]);
    assert_eq!(h.remote.fetches(), 1);

    let again = h.repository.search("  rust ").await.unwrap();
    assert_eq!(ids(&again), vec![1, 3]);
    assert_eq!(h.remote.fetches(), 1);
}

#[tokio::test]
async fn offline_search_filters_cached_posts() {
    let h = online().await;
    h.repository.posts().await.unwrap();
    h.connectivity.set_connected(false);

    let results = h.repository.search("lifetimes").await.unwrap();
    assert_eq!(ids(&results), vec![3]);
    assert!(h.repository.search("python").await.unwrap().is_empty());
}

#[tokio::test]
async fn search_history_is_recent_and_unique() {
    let h = Harness::new(false).await;

    h.repository.search("Rust").await.unwrap();
    h.repository.search("go").await.unwrap();
    h.repository.search(" rust ").await.unwrap();
    assert_eq!(h.repository.search_history(), vec!["rust", "go"]);

    assert!(matches!(
        h.repository.search("   ").await,
        Err(Error::Validation(feedsync_engine::Error::EmptyQuery))
    ));
    assert_eq!(h.repository.search_history().len(), 2);

    assert!(h.repository.remove_from_search_history("GO"));
    assert_eq!(h.repository.search_history(), vec!["rust"]);

    h.repository.clear_search_history();
    assert!(h.repository.search_history().is_empty());
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn online_create_uses_server_id() {
    let h = online().await;

    let created = h.repository.create_post("Hello", "World", 1).await.unwrap();
    assert_eq!(created.record.id, FIRST_SERVER_ID);
    assert!(!created.needs_sync());
    assert_eq!(h.store.stats().await.unwrap().dirty, 0);
}

#[tokio::test]
async fn online_create_falls_back_to_optimistic() {
    let h = online().await;
    h.remote.fail_creates(Some(RemoteError::connection("refused")));

    let created = h.repository.create_post("Hello", "World", 1).await.unwrap();
    assert_eq!(created.record.id, -1001);
    assert!(created.is_optimistic);
}

#[tokio::test]
async fn rejected_create_is_returned() {
    let h = online().await;
    h.remote.fail_creates(Some(RemoteError::from_status(422, "duplicate title")));

    let err = h.repository.create_post("Hello", "World", 1).await.unwrap_err();
    assert!(matches!(err, Error::RemoteRejected(_)));
    assert_eq!(h.store.stats().await.unwrap().posts, 0);
}

#[tokio::test]
async fn create_validates_input() {
    let h = Harness::new(false).await;

    let err = h.repository.create_post("  ", "World", 1).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(feedsync_engine::Error::EmptyTitle)
    ));
    let err = h.repository.create_post("Hello", "World", 0).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(feedsync_engine::Error::InvalidAuthor(0))
    ));
    assert_eq!(h.store.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn optimistic_posts_lead_the_feed() {
    let h = online().await;
    h.repository.posts().await.unwrap();
    h.connectivity.set_connected(false);

    h.repository.create_post("First draft", "a", 1).await.unwrap();
    h.repository.create_post("Second draft", "b", 1).await.unwrap();

    let feed = h.repository.posts().await.unwrap();
    assert_eq!(ids(&feed), vec![-1002, -1001, 1, 2, 3]);
}

#[tokio::test]
async fn temporary_ids_continue_after_restart() {
    let h = Harness::new(false).await;
    h.repository.create_post("One", "a", 1).await.unwrap();
    h.repository.create_post("Two", "b", 1).await.unwrap();

    let restarted =
        Harness::over(h.store.clone(), MockRemote::new(), false, test_config()).await;
    let created = restarted
        .repository
        .create_post("Three", "c", 1)
        .await
        .unwrap();
    assert_eq!(created.record.id, -1003);
}

#[tokio::test]
async fn temporary_ids_skip_ids_held_by_dependents() {
    let h = Harness::new(false).await;
    let now = 10 * DAY;
    h.store
        .put(
            &keys::favorite(1, -1005),
            &FavoritePost::pending(1, -1005, true, now),
        )
        .await
        .unwrap();
    let list = CachedList::new(vec![CacheEntry::fetched(comment(1, -1007), now)], now);
    h.store.put(&keys::comments(-1007), &list).await.unwrap();

    let restarted =
        Harness::over(h.store.clone(), MockRemote::new(), false, test_config()).await;
    let created = restarted
        .repository
        .create_post("Fresh", "d", 1)
        .await
        .unwrap();
    assert_eq!(created.record.id, -1008);
}

#[tokio::test]
async fn refresh_keeps_local_changes() {
    let h = online().await;
    h.repository.posts().await.unwrap();

    let mut edited = h
        .store
        .get::<CacheEntry<Post>>(&keys::post(2))
        .await
        .unwrap()
        .unwrap();
    edited.record.title = "Go channels, revised".into();
    let edited = edited.mark_for_sync(None);
    h.store.put(&keys::post(2), &edited).await.unwrap();

    h.clock.advance(16 * MINUTE);
    let feed = h.repository.posts().await.unwrap();
    let post = feed.iter().find(|entry| entry.record.id == 2).unwrap();
    assert_eq!(post.record.title, "Go channels, revised");
    assert!(post.needs_sync());
}

#[tokio::test]
async fn favorites_toggle() {
    let h = Harness::new(false).await;

    let favorite = h.repository.toggle_favorite(1, 2).await.unwrap();
    assert!(favorite.is_favorite);
    assert!(favorite.sync.needs_sync);
    assert!(h.repository.is_favorite(1, 2).await.unwrap());
    assert_eq!(h.repository.favorites(1).await.unwrap().len(), 1);
    assert!(h.repository.favorites(2).await.unwrap().is_empty());

    let unfavorite = h.repository.toggle_favorite(1, 2).await.unwrap();
    assert!(!unfavorite.is_favorite);
    assert!(!h.repository.is_favorite(1, 2).await.unwrap());

    assert!(matches!(
        h.repository.toggle_favorite(0, 2).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn favorites_on_temporary_ids_need_the_post() {
    let h = Harness::new(false).await;

    let err = h.repository.toggle_favorite(1, -1001).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(feedsync_engine::Error::UnknownTemporaryPost(-1001))
    ));
    assert_eq!(h.store.stats().await.unwrap().favorites, 0);

    let created = h.repository.create_post("Draft", "body", 1).await.unwrap();
    assert_eq!(created.record.id, -1001);
    let favorite = h.repository.toggle_favorite(1, -1001).await.unwrap();
    assert!(favorite.is_favorite);
    assert!(h.repository.is_favorite(1, -1001).await.unwrap());
}

#[tokio::test]
async fn clear_cache_keeps_unsynced_posts() {
    let h = online().await;
    h.repository.posts().await.unwrap();
    h.connectivity.set_connected(false);
    h.repository.create_post("Draft", "body", 1).await.unwrap();

    let removed = h.repository.clear_cache().await.unwrap();
    assert_eq!(removed, 4);

    let stats = h.repository.store_stats().await.unwrap();
    assert_eq!(stats.posts, 1);
    assert_eq!(stats.metadata, 0);
    assert_eq!(h.repository.cache_statistics().await.unwrap().total, 0);
}
