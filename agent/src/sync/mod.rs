//! Sync engine: pushes locally queued mutations to the remote and expires
//! old cache entries.
//!
//! A pass runs three phases in order:
//!
//! 1. **Optimistic posts** - each dirty optimistic post is created remotely;
//!    on success the temporary entry is swapped for one keyed by the server
//!    id, and favorites and comments pointing at the temporary id follow it
//!    in the same transaction.
//! 2. **Favorites** - each dirty favorite marker is propagated. A confirmed
//!    favorite is kept as synced, a confirmed unfavorite is deleted, unless
//!    the marker changed while the call was in flight. A marker on a
//!    temporary id whose post is gone is rejected.
//! 3. **Invalidation** - clean entries older than their type's max age are
//!    evicted, as is expired metadata. Dirty entries are never evicted.
//!
//! Item failures are recorded on the item and never abort a pass. A phase
//! that fails at the storage level is reported and the next phase runs.
//!
//! At most one pass (or cleanup) runs at a time. Passes are triggered
//! manually, by an interval timer, and when connectivity comes back.

mod report;

pub use report::{
    CleanupReport, PhaseError, PhaseReport, SyncOutcome, SyncPhase, SyncReport, SyncStatus,
    SyncTrigger,
};

use crate::{
    config::SyncConfig,
    connectivity::ConnectivityObserver,
    error::{Error, Result},
    registry::MetadataRegistry,
    remote::{RemoteError, RemoteSource},
    store::{DirtyFilter, LocalStore, StorageError, StoreTransaction},
};
use feedsync_engine::{
    clock::DAY, keys, CacheEntry, CachedList, Clock, Comment, DataType, FavoritePost, Namespace,
    Post, PostId, SyncMeta, Timestamp,
};
use futures::StreamExt;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

/// Metadata not read for this long is dropped by cleanup.
pub const UNUSED_METADATA_AGE: u64 = 7 * DAY;

const STATUS_CHANNEL_CAPACITY: usize = 32;

/// Background tasks owned by the engine.
#[derive(Default)]
struct Tasks {
    connectivity: Option<JoinHandle<()>>,
    auto_sync: Option<JoinHandle<()>>,
}

pub struct SyncEngine {
    store: Arc<LocalStore>,
    registry: MetadataRegistry,
    remote: Arc<dyn RemoteSource>,
    connectivity: Arc<dyn ConnectivityObserver>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    syncing: AtomicBool,
    status: watch::Sender<SyncStatus>,
    transitions: broadcast::Sender<SyncStatus>,
    tasks: Mutex<Tasks>,
}

/// Holds the single-pass flag; releases it on drop.
struct SyncGuard<'a> {
    engine: &'a SyncEngine,
}

impl<'a> SyncGuard<'a> {
    fn acquire(engine: &'a SyncEngine) -> Option<Self> {
        engine
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { engine })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        // A pass cancelled mid-flight must not leave the engine reporting Syncing.
        let interrupted = *self.engine.status.borrow() == SyncStatus::Syncing;
        if interrupted {
            self.engine.set_status(SyncStatus::Idle);
        }
        self.engine.syncing.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteSource>,
        connectivity: Arc<dyn ConnectivityObserver>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let registry = MetadataRegistry::new(store.clone(), clock.clone(), config.cache);
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (transitions, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        Arc::new(Self {
            store,
            registry,
            remote,
            connectivity,
            clock,
            config,
            syncing: AtomicBool::new(false),
            status,
            transitions,
            tasks: Mutex::new(Tasks::default()),
        })
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Every status transition from now on, in order.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SyncStatus> {
        self.transitions.subscribe()
    }

    /// Latest status only, for consumers that render state.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.tasks()
            .auto_sync
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start listening for connectivity changes and, if configured, the
    /// auto-sync timer. Calling it again is harmless.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        self.store.ensure_open()?;

        {
            let mut tasks = self.tasks();
            let listening = tasks
                .connectivity
                .as_ref()
                .is_some_and(|handle| !handle.is_finished());
            if !listening {
                tasks.connectivity = Some(self.spawn_connectivity_listener());
            }
        }

        if self.config.auto_sync && !self.is_auto_syncing() {
            self.start_auto_sync();
        }

        info!(auto_sync = self.config.auto_sync, "Sync engine initialized");
        Ok(())
    }

    /// Run one pass now.
    ///
    /// Returns [`SyncOutcome::Offline`] without touching anything when not
    /// connected, and [`SyncOutcome::AlreadyRunning`] when another pass holds
    /// the guard.
    pub async fn sync_pending_changes(&self) -> Result<SyncOutcome> {
        self.run(SyncTrigger::Manual).await
    }

    async fn run(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        if !self.connectivity.is_connected().await {
            debug!("Offline, skipping sync pass");
            return Ok(SyncOutcome::Offline);
        }

        let Some(_guard) = SyncGuard::acquire(self) else {
            debug!("Sync pass already running");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        self.set_status(SyncStatus::Syncing);
        let result = self.run_pass(trigger).await;
        match &result {
            Ok(report) if report.is_clean() => self.set_status(SyncStatus::Success),
            Ok(report) => {
                warn!(errors = report.errors.len(), "Sync pass finished with phase errors");
                self.set_status(SyncStatus::Error);
            }
            Err(e) => {
                error!(error = %e, "Sync pass failed");
                self.set_status(SyncStatus::Error);
            }
        }
        self.set_status(SyncStatus::Idle);

        result.map(SyncOutcome::Completed)
    }

    /// Start the periodic timer. The first tick fires one interval from now.
    /// Ticks that find a pass running, or the device offline, do nothing.
    pub fn start_auto_sync(self: &Arc<Self>) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let engine = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if engine.is_syncing() {
                    debug!("Auto sync tick skipped, pass in progress");
                    continue;
                }
                engine.sync_in_background(SyncTrigger::Timer).await;
            }
        });

        if let Some(previous) = self.tasks().auto_sync.replace(handle) {
            previous.abort();
        }
        info!(interval_secs = period.as_secs(), "Auto sync started");
    }

    pub fn stop_auto_sync(&self) {
        if let Some(handle) = self.tasks().auto_sync.take() {
            handle.abort();
            info!("Auto sync stopped");
        }
    }

    /// Deep cleanup: age-based invalidation, orphaned comment lists, metadata
    /// unused for a week, then compaction. Shares the pass guard; returns
    /// `None` when a pass is running.
    pub async fn cleanup_cache(&self) -> Result<Option<CleanupReport>> {
        let Some(_guard) = SyncGuard::acquire(self) else {
            debug!("Sync pass running, skipping cleanup");
            return Ok(None);
        };
        self.store.ensure_open()?;

        let mut report = CleanupReport {
            evicted: self.invalidate_expired().await?,
            orphaned_comments: self.remove_orphaned_comments().await?,
            ..CleanupReport::default()
        };

        for meta in self.registry.evict_unused(UNUSED_METADATA_AGE).await? {
            report.unused_metadata += 1;
            if meta.data_type == DataType::Search && self.store.delete(&meta.key).await? {
                report.search_results += 1;
            }
        }

        self.store.compact().await?;

        info!(
            evicted = report.evicted,
            orphaned_comments = report.orphaned_comments,
            unused_metadata = report.unused_metadata,
            "Cache cleanup finished"
        );
        Ok(Some(report))
    }

    /// Stop background tasks. The engine still answers manual calls.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks();
        for handle in [tasks.connectivity.take(), tasks.auto_sync.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        info!("Sync engine shut down");
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
        // No subscribers is fine.
        let _ = self.transitions.send(status);
    }

    fn spawn_connectivity_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.connectivity.subscribe();
        let engine: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                match change {
                    Ok(true) => {
                        let Some(engine) = engine.upgrade() else {
                            break;
                        };
                        info!("Connectivity restored, syncing");
                        engine
                            .sync_in_background(SyncTrigger::ConnectivityRestored)
                            .await;
                    }
                    Ok(false) => debug!("Connectivity lost"),
                    Err(e) => {
                        warn!(error = %e, "Connectivity stream failed, listener stopped");
                        break;
                    }
                }
            }
        })
    }

    async fn sync_in_background(&self, trigger: SyncTrigger) {
        match self.run(trigger).await {
            Ok(SyncOutcome::Completed(report)) => debug!(
                ?trigger,
                synced = report.synced(),
                failed = report.failed(),
                "Background sync finished"
            ),
            Ok(outcome) => debug!(?trigger, ?outcome, "Background sync skipped"),
            Err(e) => error!(?trigger, error = %e, "Background sync failed"),
        }
    }

    async fn run_pass(&self, trigger: SyncTrigger) -> Result<SyncReport> {
        self.store.ensure_open()?;
        let mut report = SyncReport::new(trigger, self.clock.now());
        info!(?trigger, "Sync pass started");

        match self.reconcile_optimistic_posts().await {
            Ok(phase) => report.optimistic_posts = phase,
            Err(e) => record_phase_error(&mut report, SyncPhase::OptimisticPosts, &e),
        }
        match self.reconcile_favorites().await {
            Ok(phase) => report.favorites = phase,
            Err(e) => record_phase_error(&mut report, SyncPhase::Favorites, &e),
        }
        match self.invalidate_expired().await {
            Ok(evicted) => report.evicted = evicted,
            Err(e) => record_phase_error(&mut report, SyncPhase::Invalidation, &e),
        }

        report.finished_at = self.clock.now();
        info!(
            synced = report.synced(),
            failed = report.failed(),
            evicted = report.evicted,
            "Sync pass finished"
        );
        Ok(report)
    }

    async fn reconcile_optimistic_posts(&self) -> Result<PhaseReport> {
        let mut phase = PhaseReport::default();
        let dirty = self
            .store
            .dirty_keys(Namespace::Post, DirtyFilter::OptimisticOnly)
            .await?;

        for key in dirty {
            let Some(entry) = self.load::<CacheEntry<Post>>(&key, &mut phase).await? else {
                continue;
            };

            let now = self.clock.now();
            if !self.is_attempt_allowed(&entry.sync, now) {
                debug!(%key, attempts = entry.sync.sync_attempts, "Optimistic post not retried");
                phase.skipped += 1;
                continue;
            }

            let temp_id = entry.record.id;
            let created = self
                .remote
                .create_post(&entry.record.title, &entry.record.body, entry.record.user_id)
                .await;

            match created {
                Ok(post) => {
                    let server_id = post.id;
                    let synced = CacheEntry::fetched(post, self.clock.now());
                    let mut tx = self.store.begin().await?;
                    tx.delete(&key).await?;
                    tx.put(&keys::post(server_id), &synced).await?;
                    retarget_dependents(&mut tx, temp_id, server_id).await?;
                    tx.commit().await?;
                    info!(temp_id, server_id, "Optimistic post synced");
                    phase.synced += 1;
                }
                Err(err) => {
                    warn!(
                        %key,
                        error = %err,
                        retryable = err.is_retryable(),
                        "Failed to sync optimistic post"
                    );
                    let failed = CacheEntry {
                        sync: self.failed_attempt(entry.sync, &err, now),
                        ..entry
                    };
                    self.store.put(&key, &failed).await?;
                    phase.failed += 1;
                }
            }
        }

        Ok(phase)
    }

    async fn reconcile_favorites(&self) -> Result<PhaseReport> {
        let mut phase = PhaseReport::default();
        let dirty = self
            .store
            .dirty_keys(Namespace::Favorite, DirtyFilter::All)
            .await?;

        for key in dirty {
            let Some(favorite) = self.load::<FavoritePost>(&key, &mut phase).await? else {
                continue;
            };

            let now = self.clock.now();
            if !self.is_attempt_allowed(&favorite.sync, now) {
                debug!(%key, attempts = favorite.sync.sync_attempts, "Favorite not retried");
                phase.skipped += 1;
                continue;
            }

            if favorite.post_id < 0 {
                if self.store.sync_flag(&keys::post(favorite.post_id)).await?.is_some() {
                    debug!(%key, "Favorite waits for its post to sync");
                    phase.skipped += 1;
                    continue;
                }
                warn!(%key, "Favorite points at a temporary post that no longer exists");
                let rejected = favorite
                    .clone()
                    .mark_rejected("post no longer exists".to_string());
                self.store.put_if_unchanged(&key, &favorite, &rejected).await?;
                phase.failed += 1;
                continue;
            }

            let result = self
                .remote
                .set_favorite(favorite.user_id, favorite.post_id, favorite.is_favorite)
                .await;

            // The user may toggle again while the call is in flight; only
            // settle the value that was sent.
            let settled = match result {
                Ok(()) => {
                    phase.synced += 1;
                    if favorite.is_favorite {
                        let synced = favorite.clone().mark_as_synced();
                        self.store.put_if_unchanged(&key, &favorite, &synced).await?
                    } else {
                        self.store.delete_if_unchanged(&key, &favorite).await?
                    }
                }
                Err(err) => {
                    warn!(
                        %key,
                        error = %err,
                        retryable = err.is_retryable(),
                        "Failed to sync favorite"
                    );
                    phase.failed += 1;
                    let failed = FavoritePost {
                        sync: self.failed_attempt(favorite.sync.clone(), &err, now),
                        ..favorite.clone()
                    };
                    self.store.put_if_unchanged(&key, &favorite, &failed).await?
                }
            };
            if !settled {
                debug!(%key, "Favorite changed during sync, left for the next pass");
            }
        }

        Ok(phase)
    }

    /// Evict clean entries older than their type's max age, then expired
    /// metadata.
    async fn invalidate_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut evicted = 0;

        for data_type in DataType::ALL {
            let max_age = self.config.cache.for_type(data_type).max_age;
            let cutoff = now.saturating_sub(max_age);
            let removed = self
                .store
                .evict_older_than(Namespace::for_data_type(data_type), cutoff)
                .await?;
            if removed > 0 {
                debug!(%data_type, removed, "Expired entries evicted");
            }
            evicted += removed;
        }

        evicted += self.registry.evict_expired().await?;
        Ok(evicted)
    }

    /// Delete comment lists whose post is no longer cached, unless they hold
    /// unsynced changes.
    async fn remove_orphaned_comments(&self) -> Result<u64> {
        let mut removed = 0;
        for key in self.store.keys(Namespace::Comments).await? {
            let Some(post_id) = keys::parse_comments_post_id(&key) else {
                continue;
            };
            if self.store.sync_flag(&keys::post(post_id)).await?.is_some() {
                continue;
            }
            if self.store.sync_flag(&key).await? == Some(false) && self.store.delete(&key).await? {
                debug!(%key, "Orphaned comments removed");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Read a dirty item. Undecodable items are counted as failed and skipped.
    async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        phase: &mut PhaseReport,
    ) -> Result<Option<T>> {
        match self.store.get(key).await {
            Ok(value) => Ok(value),
            Err(StorageError::Corrupt { key, source }) => {
                warn!(%key, error = %source, "Skipping corrupt entry");
                phase.failed += 1;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_attempt_allowed(&self, sync: &SyncMeta, now: Timestamp) -> bool {
        sync.should_retry_sync(self.config.retry.max_attempts) && sync.is_retry_due(now)
    }

    /// Sync state after a failed attempt. Rejections are terminal; anything
    /// else counts an attempt and, with backoff enabled, schedules the next.
    fn failed_attempt(&self, sync: SyncMeta, err: &RemoteError, now: Timestamp) -> SyncMeta {
        if !err.is_retryable() {
            return sync.mark_rejected(err.to_string());
        }
        let sync = sync.mark_for_sync(Some(err.to_string()));
        let retry_at = self.next_retry_at(sync.sync_attempts, now);
        sync.retry_at(retry_at)
    }

    fn next_retry_at(&self, attempts: u32, now: Timestamp) -> Option<Timestamp> {
        let delay = self.config.retry.backoff_delay(attempts);
        if delay == 0 {
            return None;
        }
        let delay = if self.config.jitter {
            (delay as f64 * rand::thread_rng().gen_range(0.5..1.0)) as u64
        } else {
            delay
        };
        Some(now.saturating_add(delay))
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in [tasks.connectivity.take(), tasks.auto_sync.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

/// Point favorites and the comment list of a temporary post id at the
/// server id, inside the transaction that swaps the post itself.
async fn retarget_dependents(
    tx: &mut StoreTransaction,
    temp_id: PostId,
    server_id: PostId,
) -> Result<()> {
    for key in tx.keys(Namespace::Favorite).await? {
        let Some((user_id, post_id)) = keys::parse_favorite(&key) else {
            continue;
        };
        if post_id != temp_id {
            continue;
        }
        let Some(favorite) = tx.get::<FavoritePost>(&key).await? else {
            continue;
        };
        tx.delete(&key).await?;
        tx.put(
            &keys::favorite(user_id, server_id),
            &favorite.with_post_id(server_id),
        )
        .await?;
        debug!(user_id, temp_id, server_id, "Favorite re-keyed");
    }

    let comments_key = keys::comments(temp_id);
    if let Some(list) = tx.get::<CachedList<CacheEntry<Comment>>>(&comments_key).await? {
        let items = list
            .items
            .into_iter()
            .map(|entry| CacheEntry {
                record: Comment {
                    post_id: server_id,
                    ..entry.record
                },
                ..entry
            })
            .collect();
        let list = CachedList { items, ..list };
        tx.delete(&comments_key).await?;
        tx.put(&keys::comments(server_id), &list).await?;
        debug!(temp_id, server_id, "Comments re-keyed");
    }

    Ok(())
}

fn record_phase_error(report: &mut SyncReport, phase: SyncPhase, e: &Error) {
    warn!(?phase, error = %e, "Sync phase failed");
    report.errors.push(PhaseError {
        phase,
        message: e.to_string(),
    });
}
