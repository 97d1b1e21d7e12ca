//! Status and reports published by the sync engine.

use feedsync_engine::Timestamp;
use serde::{Deserialize, Serialize};

/// Observable state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Success => write!(f, "success"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// What started a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncTrigger {
    #[default]
    Manual,
    ConnectivityRestored,
    Timer,
}

/// The three phases of a pass, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    OptimisticPosts,
    Favorites,
    Invalidation,
}

/// Per-item results of one reconciliation phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    /// Items the remote accepted
    pub synced: usize,
    /// Items that failed and were marked for another attempt or rejected
    pub failed: usize,
    /// Items left alone: attempts exhausted, backoff pending, or waiting on a
    /// dependency
    pub skipped: usize,
}

/// A phase that aborted. Later phases still run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseError {
    pub phase: SyncPhase,
    pub message: String,
}

/// Summary of one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub optimistic_posts: PhaseReport,
    pub favorites: PhaseReport,
    /// Entries and metadata records invalidated
    pub evicted: u64,
    pub errors: Vec<PhaseError>,
}

impl SyncReport {
    pub fn new(trigger: SyncTrigger, started_at: Timestamp) -> Self {
        Self {
            trigger,
            started_at,
            ..Self::default()
        }
    }

    /// No phase aborted. Individual item failures do not count.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn synced(&self) -> usize {
        self.optimistic_posts.synced + self.favorites.synced
    }

    pub fn failed(&self) -> usize {
        self.optimistic_posts.failed + self.favorites.failed
    }
}

/// Result of asking for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass or cleanup holds the guard
    AlreadyRunning,
    /// Not connected; nothing was attempted
    Offline,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Summary of a cleanup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Entries and metadata invalidated by age
    pub evicted: u64,
    /// Comment lists whose post is gone
    pub orphaned_comments: u64,
    /// Metadata not read for a week
    pub unused_metadata: u64,
    /// Search results dropped with their metadata
    pub search_results: u64,
}
