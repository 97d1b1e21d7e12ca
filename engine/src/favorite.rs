//! Favorite markers: a user's favorite/unfavorite action waiting for sync.

use crate::{
    entry::{SyncMeta, SyncTracked},
    PostId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

/// The latest favorite state a user chose for a post.
///
/// Identity is the `(user_id, post_id)` pair, see [`FavoritePost::id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoritePost {
    pub post_id: PostId,
    pub user_id: UserId,
    /// `false` records an unfavorite that still has to reach the remote
    pub is_favorite: bool,
    pub favorite_at: Timestamp,
    #[serde(flatten)]
    pub sync: SyncMeta,
}

impl FavoritePost {
    /// A new local favorite/unfavorite action.
    pub fn pending(user_id: UserId, post_id: PostId, is_favorite: bool, now: Timestamp) -> Self {
        Self {
            post_id,
            user_id,
            is_favorite,
            favorite_at: now,
            sync: SyncMeta::pending(),
        }
    }

    /// Composite identity `"{user_id}_{post_id}"`.
    pub fn id(&self) -> String {
        favorite_id(self.user_id, self.post_id)
    }

    /// The same action re-targeted at the server-assigned post id.
    pub fn with_post_id(self, post_id: PostId) -> Self {
        Self { post_id, ..self }
    }

    pub fn mark_for_sync(self, error: Option<String>) -> Self {
        Self {
            sync: self.sync.mark_for_sync(error),
            ..self
        }
    }

    pub fn mark_rejected(self, error: String) -> Self {
        Self {
            sync: self.sync.mark_rejected(error),
            ..self
        }
    }

    pub fn mark_as_synced(self) -> Self {
        Self {
            sync: self.sync.mark_as_synced(),
            ..self
        }
    }

    pub fn retry_at(self, at: Option<Timestamp>) -> Self {
        Self {
            sync: self.sync.retry_at(at),
            ..self
        }
    }

    pub fn should_retry_sync(&self, max_attempts: u32) -> bool {
        self.sync.should_retry_sync(max_attempts)
    }
}

impl SyncTracked for FavoritePost {
    fn needs_sync(&self) -> bool {
        self.sync.needs_sync
    }

    fn touched_at(&self) -> Timestamp {
        self.favorite_at
    }
}

/// Composite identity of a user/post favorite pair.
pub fn favorite_id(user_id: UserId, post_id: PostId) -> String {
    format!("{}_{}", user_id, post_id)
}
