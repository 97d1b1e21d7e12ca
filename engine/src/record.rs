//! Domain records served by the remote source and cached locally.

use crate::{error::Result, CommentId, Error, PostId, UserId};
use serde::{Deserialize, Serialize};

/// A post. Optimistic posts carry a negative temporary id until the remote
/// assigns the real one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub user_id: UserId,
    pub title: String,
    pub body: String,
}

impl Post {
    /// Whether this post is still using a client-generated id.
    pub fn has_temporary_id(&self) -> bool {
        self.id < 0
    }

    /// Case-insensitive substring match on title or body. A blank query
    /// matches everything.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        needle.is_empty()
            || self.title.to_lowercase().contains(&needle)
            || self.body.to_lowercase().contains(&needle)
    }
}

/// A comment on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub name: String,
    pub email: String,
    pub body: String,
}

/// A user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub email: String,
}

/// A validated request to create a post.
///
/// Construction is the validation point: a `NewPost` that exists is safe to
/// queue for sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    title: String,
    body: String,
    author_id: UserId,
}

impl NewPost {
    pub fn new(title: &str, body: &str, author_id: UserId) -> Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::EmptyTitle);
        }
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::EmptyBody);
        }
        if author_id <= 0 {
            return Err(Error::InvalidAuthor(author_id));
        }

        Ok(Self {
            title: title.to_string(),
            body: body.to_string(),
            author_id,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn author_id(&self) -> UserId {
        self.author_id
    }

    /// Materialise the post under a (usually temporary) id.
    pub fn into_post(self, id: PostId) -> Post {
        Post {
            id,
            user_id: self.author_id,
            title: self.title,
            body: self.body,
        }
    }
}
