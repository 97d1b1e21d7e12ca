//! Key scheme for the local store.
//!
//! Every key is `<namespace>:<suffix>`:
//!
//! | key                         | value                              |
//! |-----------------------------|------------------------------------|
//! | `post:<id>`                 | `CacheEntry<Post>`                 |
//! | `comments:<postId>`         | `CachedList<CacheEntry<Comment>>`  |
//! | `user:<id>`                 | `CacheEntry<User>`                 |
//! | `favorite:<userId>_<postId>`| `FavoritePost`                     |
//! | `cache-meta:<key>`          | `CacheMetadata`                    |
//! | `search:<query>`            | `SearchResult`                     |

use crate::{error::Result, favorite::favorite_id, metadata::DataType, Error, PostId, UserId};
use serde::{Deserialize, Serialize};

/// Top-level partition of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Namespace {
    Post,
    Comments,
    User,
    Favorite,
    CacheMeta,
    Search,
}

impl Namespace {
    pub const ALL: [Namespace; 6] = [
        Namespace::Post,
        Namespace::Comments,
        Namespace::User,
        Namespace::Favorite,
        Namespace::CacheMeta,
        Namespace::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Post => "post",
            Namespace::Comments => "comments",
            Namespace::User => "user",
            Namespace::Favorite => "favorite",
            Namespace::CacheMeta => "cache-meta",
            Namespace::Search => "search",
        }
    }

    /// Namespace by its prefix, e.g. `cache-meta`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == name)
    }

    /// Namespace of a full key such as `post:12`.
    pub fn of_key(key: &str) -> Result<Self> {
        match key.split_once(':') {
            Some((prefix, suffix)) if !suffix.is_empty() => {
                Self::parse(prefix).ok_or_else(|| Error::InvalidKey(key.to_string()))
            }
            _ => Err(Error::InvalidKey(key.to_string())),
        }
    }

    /// Namespace holding the cached records of a data type.
    pub fn for_data_type(data_type: DataType) -> Self {
        match data_type {
            DataType::Posts => Namespace::Post,
            DataType::Comments => Namespace::Comments,
            DataType::Users => Namespace::User,
            DataType::Search => Namespace::Search,
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn post(id: PostId) -> String {
    format!("post:{}", id)
}

pub fn comments(post_id: PostId) -> String {
    format!("comments:{}", post_id)
}

pub fn user(id: UserId) -> String {
    format!("user:{}", id)
}

pub fn favorite(user_id: UserId, post_id: PostId) -> String {
    format!("favorite:{}", favorite_id(user_id, post_id))
}

/// Metadata key for a cache key, e.g. `cache-meta:posts:all`.
pub fn metadata(cache_key: &str) -> String {
    format!("cache-meta:{}", cache_key)
}

/// Search results key. Queries are trimmed and lowercased so equivalent
/// searches share one entry.
pub fn search(query: &str) -> Result<String> {
    let normalized = normalize_query(query);
    if normalized.is_empty() {
        return Err(Error::EmptyQuery);
    }
    Ok(format!("search:{}", normalized))
}

/// Cache key of the full post feed.
pub const ALL_POSTS: &str = "posts:all";

pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

fn suffix<'a>(key: &'a str, namespace: Namespace) -> Option<&'a str> {
    key.strip_prefix(namespace.as_str())?.strip_prefix(':')
}

/// Post id of a `post:<id>` key.
pub fn parse_post_id(key: &str) -> Option<PostId> {
    suffix(key, Namespace::Post)?.parse().ok()
}

/// Post id of a `comments:<postId>` key.
pub fn parse_comments_post_id(key: &str) -> Option<PostId> {
    suffix(key, Namespace::Comments)?.parse().ok()
}

/// `(user_id, post_id)` of a `favorite:<userId>_<postId>` key.
pub fn parse_favorite(key: &str) -> Option<(UserId, PostId)> {
    let (user, post) = suffix(key, Namespace::Favorite)?.split_once('_')?;
    Some((user.parse().ok()?, post.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builders() {
        assert_eq!(post(55), "post:55");
        assert_eq!(post(-1001), "post:-1001");
        assert_eq!(comments(7), "comments:7");
        assert_eq!(favorite(3, 55), "favorite:3_55");
        assert_eq!(metadata(ALL_POSTS), "cache-meta:posts:all");
        assert_eq!(search("  Rust ").unwrap(), "search:rust");
        assert_eq!(search("   "), Err(Error::EmptyQuery));
    }

    #[test]
    fn namespace_of_key() {
        assert_eq!(Namespace::of_key("post:1").unwrap(), Namespace::Post);
        assert_eq!(
            Namespace::of_key("cache-meta:posts:all").unwrap(),
            Namespace::CacheMeta
        );
        assert_eq!(Namespace::of_key("search:a b").unwrap(), Namespace::Search);
        assert!(Namespace::of_key("posts:1").is_err());
        assert!(Namespace::of_key("post:").is_err());
        assert!(Namespace::of_key("post").is_err());
        assert_eq!(Namespace::parse("favorite"), Some(Namespace::Favorite));
        assert_eq!(Namespace::parse("favorites"), None);
    }

    #[test]
    fn parse_keys() {
        assert_eq!(parse_post_id("post:-1001"), Some(-1001));
        assert_eq!(parse_post_id("comments:3"), None);
        assert_eq!(parse_comments_post_id("comments:3"), Some(3));
        assert_eq!(parse_favorite("favorite:3_-1001"), Some((3, -1001)));
        assert_eq!(parse_favorite("favorite:garbage"), None);
    }

    #[test]
    fn data_type_namespaces() {
        for data_type in DataType::ALL {
            let ns = Namespace::for_data_type(data_type);
            assert_ne!(ns, Namespace::Favorite);
            assert_ne!(ns, Namespace::CacheMeta);
        }
    }
}
