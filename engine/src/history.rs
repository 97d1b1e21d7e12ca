//! Bounded, de-duplicated search history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of remembered queries.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Recent search queries, most recent first.
///
/// Re-running a query moves it to the front instead of adding a duplicate.
/// Matching ignores case and surrounding whitespace; the most recent spelling
/// is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistory {
    capacity: usize,
    queries: VecDeque<String>,
}

impl Default for SearchHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl SearchHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queries: VecDeque::with_capacity(capacity),
        }
    }

    /// Remember a query. Blank queries are ignored.
    pub fn record(&mut self, query: &str) {
        let query = query.trim();
        if query.is_empty() || self.capacity == 0 {
            return;
        }

        self.remove(query);
        self.queries.push_front(query.to_string());
        self.queries.truncate(self.capacity);
    }

    /// Forget a query. Returns whether it was present.
    pub fn remove(&mut self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        let before = self.queries.len();
        self.queries.retain(|q| q.to_lowercase() != needle);
        self.queries.len() != before
    }

    pub fn clear(&mut self) {
        self.queries.clear();
    }

    /// Queries, most recent first.
    pub fn entries(&self) -> Vec<String> {
        self.queries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
