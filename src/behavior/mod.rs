//! Behavior store: per-user history, selection preferences, global
//! popularity, and pairwise query-sequence counters.
//!
//! No behavior operation may fail a caller's request; the orchestrator
//! logs and swallows every error from this layer.

mod memory;
mod redis_store;

pub use memory::InMemoryBehaviorStore;
pub use redis_store::RedisBehaviorStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for behavior store operations
pub type BehaviorResult<T> = std::result::Result<T, BehaviorError>;

/// Errors that can occur in the behavior store
#[derive(Debug, Error)]
pub enum BehaviorError {
    /// Backend unreachable
    #[error("Behavior store connection failed: {0}")]
    ConnectionFailed(String),

    /// A read or write failed
    #[error("Behavior store operation failed: {0}")]
    OperationFailed(String),

    /// Stored payload could not be decoded
    #[error("Behavior store serialization error: {0}")]
    Serialization(String),
}

/// One recorded selection, newest first in a user's history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub query: String,
    pub selected: String,
    pub timestamp: DateTime<Utc>,
}

/// Queries adjacent to a given query in recorded sessions, with edge
/// weights, both ordered by weight descending
#[derive(Debug, Clone, Default)]
pub struct SequenceNeighbors {
    pub next: Vec<(String, f64)>,
    pub previous: Vec<(String, f64)>,
}

/// Behavior store seam. Implementations must keep all counters
/// non-negative and expose top-K reads in descending-score order with a
/// lexicographic-ascending tiebreak.
#[async_trait]
pub trait BehaviorStore: Send + Sync {
    /// Record one selection: history, last-selection, preference score,
    /// global popularity, and (when a prior query exists) sequence edges.
    async fn record_selection(
        &self,
        user_id: &str,
        query: &str,
        selected: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> BehaviorResult<()>;

    /// Newest-first selection history, bounded
    async fn get_history(&self, user_id: &str, limit: usize) -> BehaviorResult<Vec<HistoryEntry>>;

    /// The user's most frequently selected texts with scores, bounded
    async fn get_user_preferences(
        &self,
        user_id: &str,
        limit: usize,
    ) -> BehaviorResult<Vec<(String, f64)>>;

    /// Most recent selection this user made for this exact query text
    async fn get_last_selection(
        &self,
        user_id: &str,
        query: &str,
    ) -> BehaviorResult<Option<String>>;

    /// Queries observed before/after the given query, optionally merged
    /// with the user's own sequences first
    async fn get_sequences(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> BehaviorResult<SequenceNeighbors>;

    /// Whether the backend is reachable
    async fn check_connection(&self) -> bool;
}

/// Sort a multiset snapshot: score descending, key ascending
pub(crate) fn sort_scored(entries: &mut Vec<(String, f64)>) {
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

/// Merge user-specific entries ahead of global ones, deduplicating by key
pub(crate) fn merge_scored(
    user: Vec<(String, f64)>,
    global: Vec<(String, f64)>,
    limit: usize,
) -> Vec<(String, f64)> {
    let mut merged = user;
    let seen: std::collections::HashSet<String> =
        merged.iter().map(|(k, _)| k.clone()).collect();
    for (key, score) in global {
        if !seen.contains(&key) {
            merged.push((key, score));
        }
    }
    merged.truncate(limit);
    merged
}
