//! In-memory behavior store (default backend and test twin of the redis
//! store). Reads are read-your-writes by construction.

use super::{
    merge_scored, sort_scored, BehaviorResult, BehaviorStore, HistoryEntry, SequenceNeighbors,
};
use crate::config::BehaviorConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::sync::Cache;
use std::collections::HashMap;

type ScoreMap = HashMap<String, f64>;

/// DashMap-backed behavior store. Sequence edges keep a precomputed
/// reverse map so `previous` lookups need no scan.
pub struct InMemoryBehaviorStore {
    history_cap: usize,
    history: DashMap<String, Vec<HistoryEntry>>,
    /// (user, query) -> most recent selection, expiring after the
    /// configured preference TTL
    last_selection: Cache<(String, String), String>,
    preferences: DashMap<String, ScoreMap>,
    popularity: DashMap<String, ScoreMap>,
    sequences: DashMap<String, ScoreMap>,
    user_sequences: DashMap<(String, String), ScoreMap>,
    reverse_sequences: DashMap<String, ScoreMap>,
    user_reverse_sequences: DashMap<(String, String), ScoreMap>,
}

impl InMemoryBehaviorStore {
    pub fn new(config: &BehaviorConfig) -> Self {
        let last_selection = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(config.preference_ttl())
            .build();

        Self {
            history_cap: config.history_cap,
            history: DashMap::new(),
            last_selection,
            preferences: DashMap::new(),
            popularity: DashMap::new(),
            sequences: DashMap::new(),
            user_sequences: DashMap::new(),
            reverse_sequences: DashMap::new(),
            user_reverse_sequences: DashMap::new(),
        }
    }

    fn top_scored(map: Option<ScoreMap>, limit: usize) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> = map.map(|m| m.into_iter().collect()).unwrap_or_default();
        sort_scored(&mut entries);
        entries.truncate(limit);
        entries
    }
}

#[async_trait]
impl BehaviorStore for InMemoryBehaviorStore {
    async fn record_selection(
        &self,
        user_id: &str,
        query: &str,
        selected: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> BehaviorResult<()> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);

        // The previous query must be read before this entry is prepended
        let prev_query = self
            .history
            .get(user_id)
            .and_then(|entries| entries.first().map(|e| e.query.clone()));

        {
            let mut entries = self.history.entry(user_id.to_string()).or_default();
            entries.insert(
                0,
                HistoryEntry {
                    query: query.to_string(),
                    selected: selected.to_string(),
                    timestamp,
                },
            );
            entries.truncate(self.history_cap);
        }

        self.last_selection.insert(
            (user_id.to_string(), query.to_string()),
            selected.to_string(),
        );

        *self
            .preferences
            .entry(user_id.to_string())
            .or_default()
            .entry(selected.to_string())
            .or_insert(0.0) += 1.0;

        *self
            .popularity
            .entry(query.to_string())
            .or_default()
            .entry(selected.to_string())
            .or_insert(0.0) += 1.0;

        if let Some(prev) = prev_query.filter(|p| p != query) {
            *self
                .sequences
                .entry(prev.clone())
                .or_default()
                .entry(query.to_string())
                .or_insert(0.0) += 1.0;
            *self
                .user_sequences
                .entry((user_id.to_string(), prev.clone()))
                .or_default()
                .entry(query.to_string())
                .or_insert(0.0) += 1.0;
            *self
                .reverse_sequences
                .entry(query.to_string())
                .or_default()
                .entry(prev.clone())
                .or_insert(0.0) += 1.0;
            *self
                .user_reverse_sequences
                .entry((user_id.to_string(), query.to_string()))
                .or_default()
                .entry(prev)
                .or_insert(0.0) += 1.0;
        }

        tracing::debug!(user_id = %user_id, query = %query, selected = %selected, "Selection recorded");
        Ok(())
    }

    async fn get_history(&self, user_id: &str, limit: usize) -> BehaviorResult<Vec<HistoryEntry>> {
        Ok(self
            .history
            .get(user_id)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_user_preferences(
        &self,
        user_id: &str,
        limit: usize,
    ) -> BehaviorResult<Vec<(String, f64)>> {
        Ok(Self::top_scored(
            self.preferences.get(user_id).map(|m| m.value().clone()),
            limit,
        ))
    }

    async fn get_last_selection(
        &self,
        user_id: &str,
        query: &str,
    ) -> BehaviorResult<Option<String>> {
        Ok(self
            .last_selection
            .get(&(user_id.to_string(), query.to_string())))
    }

    async fn get_sequences(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> BehaviorResult<SequenceNeighbors> {
        let user_next = user_id
            .map(|u| {
                Self::top_scored(
                    self.user_sequences
                        .get(&(u.to_string(), query.to_string()))
                        .map(|m| m.value().clone()),
                    limit,
                )
            })
            .unwrap_or_default();
        let global_next = Self::top_scored(self.sequences.get(query).map(|m| m.value().clone()), limit);

        let user_previous = user_id
            .map(|u| {
                Self::top_scored(
                    self.user_reverse_sequences
                        .get(&(u.to_string(), query.to_string()))
                        .map(|m| m.value().clone()),
                    limit,
                )
            })
            .unwrap_or_default();
        let global_previous =
            Self::top_scored(self.reverse_sequences.get(query).map(|m| m.value().clone()), limit);

        let mut next = merge_scored(user_next, global_next, limit);
        let mut previous = merge_scored(user_previous, global_previous, limit);
        sort_scored(&mut next);
        sort_scored(&mut previous);

        Ok(SequenceNeighbors { next, previous })
    }

    async fn check_connection(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryBehaviorStore {
        InMemoryBehaviorStore::new(&BehaviorConfig::default())
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_bounded() {
        let config = BehaviorConfig {
            history_cap: 3,
            ..Default::default()
        };
        let store = InMemoryBehaviorStore::new(&config);

        for i in 0..5 {
            store
                .record_selection("u1", &format!("q{}", i), &format!("s{}", i), None)
                .await
                .unwrap();
        }

        let history = store.get_history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].query, "q4");
        assert_eq!(history[2].query, "q2");
    }

    #[tokio::test]
    async fn test_preferences_accumulate() {
        let store = store();

        for _ in 0..3 {
            store
                .record_selection("u1", "销售", "销售额趋势分析", None)
                .await
                .unwrap();
        }
        store
            .record_selection("u1", "销售", "销售额", None)
            .await
            .unwrap();

        let prefs = store.get_user_preferences("u1", 10).await.unwrap();
        assert_eq!(prefs[0], ("销售额趋势分析".to_string(), 3.0));
        assert_eq!(prefs[1], ("销售额".to_string(), 1.0));
    }

    #[tokio::test]
    async fn test_last_selection() {
        let store = store();

        store
            .record_selection("u1", "销售", "销售额", None)
            .await
            .unwrap();
        store
            .record_selection("u1", "销售", "销售额趋势分析", None)
            .await
            .unwrap();

        let last = store.get_last_selection("u1", "销售").await.unwrap();
        assert_eq!(last.as_deref(), Some("销售额趋势分析"));

        let other = store.get_last_selection("u1", "市场").await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_sequence_edges() {
        let store = store();

        // Chronological session: A then B then C
        store.record_selection("u2", "A", "A", None).await.unwrap();
        store.record_selection("u2", "B", "B", None).await.unwrap();
        store.record_selection("u2", "C", "C", None).await.unwrap();

        let a = store.get_sequences("A", None, 10).await.unwrap();
        assert_eq!(a.next[0].0, "B");

        let b = store.get_sequences("B", None, 10).await.unwrap();
        assert_eq!(b.next[0].0, "C");
        assert_eq!(b.previous[0].0, "A");

        let c = store.get_sequences("C", None, 10).await.unwrap();
        assert_eq!(c.previous[0].0, "B");
        assert!(c.next.is_empty());
    }

    #[tokio::test]
    async fn test_self_loop_not_recorded() {
        let store = store();

        store.record_selection("u1", "A", "x", None).await.unwrap();
        store.record_selection("u1", "A", "y", None).await.unwrap();

        let seq = store.get_sequences("A", None, 10).await.unwrap();
        assert!(seq.next.is_empty());
        assert!(seq.previous.is_empty());
    }

    #[tokio::test]
    async fn test_user_sequences_rank_ahead_of_global() {
        let store = store();

        // Global edge A -> C recorded twice by another user
        store.record_selection("u3", "A", "A", None).await.unwrap();
        store.record_selection("u3", "C", "C", None).await.unwrap();
        store.record_selection("u3", "A", "A", None).await.unwrap();
        store.record_selection("u3", "C", "C", None).await.unwrap();

        // u4's own edge A -> B recorded once
        store.record_selection("u4", "A", "A", None).await.unwrap();
        store.record_selection("u4", "B", "B", None).await.unwrap();

        let seq = store.get_sequences("A", Some("u4"), 10).await.unwrap();
        let names: Vec<&str> = seq.next.iter().map(|(q, _)| q.as_str()).collect();
        assert!(names.contains(&"B"));
        assert!(names.contains(&"C"));
    }

    #[tokio::test]
    async fn test_deterministic_tiebreak() {
        let store = store();

        store.record_selection("u1", "q", "b", None).await.unwrap();
        store.record_selection("u1", "q", "a", None).await.unwrap();

        let prefs = store.get_user_preferences("u1", 10).await.unwrap();
        // Equal scores resolve lexicographically ascending
        assert_eq!(prefs[0].0, "a");
        assert_eq!(prefs[1].0, "b");
    }
}
