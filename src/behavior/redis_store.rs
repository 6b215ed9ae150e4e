//! Redis-backed behavior store.
//!
//! Key layout (optionally namespaced by a configured prefix):
//!   user:{u}:history      list of JSON entries, newest first, bounded
//!   user:{u}:pref:{q}     last-selected text, expiring after the TTL
//!   user:{u}:freq         sorted set: selected text -> cumulative score
//!   global:query:{q}      sorted set: selected text -> cumulative score
//!   sequence:{q}          sorted set: next query -> edge weight
//!   user:{u}:sequence:{q} sorted set: next query -> edge weight

use super::{
    merge_scored, sort_scored, BehaviorError, BehaviorResult, BehaviorStore, HistoryEntry,
    SequenceNeighbors,
};
use crate::config::BehaviorConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

#[derive(Clone)]
pub struct RedisBehaviorStore {
    connection: ConnectionManager,
    key_prefix: String,
    history_cap: usize,
    preference_ttl_secs: u64,
}

impl RedisBehaviorStore {
    /// Create a new redis-backed store and verify the connection
    pub async fn new(redis_url: &str, config: &BehaviorConfig) -> BehaviorResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            BehaviorError::ConnectionFailed(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            BehaviorError::ConnectionFailed(format!("Failed to connect to Redis: {}", e))
        })?;

        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await
            .map_err(|e| {
                BehaviorError::ConnectionFailed(format!("Redis connection test failed: {}", e))
            })?;

        tracing::info!(prefix = %config.key_prefix, "Behavior store connected to Redis");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            history_cap: config.history_cap,
            preference_ttl_secs: config.preference_ttl_secs,
        })
    }

    fn key(&self, suffix: String) -> String {
        if self.key_prefix.is_empty() {
            suffix
        } else {
            format!("{}:{}", self.key_prefix, suffix)
        }
    }

    fn history_key(&self, user_id: &str) -> String {
        self.key(format!("user:{}:history", user_id))
    }

    fn last_selection_key(&self, user_id: &str, query: &str) -> String {
        self.key(format!("user:{}:pref:{}", user_id, query))
    }

    fn preferences_key(&self, user_id: &str) -> String {
        self.key(format!("user:{}:freq", user_id))
    }

    fn popularity_key(&self, query: &str) -> String {
        self.key(format!("global:query:{}", query))
    }

    fn sequence_key(&self, query: &str) -> String {
        self.key(format!("sequence:{}", query))
    }

    fn user_sequence_key(&self, user_id: &str, query: &str) -> String {
        self.key(format!("user:{}:sequence:{}", user_id, query))
    }

    fn op_err(e: redis::RedisError) -> BehaviorError {
        BehaviorError::OperationFailed(e.to_string())
    }

    /// Most recent query in the user's history, read before the new entry
    /// is prepended
    async fn previous_query(&self, user_id: &str) -> BehaviorResult<Option<String>> {
        let mut conn = self.connection.clone();
        let entries: Vec<String> = conn
            .lrange(self.history_key(user_id), 0, 0)
            .await
            .map_err(Self::op_err)?;

        match entries.first() {
            Some(raw) => {
                let entry: HistoryEntry = serde_json::from_str(raw)
                    .map_err(|e| BehaviorError::Serialization(e.to_string()))?;
                Ok(Some(entry.query))
            }
            None => Ok(None),
        }
    }

    /// Collect scan keys matching a pattern (SCAN cursors borrow the
    /// connection, so keys are collected before the per-key reads)
    async fn scan_keys(&self, pattern: &str) -> BehaviorResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<String> =
            conn.scan_match(pattern).await.map_err(Self::op_err)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    /// Reverse sequence lookup: queries Q' such that sequence[Q'][query]
    /// exists, found by scanning the prefix-indexed keys
    async fn previous_neighbors(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> BehaviorResult<Vec<(String, f64)>> {
        let mut user_entries: Vec<(String, f64)> = Vec::new();
        let mut global_entries: Vec<(String, f64)> = Vec::new();

        if let Some(user) = user_id {
            let marker = self.key(format!("user:{}:sequence:", user));
            for key in self.scan_keys(&format!("{}*", marker)).await? {
                let Some(prev) = key.strip_prefix(&marker) else {
                    continue;
                };
                if prev.is_empty() || prev == query {
                    continue;
                }
                let mut conn = self.connection.clone();
                let score: Option<f64> = conn.zscore(&key, query).await.map_err(Self::op_err)?;
                if let Some(score) = score {
                    user_entries.push((prev.to_string(), score));
                }
            }
        }

        let marker = self.key("sequence:".to_string());
        for key in self.scan_keys(&format!("{}*", marker)).await? {
            let Some(prev) = key.strip_prefix(&marker) else {
                continue;
            };
            if prev.is_empty() || prev == query {
                continue;
            }
            let mut conn = self.connection.clone();
            let score: Option<f64> = conn.zscore(&key, query).await.map_err(Self::op_err)?;
            if let Some(score) = score {
                global_entries.push((prev.to_string(), score));
            }
        }

        sort_scored(&mut user_entries);
        sort_scored(&mut global_entries);
        let mut merged = merge_scored(user_entries, global_entries, limit);
        sort_scored(&mut merged);
        Ok(merged)
    }
}

#[async_trait]
impl BehaviorStore for RedisBehaviorStore {
    async fn record_selection(
        &self,
        user_id: &str,
        query: &str,
        selected: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> BehaviorResult<()> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let prev_query = self.previous_query(user_id).await?;

        let mut conn = self.connection.clone();

        let entry = serde_json::to_string(&HistoryEntry {
            query: query.to_string(),
            selected: selected.to_string(),
            timestamp,
        })
        .map_err(|e| BehaviorError::Serialization(e.to_string()))?;

        let history_key = self.history_key(user_id);
        let _: () = conn.lpush(&history_key, entry).await.map_err(Self::op_err)?;
        let _: () = conn
            .ltrim(&history_key, 0, self.history_cap as isize - 1)
            .await
            .map_err(Self::op_err)?;

        let _: () = conn
            .set_ex(
                self.last_selection_key(user_id, query),
                selected,
                self.preference_ttl_secs,
            )
            .await
            .map_err(Self::op_err)?;

        let _: () = conn
            .zincr(self.preferences_key(user_id), selected, 1.0)
            .await
            .map_err(Self::op_err)?;

        let _: () = conn
            .zincr(self.popularity_key(query), selected, 1.0)
            .await
            .map_err(Self::op_err)?;

        if let Some(prev) = prev_query.filter(|p| p != query) {
            let _: () = conn
                .zincr(self.sequence_key(&prev), query, 1.0)
                .await
                .map_err(Self::op_err)?;
            let _: () = conn
                .zincr(self.user_sequence_key(user_id, &prev), query, 1.0)
                .await
                .map_err(Self::op_err)?;
        }

        tracing::debug!(user_id = %user_id, query = %query, selected = %selected, "Selection recorded");
        Ok(())
    }

    async fn get_history(&self, user_id: &str, limit: usize) -> BehaviorResult<Vec<HistoryEntry>> {
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn
            .lrange(self.history_key(user_id), 0, limit as isize - 1)
            .await
            .map_err(Self::op_err)?;

        raw.iter()
            .map(|item| {
                serde_json::from_str(item).map_err(|e| BehaviorError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn get_user_preferences(
        &self,
        user_id: &str,
        limit: usize,
    ) -> BehaviorResult<Vec<(String, f64)>> {
        let mut conn = self.connection.clone();
        conn.zrevrange_withscores(self.preferences_key(user_id), 0, limit as isize - 1)
            .await
            .map_err(Self::op_err)
    }

    async fn get_last_selection(
        &self,
        user_id: &str,
        query: &str,
    ) -> BehaviorResult<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(self.last_selection_key(user_id, query))
            .await
            .map_err(Self::op_err)
    }

    async fn get_sequences(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> BehaviorResult<SequenceNeighbors> {
        let mut conn = self.connection.clone();

        let user_next: Vec<(String, f64)> = match user_id {
            Some(user) => conn
                .zrevrange_withscores(
                    self.user_sequence_key(user, query),
                    0,
                    limit as isize - 1,
                )
                .await
                .map_err(Self::op_err)?,
            None => Vec::new(),
        };

        let global_next: Vec<(String, f64)> = conn
            .zrevrange_withscores(self.sequence_key(query), 0, limit as isize - 1)
            .await
            .map_err(Self::op_err)?;

        let mut next = merge_scored(user_next, global_next, limit);
        sort_scored(&mut next);

        let previous = self.previous_neighbors(query, user_id, limit).await?;

        Ok(SequenceNeighbors { next, previous })
    }

    async fn check_connection(&self) -> bool {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_URL: &str = "redis://127.0.0.1:6379/15";

    async fn create_test_store() -> Option<RedisBehaviorStore> {
        let config = BehaviorConfig {
            key_prefix: format!("test-behavior-{}", std::process::id()),
            history_cap: 10,
            ..Default::default()
        };
        RedisBehaviorStore::new(TEST_URL, &config).await.ok()
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let Some(store) = create_test_store().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        store
            .record_selection("u1", "销售", "销售额趋势分析", None)
            .await
            .unwrap();
        store
            .record_selection("u1", "销售", "销售额趋势分析", None)
            .await
            .unwrap();

        let history = store.get_history("u1", 10).await.unwrap();
        assert!(history.len() >= 2);
        assert_eq!(history[0].query, "销售");

        let prefs = store.get_user_preferences("u1", 10).await.unwrap();
        assert!(prefs.iter().any(|(t, s)| t == "销售额趋势分析" && *s >= 2.0));

        let last = store.get_last_selection("u1", "销售").await.unwrap();
        assert_eq!(last.as_deref(), Some("销售额趋势分析"));
    }

    #[tokio::test]
    async fn test_sequences_roundtrip() {
        let Some(store) = create_test_store().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let user = format!("seq-user-{}", std::process::id());
        store
            .record_selection(&user, "seqA", "seqA", None)
            .await
            .unwrap();
        store
            .record_selection(&user, "seqB", "seqB", None)
            .await
            .unwrap();

        let seq = store.get_sequences("seqA", Some(&user), 10).await.unwrap();
        assert!(seq.next.iter().any(|(q, _)| q == "seqB"));

        let reverse = store.get_sequences("seqB", Some(&user), 10).await.unwrap();
        assert!(reverse.previous.iter().any(|(q, _)| q == "seqA"));
    }
}
