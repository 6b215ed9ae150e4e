//! Personalization-aware ranking over blended candidates.

use crate::behavior::BehaviorStore;
use crate::config::{SearchConfig, TimeoutConfig};
use crate::metrics;
use crate::models::{Suggestion, SuggestionSource};
use crate::search::hybrid::{compare_candidates, Candidate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;

/// Round scores the way they are returned to clients
pub(crate) fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Applies user-preference and last-selection boosts, enforces the score
/// floor, and produces the final ordered suggestion list.
#[derive(Clone)]
pub struct Ranker {
    behavior: Option<Arc<dyn BehaviorStore>>,
    config: SearchConfig,
    timeouts: TimeoutConfig,
    top_preferences: usize,
}

struct UserSignals {
    /// selected text -> normalized preference weight in [0, 1]
    preferences: HashMap<String, f64>,
    last_selection: Option<String>,
}

impl Ranker {
    pub fn new(
        behavior: Option<Arc<dyn BehaviorStore>>,
        config: SearchConfig,
        timeouts: TimeoutConfig,
        top_preferences: usize,
    ) -> Self {
        Self {
            behavior,
            config,
            timeouts,
            top_preferences,
        }
    }

    /// Fetch the user's signals; any failure disables personalization for
    /// this request only.
    async fn user_signals(&self, user_id: &str, query: &str) -> Option<UserSignals> {
        let behavior = self.behavior.as_ref()?;

        let preferences_fut = behavior.get_user_preferences(user_id, self.top_preferences);
        let last_fut = behavior.get_last_selection(user_id, query);

        let combined = async { tokio::join!(preferences_fut, last_fut) };
        match timeout(self.timeouts.behavior(), combined).await {
            Ok((Ok(preferences), Ok(last_selection))) => {
                let max_score = preferences
                    .iter()
                    .map(|(_, s)| *s)
                    .fold(0.0_f64, f64::max);
                let normalized = preferences
                    .into_iter()
                    .map(|(text, score)| {
                        let weight = if max_score > 0.0 { score / max_score } else { 0.0 };
                        (text, weight)
                    })
                    .collect();
                Some(UserSignals {
                    preferences: normalized,
                    last_selection,
                })
            }
            Ok((first, second)) => {
                let error = first.err().or(second.err());
                tracing::warn!(
                    user_id = %user_id,
                    error = ?error,
                    "Behavior store read failed, personalization disabled for this request"
                );
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["behavior"])
                    .inc();
                None
            }
            Err(_) => {
                tracing::warn!(user_id = %user_id, "Behavior store read timed out");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["behavior"])
                    .inc();
                None
            }
        }
    }

    /// Rank candidates for a user. `min_score` overrides the configured
    /// floor when provided.
    pub async fn rank(
        &self,
        user_id: Option<&str>,
        query: &str,
        mut candidates: Vec<Candidate>,
        limit: usize,
        min_score: Option<f64>,
    ) -> Vec<Suggestion> {
        let min_score = min_score.unwrap_or(self.config.min_score);

        let signals = match user_id {
            Some(user) => self.user_signals(user, query).await,
            None => None,
        };

        let alpha = self.config.personalization_weight;
        let beta = self.config.last_selection_bonus;

        let mut personalized_delta: HashMap<String, f64> = HashMap::new();

        if let Some(signals) = &signals {
            for candidate in &mut candidates {
                let base = candidate.score;
                let mut adjusted = base;

                if let Some(weight) = signals.preferences.get(&candidate.text) {
                    adjusted *= 1.0 + alpha * weight;
                }
                if signals.last_selection.as_deref() == Some(candidate.text.as_str()) {
                    adjusted += beta;
                }

                if adjusted != base {
                    personalized_delta.insert(candidate.id.clone(), adjusted - base);
                    candidate.score = adjusted;
                }
            }
        }

        candidates.retain(|c| c.score >= min_score);
        candidates.sort_by(compare_candidates);
        candidates.truncate(limit);

        candidates
            .into_iter()
            .map(|candidate| {
                let delta = personalized_delta.get(&candidate.id).copied().unwrap_or(0.0);
                // The label escalates only when the user-dependent bonus
                // dominates the final score
                let source = if delta > 0.0 && delta >= candidate.score * 0.5 {
                    SuggestionSource::Personalized
                } else {
                    candidate.source
                };

                let mut suggestion =
                    Suggestion::new(candidate.text, round_score(candidate.score), source);
                suggestion
                    .metadata
                    .insert("doc_id".to_string(), serde_json::json!(candidate.id));
                if !candidate.keywords.is_empty() {
                    suggestion
                        .metadata
                        .insert("keywords".to_string(), serde_json::json!(candidate.keywords));
                }
                if delta > 0.0 {
                    suggestion
                        .metadata
                        .insert("personalized".to_string(), serde_json::json!(true));
                }
                for (key, value) in candidate.metadata {
                    suggestion.metadata.entry(key).or_insert(value);
                }
                suggestion
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::InMemoryBehaviorStore;
    use crate::config::BehaviorConfig;

    fn candidate(id: &str, text: &str, score: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            text: text.to_string(),
            score,
            source: SuggestionSource::Hybrid,
            lexical_score: Some(score),
            vector_score: None,
            frequency: 0,
            keywords: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    fn ranker(behavior: Option<Arc<dyn BehaviorStore>>) -> Ranker {
        Ranker::new(
            behavior,
            SearchConfig::default(),
            TimeoutConfig::default(),
            50,
        )
    }

    #[tokio::test]
    async fn test_rank_without_user_keeps_order() {
        let ranker = ranker(None);
        let suggestions = ranker
            .rank(
                None,
                "销售",
                vec![candidate("1", "销售额", 0.9), candidate("2", "销量", 0.5)],
                10,
                None,
            )
            .await;

        assert_eq!(suggestions[0].text, "销售额");
        assert_eq!(suggestions[1].text, "销量");
    }

    #[tokio::test]
    async fn test_preference_and_last_selection_boost() {
        let store = Arc::new(InMemoryBehaviorStore::new(&BehaviorConfig::default()));
        for _ in 0..3 {
            store
                .record_selection("u1", "销售", "销售额趋势分析", None)
                .await
                .unwrap();
        }

        let ranker = ranker(Some(store));
        let suggestions = ranker
            .rank(
                Some("u1"),
                "销售",
                vec![
                    candidate("1", "销售额", 0.60),
                    candidate("2", "销售额趋势分析", 0.55),
                ],
                10,
                None,
            )
            .await;

        // 0.55 * 1.2 + 0.3 = 0.96 beats 0.60
        assert_eq!(suggestions[0].text, "销售额趋势分析");
        assert_eq!(
            suggestions[0].metadata.get("personalized"),
            Some(&serde_json::json!(true))
        );
    }

    #[tokio::test]
    async fn test_source_escalates_when_bonus_dominates() {
        let store = Arc::new(InMemoryBehaviorStore::new(&BehaviorConfig::default()));
        store
            .record_selection("u1", "q", "target", None)
            .await
            .unwrap();

        let ranker = ranker(Some(store));
        // Low base score: the 0.3 last-selection bonus dominates
        let suggestions = ranker
            .rank(Some("u1"), "q", vec![candidate("1", "target", 0.1)], 10, None)
            .await;

        assert_eq!(suggestions[0].source, SuggestionSource::Personalized);
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let ranker = ranker(None);
        let suggestions = ranker
            .rank(
                None,
                "q",
                vec![candidate("1", "keep", 0.8), candidate("2", "drop", 0.2)],
                10,
                Some(0.5),
            )
            .await;

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].text, "keep");
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        let ranker = ranker(None);
        let candidates = (0..10)
            .map(|i| candidate(&format!("{}", i), &format!("t{}", i), 1.0 - i as f64 * 0.01))
            .collect();
        let suggestions = ranker.rank(None, "q", candidates, 3, None).await;
        assert_eq!(suggestions.len(), 3);
    }
}
