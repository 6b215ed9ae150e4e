//! Prefix-preserving completion engine.

use crate::behavior::BehaviorStore;
use crate::config::{PrefixConfig, TimeoutConfig};
use crate::error::Result;
use crate::lexical::{LexicalHit, LexicalSearcher};
use crate::metrics;
use crate::models::{normalized_key, RequestContext, Suggestion, SuggestionSource};
use crate::oracle::Oracle;
use crate::prefix::tokenizer::segment;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::timeout;

/// Divisor for the popularity term in the oracle-free scoring path
const FALLBACK_POPULARITY_DIVISOR: f64 = 10.0;

/// Result of splitting an input into stable prefix and unfinished tail
#[derive(Debug, Clone)]
pub struct InputAnalysis {
    /// Text before the unfinished term, original separators preserved
    pub prefix: String,
    /// The unfinished trailing term
    pub tail: String,
    pub tokens: Vec<String>,
    /// Whether the query qualifies for prefix-preservation mode
    pub is_long_query: bool,
}

/// Completes the trailing term of a long query while leaving everything
/// before it untouched. Falls back to the regular retrieval path (by
/// returning `None`) whenever it cannot produce enough completions.
pub struct PrefixCompletionEngine {
    lexical: LexicalSearcher,
    oracle: Option<Arc<dyn Oracle>>,
    behavior: Option<Arc<dyn BehaviorStore>>,
    config: PrefixConfig,
    timeouts: TimeoutConfig,
}

impl PrefixCompletionEngine {
    pub fn new(
        lexical: LexicalSearcher,
        oracle: Option<Arc<dyn Oracle>>,
        behavior: Option<Arc<dyn BehaviorStore>>,
        config: PrefixConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            lexical,
            oracle,
            behavior,
            config,
            timeouts,
        }
    }

    /// Split the query into prefix and tail. The tail is the last token;
    /// the prefix keeps the original text up to it.
    pub fn analyze(&self, query: &str) -> InputAnalysis {
        let query = query.trim();
        let tokens = segment(query);

        let is_long_query = tokens.len() >= self.config.min_tokens;
        if !is_long_query || tokens.is_empty() {
            return InputAnalysis {
                prefix: String::new(),
                tail: query.to_string(),
                tokens,
                is_long_query: false,
            };
        }

        let tail = tokens.last().cloned().unwrap_or_default();
        let prefix = match query.rfind(&tail) {
            Some(idx) => query[..idx].trim_end().to_string(),
            None => String::new(),
        };

        InputAnalysis {
            prefix,
            tail,
            tokens,
            is_long_query: true,
        }
    }

    /// Fetch tail-completion candidates from the lexical index
    async fn completion_candidates(&self, tail: &str) -> Vec<LexicalHit> {
        let searcher = self.lexical.clone();
        let tail = tail.to_string();
        let limit = self.config.candidate_limit;
        let task = tokio::task::spawn_blocking(move || searcher.search(&tail, limit));

        match timeout(self.timeouts.lex(), task).await {
            Ok(Ok(Ok(hits))) => {
                // One candidate per distinct text
                let mut seen = HashSet::new();
                hits.into_iter()
                    .filter(|hit| seen.insert(normalized_key(&hit.text)))
                    .collect()
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Tail candidate search failed");
                metrics::SWALLOWED_ERRORS_TOTAL
                    .with_label_values(&["prefix_candidates"])
                    .inc();
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Tail candidate search panicked");
                metrics::SWALLOWED_ERRORS_TOTAL
                    .with_label_values(&["prefix_candidates"])
                    .inc();
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("Tail candidate search timed out");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["lexical"])
                    .inc();
                Vec::new()
            }
        }
    }

    /// Personalization context for the oracle ranking call
    async fn user_context(&self, user_id: &str) -> Option<RequestContext> {
        let behavior = self.behavior.as_ref()?;
        match timeout(self.timeouts.behavior(), behavior.get_user_preferences(user_id, 5)).await {
            Ok(Ok(preferences)) => Some(RequestContext {
                user_history: preferences.into_iter().map(|(text, _)| text).collect(),
                ..Default::default()
            }),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "User context fetch failed");
                None
            }
            Err(_) => None,
        }
    }

    /// Score candidates without the oracle: normalized lexical score plus
    /// a damped popularity term.
    fn fallback_ranking(&self, candidates: &[LexicalHit]) -> Vec<(String, f64)> {
        let max_score = candidates.iter().map(|h| h.score).fold(0.0_f64, f64::max);

        let mut ranked: Vec<(String, f64)> = candidates
            .iter()
            .map(|hit| {
                let lex_norm = if max_score > 0.0 {
                    hit.score / max_score
                } else {
                    0.0
                };
                let popularity = (1.0 + hit.frequency as f64).ln() / FALLBACK_POPULARITY_DIVISOR;
                (hit.text.clone(), (lex_norm + popularity).min(1.0))
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
    }

    /// Main entry point. `Ok(None)` signals "no preserved results" and the
    /// caller falls back to the regular retrieval path.
    pub async fn suggest(
        &self,
        query: &str,
        user_id: Option<&str>,
        context: Option<&RequestContext>,
        limit: usize,
    ) -> Result<Option<Vec<Suggestion>>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let analysis = self.analyze(query);
        if !analysis.is_long_query {
            tracing::debug!(query = %query, "Query below prefix-preservation threshold");
            return Ok(None);
        }
        if analysis.tail.chars().count() < self.config.min_tail_chars {
            tracing::debug!(tail = %analysis.tail, "Trailing term too short");
            return Ok(None);
        }

        let candidates = self.completion_candidates(&analysis.tail).await;
        if candidates.is_empty() {
            tracing::debug!(tail = %analysis.tail, "No completion candidates");
            return Ok(None);
        }

        // Caller-provided context wins; otherwise build one from behavior
        let built_context = match (context, user_id) {
            (Some(_), _) => None,
            (None, Some(user)) => self.user_context(user).await,
            (None, None) => None,
        };
        let effective_context = context.or(built_context.as_ref());

        let candidate_texts: Vec<String> = candidates.iter().map(|h| h.text.clone()).collect();

        let (ranked, method) = match &self.oracle {
            Some(oracle) if oracle.is_available() => {
                let completions = oracle
                    .rank_prefix_completions(
                        &analysis.prefix,
                        &analysis.tail,
                        &candidate_texts,
                        effective_context,
                    )
                    .await;
                if completions.is_empty() {
                    (self.fallback_ranking(&candidates), "fallback")
                } else {
                    (
                        completions.into_iter().map(|c| (c.text, c.score)).collect(),
                        "oracle",
                    )
                }
            }
            _ => (self.fallback_ranking(&candidates), "fallback"),
        };

        let result_limit = limit.min(self.config.result_limit);
        let mut seen = HashSet::new();
        let mut suggestions = Vec::new();

        for (completed_term, score) in ranked {
            let text = join_prefix_tail(&analysis.prefix, &completed_term);
            if !seen.insert(normalized_key(&text)) {
                continue;
            }

            let mut suggestion = Suggestion::new(
                text,
                crate::search::round_score(score),
                SuggestionSource::PrefixPreserved,
            );
            suggestion
                .metadata
                .insert("prefix".to_string(), serde_json::json!(analysis.prefix));
            suggestion.metadata.insert(
                "incomplete_term".to_string(),
                serde_json::json!(analysis.tail),
            );
            suggestion.metadata.insert(
                "completed_term".to_string(),
                serde_json::json!(completed_term),
            );
            suggestion
                .metadata
                .insert("method".to_string(), serde_json::json!(method));
            suggestions.push(suggestion);

            if suggestions.len() >= result_limit {
                break;
            }
        }

        if suggestions.len() < self.config.min_preserved {
            return Ok(None);
        }

        tracing::info!(
            query = %query,
            count = suggestions.len(),
            method = method,
            "Prefix-preserved suggestions generated"
        );
        Ok(Some(suggestions))
    }
}

/// Join the stable prefix with a completed tail. An ASCII space separates
/// the pieces only when both boundary characters are ASCII alphanumeric;
/// CJK boundaries join directly.
fn join_prefix_tail(prefix: &str, tail: &str) -> String {
    if prefix.is_empty() {
        return tail.to_string();
    }
    let boundary_left = prefix.chars().next_back().map(|c| c.is_ascii_alphanumeric());
    let boundary_right = tail.chars().next().map(|c| c.is_ascii_alphanumeric());
    if boundary_left == Some(true) && boundary_right == Some(true) {
        format!("{} {}", prefix, tail)
    } else {
        format!("{}{}", prefix, tail)
    }
}
