//! Orchestrator: the public entry points of the suggestion engine.
//!
//! Every request fans out to its candidate sources in parallel under a
//! total deadline, degrades source by source, and only fails when no
//! source at all produced candidates.

use crate::behavior::BehaviorStore;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{AppError, Result};
use crate::lexical::{IndexManager, LexicalSearcher};
use crate::metrics;
use crate::models::{normalized_key, RequestContext, Suggestion, SuggestionSource};
use crate::oracle::Oracle;
use crate::prefix::PrefixCompletionEngine;
use crate::search::{round_score, BlendWeights, Candidate, HybridSearcher, Ranker};
use crate::store::{BulkAddReport, DocumentStore, NewDocument};
use crate::vector::VectorSearch;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;

/// Multiplier that keeps results for the user's literal query ahead of
/// expansion-derived results
const ORIGINAL_QUERY_PRIORITY: f64 = 1.1;

/// Score bands for the related-queries union
const RELATED_LLM_CEILING: f64 = 0.95;
const RELATED_LLM_FLOOR: f64 = 0.90;
const RELATED_SEQUENCE_NEXT_BAND: f64 = 0.85;
const RELATED_HYBRID_CLIP: f64 = 0.80;
const RELATED_SEQUENCE_PREV_BAND: f64 = 0.75;
const RELATED_HISTORY_BAND: f64 = 0.70;

/// Service health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub lexical_connected: bool,
    pub vector_connected: bool,
    pub behavior_connected: bool,
}

/// The suggestion engine's public operations. All retrieval services are
/// injected at construction; nothing here mutates state on the read path.
pub struct SuggestService {
    config: Config,
    embedding: Arc<EmbeddingProvider>,
    lexical: Arc<IndexManager>,
    vector: Arc<dyn VectorSearch>,
    behavior: Option<Arc<dyn BehaviorStore>>,
    oracle: Option<Arc<dyn Oracle>>,
    store: DocumentStore,
    hybrid: HybridSearcher,
    ranker: Ranker,
    prefix: PrefixCompletionEngine,
}

impl SuggestService {
    pub fn new(
        config: Config,
        embedding: Arc<EmbeddingProvider>,
        lexical: Arc<IndexManager>,
        vector: Arc<dyn VectorSearch>,
        behavior: Option<Arc<dyn BehaviorStore>>,
        oracle: Option<Arc<dyn Oracle>>,
    ) -> Self {
        let behavior = if config.behavior.enabled { behavior } else { None };

        let lexical_searcher = LexicalSearcher::new(lexical.clone(), config.lexical.clone());
        let hybrid = HybridSearcher::new(
            lexical_searcher.clone(),
            vector.clone(),
            config.timeouts.clone(),
        );
        let ranker = Ranker::new(
            behavior.clone(),
            config.search.clone(),
            config.timeouts.clone(),
            config.behavior.top_preferences,
        );
        let prefix = PrefixCompletionEngine::new(
            lexical_searcher,
            oracle.clone(),
            behavior.clone(),
            config.prefix.clone(),
            config.timeouts.clone(),
        );
        let store = DocumentStore::new(embedding.clone(), lexical.clone(), vector.clone());

        Self {
            config,
            embedding,
            lexical,
            vector,
            behavior,
            oracle,
            store,
            hybrid,
            ranker,
            prefix,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    fn blend_weights(&self) -> BlendWeights {
        BlendWeights::new(
            self.config.search.keyword_weight,
            self.config.search.vector_weight,
        )
    }

    fn validate_query(query: &str) -> Result<&str> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("query must not be empty".to_string()));
        }
        Ok(trimmed)
    }

    /// Time left inside the request's total budget
    fn remaining(&self, started: Instant) -> std::time::Duration {
        self.config
            .timeouts
            .total()
            .saturating_sub(started.elapsed())
    }

    /// Embed the query, degrading to no vector leg on failure or timeout
    async fn embed_query(&self, query: &str, budget: std::time::Duration) -> Option<Arc<Vec<f32>>> {
        let embed_timeout = self.config.timeouts.embed().min(budget);
        match timeout(embed_timeout, self.embedding.encode_single(query)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Query embedding failed, vector leg skipped");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["embedding"])
                    .inc();
                None
            }
            Err(_) => {
                tracing::warn!("Query embedding timed out, vector leg skipped");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["embedding"])
                    .inc();
                None
            }
        }
    }

    /// Autocomplete entry point: prefix-preserving completion first, then
    /// hybrid retrieval over the query and its oracle expansions.
    pub async fn get_suggestions(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
        min_score: Option<f64>,
        context: Option<&RequestContext>,
    ) -> Result<Vec<Suggestion>> {
        metrics::SUGGEST_REQUESTS_TOTAL
            .with_label_values(&["autocomplete"])
            .inc();

        let query = Self::validate_query(query)?;
        let started = Instant::now();

        match self.prefix.suggest(query, user_id, context, limit).await {
            Ok(Some(suggestions)) => return Ok(suggestions),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Prefix engine failed, falling back to hybrid path");
                metrics::SWALLOWED_ERRORS_TOTAL
                    .with_label_values(&["prefix_engine"])
                    .inc();
            }
        }

        // Oracle expansion runs in parallel with embedding
        let expansions_fut = async {
            match &self.oracle {
                Some(oracle) if oracle.is_available() => {
                    oracle.expand_query(query, context).await
                }
                _ => Vec::new(),
            }
        };
        let (embedding, expansions) = tokio::join!(
            self.embed_query(query, self.remaining(started)),
            expansions_fut
        );

        let weights = self.blend_weights();
        let fetch = limit * 2;

        let mut searches: Vec<(String, bool)> = vec![(query.to_string(), true)];
        if self.remaining(started) > std::time::Duration::ZERO {
            for expansion in expansions {
                if normalized_key(&expansion) != normalized_key(query) {
                    searches.push((expansion, false));
                }
            }
        }

        // Expansion queries are embedded as one batch; a failure only
        // costs them their vector leg
        let expansion_embeddings: HashMap<String, Arc<Vec<f32>>> = if searches.len() > 1 {
            let texts: Vec<String> = searches[1..].iter().map(|(q, _)| q.clone()).collect();
            let embed_timeout = self.config.timeouts.embed().min(self.remaining(started));
            match timeout(embed_timeout, self.embedding.encode(&texts)).await {
                Ok(Ok(vectors)) => texts.into_iter().zip(vectors).collect(),
                _ => HashMap::new(),
            }
        } else {
            HashMap::new()
        };

        let leg_futures = searches.iter().map(|(search_query, is_original)| {
            let vector = if *is_original {
                embedding.as_deref().map(|v| v.as_slice())
            } else {
                expansion_embeddings
                    .get(search_query)
                    .map(|v| v.as_slice())
            };
            async move {
                let result = self
                    .hybrid
                    .search(search_query, vector, fetch, &weights)
                    .await;
                (*is_original, result)
            }
        });

        let outcomes = futures::future::join_all(leg_futures).await;

        let mut merged: HashMap<String, Candidate> = HashMap::new();
        let mut any_success = false;
        let mut first_error: Option<AppError> = None;

        for (is_original, outcome) in outcomes {
            match outcome {
                Ok(candidates) => {
                    any_success = true;
                    for mut candidate in candidates {
                        if is_original {
                            candidate.score *= ORIGINAL_QUERY_PRIORITY;
                        }
                        let keep_existing = merged
                            .get(&candidate.id)
                            .map_or(false, |existing| existing.score >= candidate.score);
                        if !keep_existing {
                            merged.insert(candidate.id.clone(), candidate);
                        }
                    }
                }
                Err(e) => {
                    if is_original {
                        first_error = Some(e);
                    } else {
                        metrics::SWALLOWED_ERRORS_TOTAL
                            .with_label_values(&["expansion_search"])
                            .inc();
                    }
                }
            }
        }

        if !any_success {
            return Err(first_error
                .unwrap_or_else(|| AppError::Unavailable("no candidate source succeeded".into())));
        }

        let candidates: Vec<Candidate> = merged.into_values().collect();
        Ok(self
            .ranker
            .rank(user_id, query, candidates, limit, min_score)
            .await)
    }

    /// Similar queries: the vector-weighted hybrid path through the same
    /// ranker. Degrades to keyword weighting when the query cannot be
    /// embedded.
    pub async fn get_similar_queries(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Suggestion>> {
        metrics::SUGGEST_REQUESTS_TOTAL
            .with_label_values(&["similar"])
            .inc();

        let query = Self::validate_query(query)?;
        let started = Instant::now();

        let embedding = self.embed_query(query, self.remaining(started)).await;
        let weights = if embedding.is_some() {
            BlendWeights::vector_only()
        } else {
            BlendWeights::new(1.0, 0.0)
        };

        let candidates = self
            .hybrid
            .search(
                query,
                embedding.as_deref().map(|v| v.as_slice()),
                limit * 2,
                &weights,
            )
            .await?;

        // The query itself is not a useful "similar query"
        let query_key = normalized_key(query);
        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| normalized_key(&c.text) != query_key)
            .collect();

        Ok(self
            .ranker
            .rank(user_id, query, candidates, limit, None)
            .await)
    }

    /// Related queries: union of oracle generations, sequence neighbors,
    /// hybrid retrieval, and the user's own history, deduplicated by
    /// normalized text with the highest score kept.
    pub async fn get_related_queries(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
        context: Option<&RequestContext>,
    ) -> Result<Vec<Suggestion>> {
        metrics::SUGGEST_REQUESTS_TOTAL
            .with_label_values(&["related"])
            .inc();

        let query = Self::validate_query(query)?;
        let started = Instant::now();

        let oracle_fut = async {
            match &self.oracle {
                Some(oracle) if oracle.is_available() => {
                    oracle.generate_related(query, context).await
                }
                _ => Vec::new(),
            }
        };

        let behavior_timeout = self.config.timeouts.behavior();
        let sequences_fut = async {
            let Some(behavior) = &self.behavior else {
                return None;
            };
            match timeout(behavior_timeout, behavior.get_sequences(query, user_id, limit)).await {
                Ok(Ok(neighbors)) => Some(neighbors),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Sequence lookup failed");
                    metrics::DEGRADED_LEGS_TOTAL
                        .with_label_values(&["behavior"])
                        .inc();
                    None
                }
                Err(_) => {
                    tracing::warn!("Sequence lookup timed out");
                    metrics::DEGRADED_LEGS_TOTAL
                        .with_label_values(&["behavior"])
                        .inc();
                    None
                }
            }
        };

        let history_fut = async {
            let (Some(behavior), Some(user)) = (&self.behavior, user_id) else {
                return Vec::new();
            };
            match timeout(
                behavior_timeout,
                behavior.get_history(user, self.config.behavior.history_cap),
            )
            .await
            {
                Ok(Ok(entries)) => entries,
                _ => Vec::new(),
            }
        };

        let hybrid_fut = async {
            let embedding = self.embed_query(query, self.remaining(started)).await;
            self.hybrid
                .search(
                    query,
                    embedding.as_deref().map(|v| v.as_slice()),
                    limit,
                    &self.blend_weights(),
                )
                .await
        };

        let (oracle_related, sequences, history, hybrid_outcome) =
            tokio::join!(oracle_fut, sequences_fut, history_fut, hybrid_fut);

        let query_key = normalized_key(query);
        // Highest score wins per normalized text
        let mut union: HashMap<String, Suggestion> = HashMap::new();
        let mut offer = |text: String, score: f64, source: SuggestionSource| {
            let key = normalized_key(&text);
            if key == query_key || key.is_empty() {
                return;
            }
            let candidate = Suggestion::new(text, round_score(score), source);
            let keep_existing = union
                .get(&key)
                .map_or(false, |existing| existing.score >= candidate.score);
            if !keep_existing {
                union.insert(key, candidate);
            }
        };

        let llm_count = oracle_related.len();
        for (i, text) in oracle_related.into_iter().enumerate() {
            let score = if llm_count <= 1 {
                RELATED_LLM_CEILING
            } else {
                let step = (RELATED_LLM_CEILING - RELATED_LLM_FLOOR) / (llm_count - 1) as f64;
                RELATED_LLM_CEILING - step * i as f64
            };
            offer(text, score, SuggestionSource::Llm);
        }

        if let Some(neighbors) = sequences {
            let max_next = neighbors.next.iter().map(|(_, w)| *w).fold(0.0, f64::max);
            for (text, weight) in neighbors.next {
                if max_next > 0.0 {
                    offer(
                        text,
                        RELATED_SEQUENCE_NEXT_BAND * (weight / max_next),
                        SuggestionSource::SequenceNext,
                    );
                }
            }

            let max_prev = neighbors
                .previous
                .iter()
                .map(|(_, w)| *w)
                .fold(0.0, f64::max);
            for (text, weight) in neighbors.previous {
                if max_prev > 0.0 {
                    offer(
                        text,
                        RELATED_SEQUENCE_PREV_BAND * (weight / max_prev),
                        SuggestionSource::SequencePrev,
                    );
                }
            }
        }

        match hybrid_outcome {
            Ok(candidates) => {
                for candidate in candidates {
                    offer(
                        candidate.text,
                        candidate.score.min(RELATED_HYBRID_CLIP),
                        SuggestionSource::Hybrid,
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Hybrid source unavailable for related queries");
                metrics::SWALLOWED_ERRORS_TOTAL
                    .with_label_values(&["related_hybrid"])
                    .inc();
            }
        }

        for entry in history {
            if entry.query == query {
                offer(entry.selected, RELATED_HISTORY_BAND, SuggestionSource::History);
            }
        }

        let mut related: Vec<Suggestion> = union.into_values().collect();
        related.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.text.cmp(&b.text))
        });
        related.truncate(limit);
        Ok(related)
    }

    /// Record a selection: behavior counters plus the document frequency
    /// of the selected text, when it resolves to an indexed document.
    pub async fn record_feedback(
        &self,
        query: &str,
        selected: &str,
        user_id: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        metrics::SUGGEST_REQUESTS_TOTAL
            .with_label_values(&["feedback"])
            .inc();

        let query = Self::validate_query(query)?;
        let selected = selected.trim();
        if selected.is_empty() {
            return Err(AppError::Validation(
                "selected_suggestion must not be empty".to_string(),
            ));
        }

        let mut success = true;

        if let (Some(behavior), Some(user)) = (&self.behavior, user_id) {
            match behavior
                .record_selection(user, query, selected, timestamp)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to record selection");
                    metrics::SWALLOWED_ERRORS_TOTAL
                        .with_label_values(&["behavior_write"])
                        .inc();
                    success = false;
                }
            }
        }

        if let Some(doc_id) = self.store.find_id_by_text(selected) {
            if let Err(e) = self.store.increment_frequency(&doc_id, 1).await {
                tracing::warn!(doc_id = %doc_id, error = %e, "Failed to increment frequency");
                metrics::SWALLOWED_ERRORS_TOTAL
                    .with_label_values(&["frequency_write"])
                    .inc();
            }
        }

        tracing::info!(query = %query, selected = %selected, "Feedback recorded");
        Ok(success)
    }

    /// Add a single document
    pub async fn add_document(&self, item: &NewDocument) -> Result<String> {
        self.store.add(item).await
    }

    /// Add documents in bulk
    pub async fn bulk_add_documents(&self, items: &[NewDocument]) -> Result<BulkAddReport> {
        self.store.bulk_add(items).await
    }

    /// Dependency health snapshot
    pub async fn health(&self) -> HealthStatus {
        let lexical_connected = self.lexical.check_connection();
        let vector_connected = self.vector.check_connection();
        let behavior_connected = match &self.behavior {
            Some(behavior) => behavior.check_connection().await,
            None => false,
        };

        let status = if lexical_connected { "healthy" } else { "degraded" };

        HealthStatus {
            status: status.to_string(),
            lexical_connected,
            vector_connected,
            behavior_connected,
        }
    }
}
