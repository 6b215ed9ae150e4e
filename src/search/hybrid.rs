//! Concurrent lexical + vector retrieval with score blending.

use crate::config::TimeoutConfig;
use crate::error::{AppError, Result};
use crate::lexical::LexicalSearcher;
use crate::metrics;
use crate::models::SuggestionSource;
use crate::vector::VectorSearch;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;

/// Blend weights for one search; expected to sum to 1
#[derive(Debug, Clone, Copy)]
pub struct BlendWeights {
    pub keyword: f64,
    pub vector: f64,
}

impl BlendWeights {
    pub fn new(keyword: f64, vector: f64) -> Self {
        Self { keyword, vector }
    }

    /// Vector-only weights (similar-queries path)
    pub fn vector_only() -> Self {
        Self {
            keyword: 0.0,
            vector: 1.0,
        }
    }
}

/// A deduplicated, blended retrieval candidate
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub text: String,
    /// Blended score on the normalized [0, 1] scale
    pub score: f64,
    pub source: SuggestionSource,
    /// Raw lexical score, when the lexical leg contributed
    pub lexical_score: Option<f64>,
    /// Raw cosine similarity, when the vector leg contributed
    pub vector_score: Option<f64>,
    pub frequency: u64,
    pub keywords: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Deterministic candidate ordering: blended score desc, then raw lexical
/// score desc, then frequency desc, then id asc
pub(crate) fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.lexical_score
                .unwrap_or(0.0)
                .partial_cmp(&a.lexical_score.unwrap_or(0.0))
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.frequency.cmp(&a.frequency))
        .then_with(|| a.id.cmp(&b.id))
}

/// Issues the two retrieval legs in parallel and merges their results.
/// One failed leg degrades the request; both failing is a service error.
#[derive(Clone)]
pub struct HybridSearcher {
    lexical: LexicalSearcher,
    vector: Arc<dyn VectorSearch>,
    timeouts: TimeoutConfig,
}

enum LegOutcome<T> {
    Ok(T),
    Skipped,
    Failed,
}

impl HybridSearcher {
    pub fn new(
        lexical: LexicalSearcher,
        vector: Arc<dyn VectorSearch>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            timeouts,
        }
    }

    async fn lexical_leg(&self, query: &str, fetch: usize) -> LegOutcome<Vec<crate::lexical::LexicalHit>> {
        let searcher = self.lexical.clone();
        let query = query.to_string();
        let task =
            tokio::task::spawn_blocking(move || searcher.search(&query, fetch));

        match timeout(self.timeouts.lex(), task).await {
            Ok(Ok(Ok(hits))) => LegOutcome::Ok(hits),
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Lexical leg failed");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["lexical"])
                    .inc();
                LegOutcome::Failed
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Lexical leg panicked");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["lexical"])
                    .inc();
                LegOutcome::Failed
            }
            Err(_) => {
                tracing::warn!("Lexical leg timed out");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["lexical"])
                    .inc();
                LegOutcome::Failed
            }
        }
    }

    async fn vector_leg(
        &self,
        embedding: Option<&[f32]>,
        weights: &BlendWeights,
        fetch: usize,
    ) -> LegOutcome<Vec<crate::vector::VectorHit>> {
        // No embedding (or a zero weight) skips the leg rather than
        // failing it: keyword-only fallback
        let Some(embedding) = embedding else {
            return LegOutcome::Skipped;
        };
        if weights.vector <= 0.0 {
            return LegOutcome::Skipped;
        }

        match timeout(self.timeouts.vec(), self.vector.search(embedding, fetch)).await {
            Ok(Ok(hits)) => LegOutcome::Ok(hits),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Vector leg failed");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["vector"])
                    .inc();
                LegOutcome::Failed
            }
            Err(_) => {
                tracing::warn!("Vector leg timed out");
                metrics::DEGRADED_LEGS_TOTAL
                    .with_label_values(&["vector"])
                    .inc();
                LegOutcome::Failed
            }
        }
    }

    /// Run both legs, normalize scores, blend, and deduplicate by id.
    pub async fn search(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        limit: usize,
        weights: &BlendWeights,
    ) -> Result<Vec<Candidate>> {
        let fetch = (limit * 2).max(limit);

        let (lexical_outcome, vector_outcome) = tokio::join!(
            self.lexical_leg(query, fetch),
            self.vector_leg(embedding, weights, fetch),
        );

        let lexical_failed = matches!(lexical_outcome, LegOutcome::Failed);
        let vector_failed = matches!(vector_outcome, LegOutcome::Failed);
        if lexical_failed && (vector_failed || matches!(vector_outcome, LegOutcome::Skipped)) {
            // A skipped vector leg cannot rescue a failed lexical leg
            if vector_failed {
                return Err(AppError::Unavailable(
                    "both retrieval legs failed".to_string(),
                ));
            }
            return Err(AppError::Unavailable(
                "lexical leg failed and no vector leg was available".to_string(),
            ));
        }

        let lexical_hits = match lexical_outcome {
            LegOutcome::Ok(hits) => hits,
            _ => Vec::new(),
        };
        let vector_hits = match vector_outcome {
            LegOutcome::Ok(hits) => hits,
            _ => Vec::new(),
        };

        // Lexical raw scores normalize against the observed batch maximum;
        // cosine similarity maps from [-1, 1] onto [0, 1]
        let max_lexical = lexical_hits
            .iter()
            .map(|h| h.score)
            .fold(0.0_f64, f64::max);

        let mut merged: HashMap<String, Candidate> = HashMap::new();

        for hit in lexical_hits {
            let normalized = if max_lexical > 0.0 {
                hit.score / max_lexical
            } else {
                0.0
            };
            merged.insert(
                hit.id.clone(),
                Candidate {
                    id: hit.id,
                    text: hit.text,
                    score: weights.keyword * normalized,
                    source: SuggestionSource::Keyword,
                    lexical_score: Some(hit.score),
                    vector_score: None,
                    frequency: hit.frequency,
                    keywords: hit.keywords,
                    metadata: hit.metadata,
                },
            );
        }

        for hit in vector_hits {
            let normalized = ((hit.similarity as f64) + 1.0) / 2.0;
            if let Some(candidate) = merged.get_mut(&hit.id) {
                candidate.score += weights.vector * normalized;
                candidate.vector_score = Some(hit.similarity as f64);
                candidate.source = SuggestionSource::Hybrid;
                continue;
            }

            // Vector-only hit: document details come from the lexical
            // store, which owns the canonical record
            let Ok(Some(doc)) = self.lexical.manager().get_by_id(&hit.id) else {
                continue;
            };
            let metadata = doc.metadata_map();
            merged.insert(
                hit.id.clone(),
                Candidate {
                    id: hit.id,
                    text: doc.text,
                    score: weights.vector * normalized,
                    source: SuggestionSource::Vector,
                    lexical_score: None,
                    vector_score: Some(hit.similarity as f64),
                    frequency: doc.frequency,
                    metadata,
                    keywords: doc.keywords,
                },
            );
        }

        let mut candidates: Vec<Candidate> = merged.into_values().collect();
        candidates.sort_by(compare_candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }
}
