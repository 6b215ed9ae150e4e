//! Document store: the single write path to the lexical and vector indexes.
//!
//! Ids are stable hashes of the text when not supplied, embeddings are
//! computed in batch, and a document that cannot be embedded is still
//! indexed lexically and queued in the reconciliation log. Lexical success
//! is sufficient for the write to count as a success.

use crate::embedding::EmbeddingProvider;
use crate::error::{AppError, Result};
use crate::lexical::IndexManager;
use crate::metrics;
use crate::models::QueryDoc;
use crate::vector::VectorSearch;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;
use twox_hash::XxHash64;

/// Incoming document payload for single and bulk ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub text: String,

    #[serde(default)]
    pub doc_id: Option<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewDocument {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            doc_id: None,
            keywords: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Outcome of a bulk ingest
#[derive(Debug, Clone, Serialize)]
pub struct BulkAddReport {
    pub success_count: usize,
    pub error_count: usize,
    /// (document id or text excerpt, error message) per failed document
    pub errors: Vec<(String, String)>,
}

/// Facade over the embedding provider and both indexes
pub struct DocumentStore {
    embedding: Arc<EmbeddingProvider>,
    lexical: Arc<IndexManager>,
    vector: Arc<dyn VectorSearch>,
    /// Documents indexed lexically whose vector write is still owed
    pending_vector: DashMap<String, DateTime<Utc>>,
}

impl DocumentStore {
    pub fn new(
        embedding: Arc<EmbeddingProvider>,
        lexical: Arc<IndexManager>,
        vector: Arc<dyn VectorSearch>,
    ) -> Self {
        Self {
            embedding,
            lexical,
            vector,
            pending_vector: DashMap::new(),
        }
    }

    /// Stable content-derived document id
    pub fn stable_id(text: &str) -> String {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(text.as_bytes());
        format!("{:016x}", hasher.finish())
    }

    /// Ids currently awaiting a vector write (reconciliation log)
    pub fn pending_reconciliation(&self) -> Vec<String> {
        self.pending_vector.iter().map(|e| e.key().clone()).collect()
    }

    fn build_doc(&self, item: &NewDocument) -> Result<QueryDoc> {
        let text = item.text.trim();
        if text.is_empty() {
            return Err(AppError::Validation(
                "document text must not be empty".to_string(),
            ));
        }

        let id = item
            .doc_id
            .clone()
            .unwrap_or_else(|| Self::stable_id(text));

        let mut doc = QueryDoc::new(id, text)
            .with_keywords(item.keywords.clone())
            .with_metadata(item.metadata.clone());

        // Re-adding an existing document must not reset its counters
        if let Ok(Some(existing)) = self.lexical.get_by_id(&doc.id) {
            doc.frequency = existing.frequency;
            doc.created_at = existing.created_at;
        }

        Ok(doc)
    }

    async fn embed_with_retry(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        match self.embedding.encode_single(text).await {
            Ok(vector) => Some(vector),
            Err(first) => {
                tracing::warn!(error = %first, "Embedding failed, retrying once");
                match self.embedding.encode_single(text).await {
                    Ok(vector) => Some(vector),
                    Err(second) => {
                        tracing::warn!(error = %second, "Embedding failed twice, indexing lexical only");
                        metrics::DEGRADED_LEGS_TOTAL
                            .with_label_values(&["embedding"])
                            .inc();
                        None
                    }
                }
            }
        }
    }

    async fn write_vector(&self, id: &str, vector: Option<&[f32]>) {
        let Some(vector) = vector else {
            self.record_pending(id);
            return;
        };

        match self.vector.upsert(id, vector).await {
            Ok(()) => {
                self.pending_vector.remove(id);
            }
            Err(e) => {
                tracing::warn!(doc_id = %id, error = %e, "Vector write failed, queued for reconciliation");
                metrics::SWALLOWED_ERRORS_TOTAL
                    .with_label_values(&["vector_write"])
                    .inc();
                self.record_pending(id);
            }
        }
    }

    fn record_pending(&self, id: &str) {
        self.pending_vector.insert(id.to_string(), Utc::now());
        metrics::RECONCILIATION_PENDING_TOTAL
            .with_label_values(&["missing_vector"])
            .inc();
    }

    /// Add a single document. The write is linearizable per id: a read
    /// issued after this returns observes the document.
    pub async fn add(&self, item: &NewDocument) -> Result<String> {
        let doc = self.build_doc(item)?;

        let embedding = self.embed_with_retry(&doc.text).await;

        // Lexical write decides success or failure
        self.lexical.upsert(&doc).await.map_err(AppError::from)?;

        self.write_vector(&doc.id, embedding.as_deref().map(|v| v.as_slice()))
            .await;

        tracing::info!(doc_id = %doc.id, text = %doc.text, "Document added");
        Ok(doc.id)
    }

    /// Add many documents: embeddings are computed in one batch, failures
    /// are reported per document, and the batch never aborts early.
    pub async fn bulk_add(&self, items: &[NewDocument]) -> Result<BulkAddReport> {
        let mut errors: Vec<(String, String)> = Vec::new();
        let mut docs: Vec<QueryDoc> = Vec::new();

        for item in items {
            match self.build_doc(item) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    let label = item
                        .doc_id
                        .clone()
                        .unwrap_or_else(|| item.text.chars().take(32).collect());
                    errors.push((label, e.to_string()));
                }
            }
        }

        // Batch embed; one retry, then the whole batch degrades to
        // lexical-only
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let embeddings = if texts.is_empty() {
            None
        } else {
            match self.embedding.encode(&texts).await {
                Ok(vectors) => Some(vectors),
                Err(first) => {
                    tracing::warn!(error = %first, "Batch embedding failed, retrying once");
                    match self.embedding.encode(&texts).await {
                        Ok(vectors) => Some(vectors),
                        Err(second) => {
                            tracing::warn!(error = %second, "Batch embedding failed twice");
                            metrics::DEGRADED_LEGS_TOTAL
                                .with_label_values(&["embedding"])
                                .inc();
                            None
                        }
                    }
                }
            }
        };

        let report = self
            .lexical
            .bulk_upsert(&docs)
            .await
            .map_err(AppError::from)?;

        let failed_ids: std::collections::HashSet<&str> =
            report.errors.iter().map(|(id, _)| id.as_str()).collect();

        for (i, doc) in docs.iter().enumerate() {
            if failed_ids.contains(doc.id.as_str()) {
                continue;
            }
            let vector = embeddings
                .as_ref()
                .and_then(|vs| vs.get(i))
                .map(|v| v.as_slice());
            self.write_vector(&doc.id, vector).await;
        }

        for (id, msg) in report.errors {
            errors.push((id, msg));
        }

        let result = BulkAddReport {
            success_count: report.success_count,
            error_count: errors.len(),
            errors,
        };

        tracing::info!(
            success = result.success_count,
            errors = result.error_count,
            "Bulk add finished"
        );
        Ok(result)
    }

    /// Increment the selection counter of a document
    pub async fn increment_frequency(&self, id: &str, delta: u64) -> Result<u64> {
        self.lexical
            .increment_frequency(id, delta)
            .await
            .map_err(AppError::from)
    }

    /// Resolve a document id from its exact text
    pub fn find_id_by_text(&self, text: &str) -> Option<String> {
        self.lexical
            .get_by_text(text)
            .ok()
            .flatten()
            .map(|doc| doc.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbedderConfig, LexicalConfig};
    use crate::embedding::{EmbeddingError, TextEncoder};
    use crate::vector::HnswVectorIndex;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> DocumentStore {
        let embedder_config = EmbedderConfig {
            dimension: 64,
            ..Default::default()
        };
        let lexical_config = LexicalConfig {
            index_path: dir.path().to_path_buf(),
            ..Default::default()
        };

        DocumentStore::new(
            Arc::new(EmbeddingProvider::new(embedder_config)),
            Arc::new(IndexManager::new(&lexical_config).unwrap()),
            Arc::new(HnswVectorIndex::new(64)),
        )
    }

    #[tokio::test]
    async fn test_add_assigns_stable_id() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let id1 = store.add(&NewDocument::from_text("销售额")).await.unwrap();
        let id2 = store.add(&NewDocument::from_text("销售额")).await.unwrap();

        assert_eq!(id1, id2);
        assert_eq!(id1, DocumentStore::stable_id("销售额"));
    }

    #[tokio::test]
    async fn test_re_add_preserves_frequency() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let id = store.add(&NewDocument::from_text("销售额")).await.unwrap();
        store.increment_frequency(&id, 3).await.unwrap();

        store.add(&NewDocument::from_text("销售额")).await.unwrap();

        let doc = store.lexical.get_by_id(&id).unwrap().unwrap();
        assert_eq!(doc.frequency, 3);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let result = store.add(&NewDocument::from_text("   ")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_bulk_add_partial_failure() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let items = vec![
            NewDocument::from_text("销售额"),
            NewDocument::from_text(""),
            NewDocument::from_text("市场分析"),
        ];

        let report = store.bulk_add(&items).await.unwrap();
        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 1);

        assert!(store.find_id_by_text("销售额").is_some());
        assert!(store.find_id_by_text("市场分析").is_some());
    }

    #[tokio::test]
    async fn test_embed_failure_degrades_to_lexical_only() {
        struct FailingEncoder;
        impl TextEncoder for FailingEncoder {
            fn dimension(&self) -> usize {
                64
            }
            fn encode_batch(
                &self,
                _texts: &[String],
            ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
                Err(EmbeddingError::EncodingFailed("model offline".to_string()))
            }
        }

        let dir = TempDir::new().unwrap();
        let embedder_config = EmbedderConfig {
            dimension: 64,
            ..Default::default()
        };
        let lexical_config = LexicalConfig {
            index_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = DocumentStore::new(
            Arc::new(EmbeddingProvider::with_factory(embedder_config, || {
                Ok(Arc::new(FailingEncoder) as Arc<dyn TextEncoder>)
            })),
            Arc::new(IndexManager::new(&lexical_config).unwrap()),
            Arc::new(HnswVectorIndex::new(64)),
        );

        // Lexical-only indexing still counts as success
        let id = store.add(&NewDocument::from_text("销售额")).await.unwrap();
        assert!(store.find_id_by_text("销售额").is_some());
        assert_eq!(store.pending_reconciliation(), vec![id]);
    }
}
