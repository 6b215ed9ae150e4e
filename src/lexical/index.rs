//! Lexical index lifecycle and write path

use crate::config::LexicalConfig;
use crate::lexical::document::{build_suggest_schema, LexicalDocument};
use crate::lexical::error::{LexicalError, LexicalResult};
use crate::models::QueryDoc;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::TermQuery;
use tantivy::schema::{IndexRecordOption, Schema};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

/// Per-document outcome of a bulk upsert
#[derive(Debug, Clone)]
pub struct BulkIndexReport {
    pub success_count: usize,
    pub error_count: usize,
    /// (document id, error message) for every failed document
    pub errors: Vec<(String, String)>,
}

/// Manages the tantivy index: schema, writer, reader, and the write path.
/// Upserts are atomic per document (delete-by-id then add, one commit).
pub struct IndexManager {
    index: Index,
    schema: Schema,
    writer: Arc<RwLock<IndexWriter>>,
    reader: IndexReader,
}

impl IndexManager {
    /// Open or create the index at the configured path
    pub fn new(config: &LexicalConfig) -> LexicalResult<Self> {
        std::fs::create_dir_all(&config.index_path).map_err(|e| {
            LexicalError::IndexInitFailed(format!("Failed to create index directory: {}", e))
        })?;

        let schema = build_suggest_schema();

        let index = if Self::index_exists(&config.index_path) {
            Index::open_in_dir(&config.index_path).map_err(|e| {
                LexicalError::IndexInitFailed(format!("Failed to open existing index: {}", e))
            })?
        } else {
            Index::create_in_dir(&config.index_path, schema.clone()).map_err(|e| {
                LexicalError::IndexInitFailed(format!("Failed to create new index: {}", e))
            })?
        };

        let writer = index.writer(config.writer_heap_bytes).map_err(|e| {
            LexicalError::IndexInitFailed(format!("Failed to create writer: {}", e))
        })?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| {
                LexicalError::IndexInitFailed(format!("Failed to create reader: {}", e))
            })?;

        Ok(Self {
            index,
            schema,
            writer: Arc::new(RwLock::new(writer)),
            reader,
        })
    }

    fn index_exists(path: &Path) -> bool {
        path.join("meta.json").exists()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    /// Whether the index is usable (health checks)
    pub fn check_connection(&self) -> bool {
        self.reader.reload().is_ok()
    }

    /// Number of indexed documents
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Upsert a single document, atomically per id
    pub async fn upsert(&self, doc: &QueryDoc) -> LexicalResult<()> {
        if doc.text.trim().is_empty() {
            return Err(LexicalError::InvalidDocument(
                "document text must not be empty".to_string(),
            ));
        }

        let lexical = LexicalDocument::from(doc);
        let tantivy_doc = lexical.to_tantivy_doc(&self.schema);

        let mut writer = self.writer.write().await;

        if let Ok(id_field) = self.schema.get_field("id") {
            writer.delete_term(Term::from_field_text(id_field, &doc.id));
        }

        writer
            .add_document(tantivy_doc)
            .map_err(|e| LexicalError::IndexingFailed(format!("Failed to add document: {}", e)))?;

        writer
            .commit()
            .map_err(|e| LexicalError::IndexingFailed(format!("Failed to commit: {}", e)))?;

        // Reads issued after this write must observe it
        self.reader.reload()?;

        tracing::debug!(doc_id = %doc.id, "Document upserted into lexical index");
        Ok(())
    }

    /// Upsert many documents: partial failures accumulate without aborting
    /// the batch, and one commit covers every successful document.
    pub async fn bulk_upsert(&self, docs: &[QueryDoc]) -> LexicalResult<BulkIndexReport> {
        let mut writer = self.writer.write().await;
        let mut report = BulkIndexReport {
            success_count: 0,
            error_count: 0,
            errors: Vec::new(),
        };

        for doc in docs {
            if doc.text.trim().is_empty() {
                report.error_count += 1;
                report
                    .errors
                    .push((doc.id.clone(), "document text must not be empty".to_string()));
                continue;
            }

            if let Ok(id_field) = self.schema.get_field("id") {
                writer.delete_term(Term::from_field_text(id_field, &doc.id));
            }

            let lexical = LexicalDocument::from(doc);
            match writer.add_document(lexical.to_tantivy_doc(&self.schema)) {
                Ok(_) => report.success_count += 1,
                Err(e) => {
                    report.error_count += 1;
                    report.errors.push((doc.id.clone(), e.to_string()));
                }
            }
        }

        writer
            .commit()
            .map_err(|e| LexicalError::IndexingFailed(format!("Failed to commit batch: {}", e)))?;
        self.reader.reload()?;

        Ok(report)
    }

    /// Fetch a document by id
    pub fn get_by_id(&self, id: &str) -> LexicalResult<Option<LexicalDocument>> {
        let id_field = self
            .schema
            .get_field("id")
            .map_err(|e| LexicalError::TantivyError(e.to_string()))?;
        self.lookup_one(TermQuery::new(
            Term::from_field_text(id_field, id),
            IndexRecordOption::Basic,
        ))
    }

    /// Fetch a document by its exact text
    pub fn get_by_text(&self, text: &str) -> LexicalResult<Option<LexicalDocument>> {
        let raw_field = self
            .schema
            .get_field("text_raw")
            .map_err(|e| LexicalError::TantivyError(e.to_string()))?;
        self.lookup_one(TermQuery::new(
            Term::from_field_text(raw_field, text),
            IndexRecordOption::Basic,
        ))
    }

    fn lookup_one(&self, query: TermQuery) -> LexicalResult<Option<LexicalDocument>> {
        let searcher = self.reader.searcher();
        let top = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(|e| LexicalError::SearchFailed(format!("Lookup failed: {}", e)))?;

        match top.into_iter().next() {
            Some((_, address)) => {
                let doc: TantivyDocument = searcher
                    .doc(address)
                    .map_err(|e| LexicalError::SearchFailed(format!("Doc fetch failed: {}", e)))?;
                Ok(LexicalDocument::from_tantivy_doc(&doc, &self.schema))
            }
            None => Ok(None),
        }
    }

    /// Increment the selection frequency of a document. Runs read-modify-
    /// write under the writer lock so increments to the same id serialize.
    pub async fn increment_frequency(&self, id: &str, delta: u64) -> LexicalResult<u64> {
        let mut writer = self.writer.write().await;

        let mut doc = self
            .get_by_id(id)?
            .ok_or_else(|| LexicalError::InvalidDocument(format!("unknown document id {}", id)))?;

        doc.frequency += delta;
        doc.updated_at = Utc::now();

        if let Ok(id_field) = self.schema.get_field("id") {
            writer.delete_term(Term::from_field_text(id_field, id));
        }
        writer
            .add_document(doc.to_tantivy_doc(&self.schema))
            .map_err(|e| LexicalError::IndexingFailed(format!("Failed to re-add document: {}", e)))?;
        writer
            .commit()
            .map_err(|e| LexicalError::IndexingFailed(format!("Failed to commit: {}", e)))?;
        self.reader.reload()?;

        tracing::debug!(doc_id = %id, frequency = doc.frequency, "Frequency incremented");
        Ok(doc.frequency)
    }
}
