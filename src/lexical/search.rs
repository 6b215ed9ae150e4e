//! Combined lexical query: phrase-prefix, fuzzy, and keyword-term modes
//! blended with configured boosts plus a logarithmic popularity term.

use crate::config::LexicalConfig;
use crate::lexical::document::LexicalDocument;
use crate::lexical::error::{LexicalError, LexicalResult};
use crate::lexical::index::IndexManager;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, PhrasePrefixQuery, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::tokenizer::TokenStream;
use tantivy::{TantivyDocument, Term};

/// A scored lexical hit
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    pub text: String,
    /// Raw combined score including the popularity term
    pub score: f64,
    pub frequency: u64,
    pub keywords: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Read path over the lexical index
#[derive(Clone)]
pub struct LexicalSearcher {
    manager: Arc<IndexManager>,
    config: LexicalConfig,
}

impl LexicalSearcher {
    pub fn new(manager: Arc<IndexManager>, config: LexicalConfig) -> Self {
        Self { manager, config }
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    /// Tokenize query text with the index's own analyzer for the text field
    fn query_tokens(&self, query: &str) -> LexicalResult<Vec<String>> {
        let schema = self.manager.schema();
        let text_field = schema
            .get_field("text")
            .map_err(|e| LexicalError::TantivyError(e.to_string()))?;

        let mut analyzer = self
            .manager
            .index()
            .tokenizer_for_field(text_field)
            .map_err(|e| LexicalError::TantivyError(e.to_string()))?;

        let mut tokens = Vec::new();
        let mut stream = analyzer.token_stream(query);
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    fn build_query(&self, tokens: &[String]) -> LexicalResult<Box<dyn Query>> {
        let schema = self.manager.schema();
        let text_field = schema
            .get_field("text")
            .map_err(|e| LexicalError::TantivyError(e.to_string()))?;
        let keywords_field = schema
            .get_field("keywords")
            .map_err(|e| LexicalError::TantivyError(e.to_string()))?;

        let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        // Phrase-prefix over the text tokens in order; the trailing token
        // expands by prefix
        let phrase_terms: Vec<Term> = tokens
            .iter()
            .map(|t| Term::from_field_text(text_field, t))
            .collect();
        let phrase_prefix = PhrasePrefixQuery::new(phrase_terms);
        subqueries.push((
            Occur::Should,
            Box::new(BoostQuery::new(
                Box::new(phrase_prefix),
                self.config.phrase_prefix_boost,
            )),
        ));

        // Fuzzy on whole tokens, edit distance <= 2
        for token in tokens {
            let fuzzy = FuzzyTermQuery::new(Term::from_field_text(text_field, token), 2, true);
            subqueries.push((
                Occur::Should,
                Box::new(BoostQuery::new(Box::new(fuzzy), self.config.fuzzy_boost)),
            ));
        }

        // Exact keyword terms, strongly boosted
        for token in tokens {
            let term = TermQuery::new(
                Term::from_field_text(keywords_field, token),
                IndexRecordOption::Basic,
            );
            subqueries.push((
                Occur::Should,
                Box::new(BoostQuery::new(
                    Box::new(term),
                    self.config.keyword_term_boost,
                )),
            ));
        }

        Ok(Box::new(BooleanQuery::from(subqueries)))
    }

    /// Execute the combined query. The returned list is capped at `limit`,
    /// sorted by score descending with ties broken by higher frequency and
    /// then lexicographically smaller id.
    pub fn search(&self, query: &str, limit: usize) -> LexicalResult<Vec<LexicalHit>> {
        let tokens = self.query_tokens(query)?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let limit = limit.min(self.config.max_results).max(1);
        let combined = self.build_query(&tokens)?;

        let searcher = self.manager.reader().searcher();
        // Overfetch so the popularity rescore can reorder near the cutoff
        let fetch_limit = (limit * 2).clamp(16, self.config.max_results.max(16));

        let top_docs = searcher
            .search(&combined, &TopDocs::with_limit(fetch_limit))
            .map_err(|e| LexicalError::SearchFailed(format!("Search execution failed: {}", e)))?;

        let schema = self.manager.schema();
        let mut hits = Vec::with_capacity(top_docs.len());
        for (raw_score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| LexicalError::SearchFailed(format!("Doc fetch failed: {}", e)))?;

            if let Some(lexical) = LexicalDocument::from_tantivy_doc(&doc, schema) {
                let popularity = (1.0 + lexical.frequency as f64).ln();
                hits.push(LexicalHit {
                    id: lexical.id.clone(),
                    text: lexical.text.clone(),
                    score: raw_score as f64 + popularity,
                    frequency: lexical.frequency,
                    keywords: lexical.keywords.clone(),
                    metadata: lexical.metadata_map(),
                });
            }
        }

        hits.sort_by(compare_hits);
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Deterministic ordering: score desc, then frequency desc, then id asc
fn compare_hits(a: &LexicalHit, b: &LexicalHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.frequency.cmp(&a.frequency))
        .then_with(|| a.id.cmp(&b.id))
}
