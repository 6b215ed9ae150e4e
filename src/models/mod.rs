//! Core data model shared across the retrieval subsystems

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// An indexable query/phrase.
///
/// Invariants: `id` uniquely resolves one document across the lexical and
/// vector indexes; `frequency` is non-decreasing; the stored embedding for
/// a document has unit L2 norm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDoc {
    /// Opaque unique ID (stable hash of text when not supplied)
    pub id: String,

    /// User-visible phrase (may mix CJK and Latin)
    pub text: String,

    /// Normalized tokens for boosted term matches
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Opaque metadata, returned verbatim
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Selection counter, incremented by feedback
    #[serde(default)]
    pub frequency: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl QueryDoc {
    /// Create a new document with current timestamps
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            text: text.into(),
            keywords: Vec::new(),
            metadata: HashMap::new(),
            frequency: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Where a suggestion came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    Keyword,
    Vector,
    Hybrid,
    Personalized,
    History,
    SequenceNext,
    SequencePrev,
    Llm,
    PrefixPreserved,
}

impl fmt::Display for SuggestionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuggestionSource::Keyword => "keyword",
            SuggestionSource::Vector => "vector",
            SuggestionSource::Hybrid => "hybrid",
            SuggestionSource::Personalized => "personalized",
            SuggestionSource::History => "history",
            SuggestionSource::SequenceNext => "sequence_next",
            SuggestionSource::SequencePrev => "sequence_prev",
            SuggestionSource::Llm => "llm",
            SuggestionSource::PrefixPreserved => "prefix_preserved",
        };
        f.write_str(s)
    }
}

/// A single ranked suggestion returned to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    /// Suggestion text
    pub text: String,

    /// Relevance score, non-increasing across a returned list
    pub score: f64,

    /// Source of the suggestion
    pub source: SuggestionSource,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Suggestion {
    pub fn new(text: impl Into<String>, score: f64, source: SuggestionSource) -> Self {
        Self {
            text: text.into(),
            score,
            source,
            metadata: HashMap::new(),
        }
    }
}

/// Typed view of the opaque `context` request bag.
///
/// Recognized keys are `domain` and `user_history`; unknown keys are
/// retained but ignored by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// BI domain hint forwarded to the oracle
    pub domain: Option<String>,

    /// Recent queries supplied by the caller
    #[serde(default)]
    pub user_history: Vec<String>,

    /// Unrecognized keys, kept for forward compatibility
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Key used for case-insensitive, whitespace-normalized text equality
pub fn normalized_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_display_matches_serde() {
        for source in [
            SuggestionSource::Keyword,
            SuggestionSource::Vector,
            SuggestionSource::Hybrid,
            SuggestionSource::Personalized,
            SuggestionSource::History,
            SuggestionSource::SequenceNext,
            SuggestionSource::SequencePrev,
            SuggestionSource::Llm,
            SuggestionSource::PrefixPreserved,
        ] {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source));
        }
    }

    #[test]
    fn test_normalized_key() {
        assert_eq!(normalized_key("  Sales   Trend "), "sales trend");
        assert_eq!(normalized_key("销售额"), "销售额");
        assert_eq!(normalized_key("A\tB\nC"), "a b c");
    }

    #[test]
    fn test_context_retains_unknown_keys() {
        let ctx: RequestContext = serde_json::from_str(
            r#"{"domain": "retail", "user_history": ["销售额"], "tenant": "t1"}"#,
        )
        .unwrap();
        assert_eq!(ctx.domain.as_deref(), Some("retail"));
        assert_eq!(ctx.user_history, vec!["销售额"]);
        assert!(ctx.extra.contains_key("tenant"));
    }
}
