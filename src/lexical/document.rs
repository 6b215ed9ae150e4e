//! Lexical document structure and schema

use crate::models::QueryDoc;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tantivy::schema::*;
use tantivy::TantivyDocument;

/// Flattened view of a [`QueryDoc`] as stored in the lexical index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalDocument {
    /// Document ID
    pub id: String,

    /// User-visible phrase
    pub text: String,

    /// Normalized keyword tokens
    pub keywords: Vec<String>,

    /// Selection counter
    pub frequency: u64,

    /// Metadata serialized as JSON
    pub metadata: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl From<&QueryDoc> for LexicalDocument {
    fn from(doc: &QueryDoc) -> Self {
        Self {
            id: doc.id.clone(),
            text: doc.text.clone(),
            // Keyword terms match exactly, so they are normalized on write
            keywords: doc.keywords.iter().map(|k| k.to_lowercase()).collect(),
            frequency: doc.frequency,
            metadata: serde_json::to_string(&doc.metadata).unwrap_or_default(),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

impl LexicalDocument {
    /// Convert to a tantivy document against the suggest schema
    pub fn to_tantivy_doc(&self, schema: &Schema) -> TantivyDocument {
        let mut doc = TantivyDocument::new();

        if let Ok(field) = schema.get_field("id") {
            doc.add_text(field, &self.id);
        }

        if let Ok(field) = schema.get_field("text") {
            doc.add_text(field, &self.text);
        }

        // Raw copy of the text for exact lookups (feedback resolution)
        if let Ok(field) = schema.get_field("text_raw") {
            doc.add_text(field, &self.text);
        }

        if let Ok(field) = schema.get_field("keywords") {
            for keyword in &self.keywords {
                doc.add_text(field, keyword);
            }
        }

        if let Ok(field) = schema.get_field("frequency") {
            doc.add_u64(field, self.frequency);
        }

        if let Ok(field) = schema.get_field("metadata") {
            doc.add_text(field, &self.metadata);
        }

        if let Ok(field) = schema.get_field("created_at") {
            doc.add_date(
                field,
                tantivy::DateTime::from_timestamp_secs(self.created_at.timestamp()),
            );
        }

        if let Ok(field) = schema.get_field("updated_at") {
            doc.add_date(
                field,
                tantivy::DateTime::from_timestamp_secs(self.updated_at.timestamp()),
            );
        }

        doc
    }

    /// Rebuild from a retrieved tantivy document
    pub fn from_tantivy_doc(doc: &TantivyDocument, schema: &Schema) -> Option<Self> {
        let get_text = |name: &str| -> Option<String> {
            schema.get_field(name).ok().and_then(|field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            })
        };

        let id = get_text("id")?;
        let text = get_text("text")?;
        let metadata = get_text("metadata").unwrap_or_default();

        let keywords = schema
            .get_field("keywords")
            .ok()
            .map(|field| {
                doc.get_all(field)
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let frequency = schema
            .get_field("frequency")
            .ok()
            .and_then(|field| doc.get_first(field).and_then(|v| v.as_u64()))
            .unwrap_or(0);

        let get_date = |name: &str| -> DateTime<Utc> {
            schema
                .get_field(name)
                .ok()
                .and_then(|field| doc.get_first(field).and_then(|v| v.as_datetime()))
                .and_then(|dt| Utc.timestamp_opt(dt.into_timestamp_secs(), 0).single())
                .unwrap_or_else(Utc::now)
        };

        Some(Self {
            id,
            text,
            keywords,
            frequency,
            metadata,
            created_at: get_date("created_at"),
            updated_at: get_date("updated_at"),
        })
    }

    /// Parse the stored metadata JSON back into a map
    pub fn metadata_map(&self) -> std::collections::HashMap<String, serde_json::Value> {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }
}

/// Build the lexical schema for query documents
pub fn build_suggest_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    // ID - stored, indexed as raw string
    schema_builder.add_text_field("id", STRING | STORED);

    // Text - full-text indexed with positions (phrase-prefix needs them), stored
    schema_builder.add_text_field("text", TEXT | STORED);

    // Raw text copy for exact-match lookups
    schema_builder.add_text_field("text_raw", STRING);

    // Keywords - raw tokens, multi-valued
    schema_builder.add_text_field("keywords", STRING | STORED);

    // Selection frequency - fast field for rescoring
    schema_builder.add_u64_field("frequency", INDEXED | STORED | FAST);

    // Metadata - opaque JSON, stored only
    schema_builder.add_text_field("metadata", STORED);

    // Timestamps
    schema_builder.add_date_field("created_at", STORED);
    schema_builder.add_date_field("updated_at", STORED);

    schema_builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_building() {
        let schema = build_suggest_schema();
        assert!(schema.get_field("id").is_ok());
        assert!(schema.get_field("text").is_ok());
        assert!(schema.get_field("text_raw").is_ok());
        assert!(schema.get_field("keywords").is_ok());
        assert!(schema.get_field("frequency").is_ok());
    }

    #[test]
    fn test_query_doc_conversion_normalizes_keywords() {
        let doc = QueryDoc::new("1", "销售额")
            .with_keywords(vec!["Revenue".to_string(), "销售".to_string()]);
        let lexical = LexicalDocument::from(&doc);
        assert_eq!(lexical.keywords, vec!["revenue", "销售"]);
        assert_eq!(lexical.frequency, 0);
    }

    #[test]
    fn test_tantivy_roundtrip() {
        let schema = build_suggest_schema();
        let mut doc = QueryDoc::new("doc-1", "销售额趋势分析");
        doc.frequency = 7;
        doc.metadata
            .insert("category".to_string(), serde_json::json!("sales"));

        let lexical = LexicalDocument::from(&doc);
        let tantivy_doc = lexical.to_tantivy_doc(&schema);
        let restored = LexicalDocument::from_tantivy_doc(&tantivy_doc, &schema).unwrap();

        assert_eq!(restored.id, "doc-1");
        assert_eq!(restored.text, "销售额趋势分析");
        assert_eq!(restored.frequency, 7);
        assert_eq!(
            restored.metadata_map().get("category"),
            Some(&serde_json::json!("sales"))
        );
    }
}
