//! Lexical (inverted-index) retrieval leg backed by tantivy.
//!
//! One combined query blends three modes: phrase-prefix on the text field,
//! fuzzy whole-token matching, and exact keyword terms, each with its own
//! boost. Scores carry a logarithmic popularity term from the per-document
//! selection frequency.

mod document;
mod error;
mod index;
mod search;

pub use document::{build_suggest_schema, LexicalDocument};
pub use error::{LexicalError, LexicalResult};
pub use index::{BulkIndexReport, IndexManager};
pub use search::{LexicalHit, LexicalSearcher};
