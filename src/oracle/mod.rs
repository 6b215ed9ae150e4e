//! Optional semantic oracle: query expansion, related-query generation,
//! and prefix-tail ranking via an external LLM endpoint.
//!
//! The engine is fully functional without it. Every oracle failure
//! (timeout, transport error, unparseable reply) is logged, counted, and
//! treated as an empty result.

mod client;

pub use client::HttpOracleClient;

use crate::models::RequestContext;
use async_trait::async_trait;
use thiserror::Error;

/// Errors internal to the oracle client; they never escape as request
/// failures
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle not configured: {0}")]
    NotConfigured(String),

    #[error("Oracle request failed: {0}")]
    RequestFailed(String),

    #[error("Oracle reply unparseable: {0}")]
    UnparseableReply(String),
}

/// One ranked tail completion
#[derive(Debug, Clone)]
pub struct RankedCompletion {
    /// The completed tail (not the full suggestion)
    pub text: String,
    /// Score in [0, 1]
    pub score: f64,
}

/// Oracle capability set. Implementations swallow their own failures and
/// return empty results instead.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Whether the oracle can currently serve calls
    fn is_available(&self) -> bool;

    /// Semantic paraphrases/expansions of a query, bounded
    async fn expand_query(&self, query: &str, context: Option<&RequestContext>) -> Vec<String>;

    /// Follow-up queries a user would plausibly ask next, bounded
    async fn generate_related(&self, query: &str, context: Option<&RequestContext>)
        -> Vec<String>;

    /// Order candidate completions of `tail` given the stable `prefix`
    async fn rank_prefix_completions(
        &self,
        prefix: &str,
        tail: &str,
        candidates: &[String],
        context: Option<&RequestContext>,
    ) -> Vec<RankedCompletion>;
}
