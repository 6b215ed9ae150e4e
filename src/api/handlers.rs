use crate::api::AppState;
use crate::error::Result;
use crate::metrics;
use crate::models::{RequestContext, Suggestion};
use crate::store::NewDocument;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use validator::Validate;

fn default_limit() -> usize {
    10
}

/// Get autocomplete suggestions
pub async fn autocomplete(
    State(state): State<AppState>,
    Json(request): Json<AutocompleteRequest>,
) -> Result<Json<AutocompleteResponse>> {
    request.validate()?;

    let suggestions = state
        .service
        .get_suggestions(
            &request.query,
            request.user_id.as_deref(),
            request.limit,
            request.min_score,
            request.context.as_ref(),
        )
        .await?;

    Ok(Json(AutocompleteResponse {
        query: request.query,
        total: suggestions.len(),
        suggestions,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AutocompleteRequest {
    #[validate(length(min = 1))]
    pub query: String,

    pub user_id: Option<String>,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 50))]
    pub limit: usize,

    pub min_score: Option<f64>,

    pub context: Option<RequestContext>,
}

#[derive(Debug, Serialize)]
pub struct AutocompleteResponse {
    pub query: String,
    pub suggestions: Vec<Suggestion>,
    pub total: usize,
}

/// Get semantically similar queries
pub async fn similar_queries(
    State(state): State<AppState>,
    Json(request): Json<SimilarQueriesRequest>,
) -> Result<Json<SimilarQueriesResponse>> {
    request.validate()?;

    let similar = state
        .service
        .get_similar_queries(&request.query, request.user_id.as_deref(), request.limit)
        .await?;

    Ok(Json(SimilarQueriesResponse {
        query: request.query,
        total: similar.len(),
        similar_queries: similar,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SimilarQueriesRequest {
    #[validate(length(min = 1))]
    pub query: String,

    pub user_id: Option<String>,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 50))]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct SimilarQueriesResponse {
    pub query: String,
    pub similar_queries: Vec<Suggestion>,
    pub total: usize,
}

/// Get contextually related queries
pub async fn related_queries(
    State(state): State<AppState>,
    Json(request): Json<RelatedQueriesRequest>,
) -> Result<Json<RelatedQueriesResponse>> {
    request.validate()?;

    let related = state
        .service
        .get_related_queries(
            &request.query,
            request.user_id.as_deref(),
            request.limit,
            request.context.as_ref(),
        )
        .await?;

    Ok(Json(RelatedQueriesResponse {
        query: request.query,
        total: related.len(),
        related_queries: related,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RelatedQueriesRequest {
    #[validate(length(min = 1))]
    pub query: String,

    pub user_id: Option<String>,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 50))]
    pub limit: usize,

    pub context: Option<RequestContext>,
}

#[derive(Debug, Serialize)]
pub struct RelatedQueriesResponse {
    pub query: String,
    pub related_queries: Vec<Suggestion>,
    pub total: usize,
}

/// Record a user's selection
pub async fn feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>> {
    request.validate()?;

    let success = state
        .service
        .record_feedback(
            &request.query,
            &request.selected_suggestion,
            request.user_id.as_deref(),
            request.timestamp,
        )
        .await?;

    Ok(Json(FeedbackResponse {
        success,
        message: if success {
            "Feedback recorded".to_string()
        } else {
            "Failed to record feedback".to_string()
        },
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[validate(length(min = 1))]
    pub query: String,

    #[validate(length(min = 1))]
    pub selected_suggestion: String,

    pub user_id: Option<String>,

    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub success: bool,
    pub message: String,
}

/// Add a document to the index
pub async fn add_document(
    State(state): State<AppState>,
    Json(request): Json<DocumentRequest>,
) -> Result<Json<DocumentResponse>> {
    request.validate()?;

    let id = state
        .service
        .add_document(&NewDocument {
            text: request.text,
            doc_id: request.doc_id,
            keywords: request.keywords,
            metadata: request.metadata,
        })
        .await?;

    Ok(Json(DocumentResponse {
        success: true,
        message: "Document added".to_string(),
        id,
    }))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct DocumentRequest {
    #[validate(length(min = 1))]
    pub text: String,

    pub doc_id: Option<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub success: bool,
    pub message: String,
    pub id: String,
}

/// Add documents in bulk; partial failures are reported, not fatal
pub async fn add_documents_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkDocumentRequest>,
) -> Result<Json<BulkDocumentResponse>> {
    request.validate()?;

    let items: Vec<NewDocument> = request
        .documents
        .into_iter()
        .map(|doc| NewDocument {
            text: doc.text,
            doc_id: doc.doc_id,
            keywords: doc.keywords,
            metadata: doc.metadata,
        })
        .collect();

    let report = state.service.bulk_add_documents(&items).await?;

    Ok(Json(BulkDocumentResponse {
        message: format!(
            "Added {} documents with {} errors",
            report.success_count, report.error_count
        ),
        success_count: report.success_count,
        error_count: report.error_count,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkDocumentRequest {
    #[validate(length(min = 1))]
    pub documents: Vec<DocumentRequest>,
}

#[derive(Debug, Serialize)]
pub struct BulkDocumentResponse {
    pub success_count: usize,
    pub error_count: usize,
    pub message: String,
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<AppState>,
) -> Json<crate::orchestrator::HealthStatus> {
    Json(state.service.health().await)
}

/// Prometheus metrics endpoint
pub async fn metrics_export() -> Result<String> {
    metrics::gather()
}

/// Root endpoint
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "chatbi-suggest",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str, limit: usize) -> AutocompleteRequest {
        AutocompleteRequest {
            query: query.to_string(),
            user_id: None,
            limit,
            min_score: None,
            context: None,
        }
    }

    #[test]
    fn test_limit_bounds() {
        assert!(request("销售", 1).validate().is_ok());
        assert!(request("销售", 50).validate().is_ok());
        assert!(request("销售", 0).validate().is_err());
        assert!(request("销售", 51).validate().is_err());
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(request("", 10).validate().is_err());
    }

    #[test]
    fn test_limit_defaults_to_ten() {
        let parsed: AutocompleteRequest =
            serde_json::from_str(r#"{"query": "销售"}"#).unwrap();
        assert_eq!(parsed.limit, 10);
    }
}
