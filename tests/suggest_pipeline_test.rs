//! End-to-end scenarios through the orchestrator: hybrid ranking,
//! personalization, prefix preservation, sequence learning, degradation,
//! and bulk ingest.

mod common;

use chatbi_suggest::error::AppError;
use chatbi_suggest::models::{normalized_key, SuggestionSource};
use chatbi_suggest::store::NewDocument;
use common::{build_service, seed_sales_corpus, TimingOutVectorIndex};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn hybrid_ranking_prefers_matching_documents() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);
    seed_sales_corpus(&service).await;

    let suggestions = service
        .get_suggestions("销售", None, 3, None, None)
        .await
        .unwrap();

    let texts: Vec<&str> = suggestions.iter().map(|s| s.text.as_str()).collect();
    assert!(texts.contains(&"销售额"));
    assert!(texts.contains(&"销售额趋势分析"));

    // The unrelated document is either absent or scores far below
    if let Some(market) = suggestions.iter().find(|s| s.text == "市场分析") {
        let best = &suggestions[0];
        assert!(market.score < best.score / 2.0);
    }

    for suggestion in &suggestions {
        assert!(matches!(
            suggestion.source,
            SuggestionSource::Hybrid | SuggestionSource::Keyword | SuggestionSource::Vector
        ));
    }
}

#[tokio::test]
async fn personalization_reorders_results() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);
    seed_sales_corpus(&service).await;

    for _ in 0..3 {
        service
            .record_feedback("销售", "销售额趋势分析", Some("u1"), None)
            .await
            .unwrap();
    }

    let suggestions = service
        .get_suggestions("销售", Some("u1"), 2, None, None)
        .await
        .unwrap();

    assert_eq!(suggestions[0].text, "销售额趋势分析");
    let personalized_shown = suggestions[0].source == SuggestionSource::Personalized
        || suggestions[0].metadata.get("personalized") == Some(&serde_json::json!(true));
    assert!(personalized_shown);
}

#[tokio::test]
async fn prefix_preservation_completes_the_tail_only() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);

    for text in ["销售额", "销量", "销售情况"] {
        service
            .add_document(&NewDocument::from_text(text))
            .await
            .unwrap();
    }

    let suggestions = service
        .get_suggestions("帮我查询一下今年北京的销", None, 3, None, None)
        .await
        .unwrap();

    assert!(!suggestions.is_empty());
    for suggestion in &suggestions {
        assert!(
            suggestion.text.starts_with("帮我查询一下今年北京的"),
            "prefix not preserved in {}",
            suggestion.text
        );
        assert_eq!(suggestion.source, SuggestionSource::PrefixPreserved);

        let completed = suggestion
            .metadata
            .get("completed_term")
            .and_then(|v| v.as_str())
            .unwrap();
        assert!(["销售额", "销量", "销售情况"].contains(&completed));
    }
}

#[tokio::test]
async fn sequence_learning_surfaces_followup_queries() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);
    seed_sales_corpus(&service).await;

    service
        .record_feedback("销售分析", "销售分析", Some("u2"), None)
        .await
        .unwrap();
    service
        .record_feedback("市场趋势", "市场趋势", Some("u2"), None)
        .await
        .unwrap();
    service
        .record_feedback("竞争分析", "竞争分析", Some("u2"), None)
        .await
        .unwrap();

    let related = service
        .get_related_queries("市场趋势", Some("u2"), 5, None)
        .await
        .unwrap();

    let followup = related
        .iter()
        .find(|s| s.text == "竞争分析")
        .expect("sequence-next result missing");
    assert_eq!(followup.source, SuggestionSource::SequenceNext);

    // Ranks above every hybrid-sourced result
    for hybrid in related
        .iter()
        .filter(|s| s.source == SuggestionSource::Hybrid)
    {
        assert!(followup.score > hybrid.score);
    }
}

#[tokio::test]
async fn vector_outage_degrades_to_keyword_only() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, Some(Arc::new(TimingOutVectorIndex)));
    seed_sales_corpus(&service).await;

    let before = chatbi_suggest::metrics::DEGRADED_LEGS_TOTAL
        .with_label_values(&["vector"])
        .get();

    let suggestions = service
        .get_suggestions("销售", None, 3, None, None)
        .await
        .unwrap();

    assert!(!suggestions.is_empty());
    for suggestion in &suggestions {
        assert_eq!(suggestion.source, SuggestionSource::Keyword);
    }

    let after = chatbi_suggest::metrics::DEGRADED_LEGS_TOTAL
        .with_label_values(&["vector"])
        .get();
    assert!(after > before);
}

#[tokio::test]
async fn bulk_add_reports_partial_failure() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);

    let items = vec![
        NewDocument::from_text("销售额"),
        NewDocument::from_text(""),
        NewDocument::from_text("市场分析"),
    ];

    let report = service.bulk_add_documents(&items).await.unwrap();
    assert_eq!(report.success_count, 2);
    assert_eq!(report.error_count, 1);

    // The successful documents are searchable immediately afterwards
    let suggestions = service
        .get_suggestions("销售额", None, 5, None, None)
        .await
        .unwrap();
    assert!(suggestions.iter().any(|s| s.text == "销售额"));
}

#[tokio::test]
async fn empty_query_is_a_validation_error() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);

    let result = service.get_suggestions("   ", None, 5, None, None).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let result = service.get_related_queries("", None, 5, None).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn limit_one_returns_at_most_one() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);
    seed_sales_corpus(&service).await;

    let suggestions = service
        .get_suggestions("销售", None, 1, None, None)
        .await
        .unwrap();
    assert!(suggestions.len() <= 1);
}

#[tokio::test]
async fn returned_texts_are_distinct_and_scores_non_increasing() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);
    seed_sales_corpus(&service).await;

    let suggestions = service
        .get_suggestions("销售", None, 10, None, None)
        .await
        .unwrap();

    let mut keys: Vec<String> = suggestions
        .iter()
        .map(|s| normalized_key(&s.text))
        .collect();
    keys.sort();
    let len_before = keys.len();
    keys.dedup();
    assert_eq!(keys.len(), len_before, "duplicate texts in response");

    for pair in suggestions.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn identical_requests_return_identical_order() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);
    seed_sales_corpus(&service).await;

    let first = service
        .get_suggestions("销售", None, 5, None, None)
        .await
        .unwrap();
    let second = service
        .get_suggestions("销售", None, 5, None, None)
        .await
        .unwrap();

    let order_first: Vec<(&str, f64)> =
        first.iter().map(|s| (s.text.as_str(), s.score)).collect();
    let order_second: Vec<(&str, f64)> =
        second.iter().map(|s| (s.text.as_str(), s.score)).collect();
    assert_eq!(order_first, order_second);
}

#[tokio::test]
async fn adds_are_idempotent_by_id() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);

    let doc = NewDocument::from_text("销售额");
    let id1 = service.add_document(&doc).await.unwrap();
    let id2 = service.add_document(&doc).await.unwrap();
    assert_eq!(id1, id2);

    let suggestions = service
        .get_suggestions("销售额", None, 10, None, None)
        .await
        .unwrap();
    let matches = suggestions.iter().filter(|s| s.text == "销售额").count();
    assert_eq!(matches, 1);
}

#[tokio::test]
async fn feedback_increments_document_frequency() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);
    seed_sales_corpus(&service).await;

    for _ in 0..4 {
        service
            .record_feedback("销售", "销售额", Some("u9"), None)
            .await
            .unwrap();
    }

    // Frequency feeds the lexical popularity term; after four selections
    // the shorter document stays on top even for a bare prefix query
    let suggestions = service
        .get_suggestions("销售", None, 2, None, None)
        .await
        .unwrap();
    assert_eq!(suggestions[0].text, "销售额");
}

#[tokio::test]
async fn related_queries_without_signals_are_empty() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);

    // No documents, no behavior, no oracle: nothing to relate
    let related = service
        .get_related_queries("销售", None, 5, None)
        .await
        .unwrap();
    assert!(related.is_empty());
}

#[tokio::test]
async fn similar_queries_exclude_the_query_itself() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None);
    seed_sales_corpus(&service).await;

    let similar = service
        .get_similar_queries("销售额", None, 5)
        .await
        .unwrap();

    assert!(similar.iter().all(|s| s.text != "销售额"));
    for pair in similar.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}
