use crate::api::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/autocomplete", post(handlers::autocomplete))
        .route("/similar-queries", post(handlers::similar_queries))
        .route("/related-queries", post(handlers::related_queries))
        .route("/feedback", post(handlers::feedback))
        .route("/documents", post(handlers::add_document))
        .route("/documents/bulk", post(handlers::add_documents_bulk))
        .route("/health", get(handlers::health_check));

    Router::new()
        .route("/", get(handlers::root))
        .route("/metrics", get(handlers::metrics_export))
        .nest("/api/v1", v1)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
}
