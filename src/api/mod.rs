//! HTTP surface: JSON over HTTP, versioned under /api/v1.

pub mod handlers;
pub mod routes;

pub use routes::build_router;

use crate::orchestrator::SuggestService;
use std::sync::Arc;

/// Shared application state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SuggestService>,
}

impl AppState {
    pub fn new(service: Arc<SuggestService>) -> Self {
        Self { service }
    }
}
