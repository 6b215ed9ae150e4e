use async_trait::async_trait;
use chatbi_suggest::behavior::{BehaviorStore, InMemoryBehaviorStore};
use chatbi_suggest::config::Config;
use chatbi_suggest::embedding::EmbeddingProvider;
use chatbi_suggest::lexical::IndexManager;
use chatbi_suggest::orchestrator::SuggestService;
use chatbi_suggest::store::NewDocument;
use chatbi_suggest::vector::{HnswVectorIndex, VectorError, VectorHit, VectorResult, VectorSearch};
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_DIMENSION: usize = 64;

/// Vector index stub whose every search exceeds the configured deadline
pub struct TimingOutVectorIndex;

#[async_trait]
impl VectorSearch for TimingOutVectorIndex {
    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn len(&self) -> usize {
        0
    }

    fn check_connection(&self) -> bool {
        false
    }

    async fn upsert(&self, _id: &str, _vector: &[f32]) -> VectorResult<()> {
        Ok(())
    }

    async fn search(&self, _vector: &[f32], _k: usize) -> VectorResult<Vec<VectorHit>> {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        Err(VectorError::SearchFailed("stubbed outage".to_string()))
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.lexical.index_path = dir.path().to_path_buf();
    config.embedder.dimension = TEST_DIMENSION;
    config
}

/// Build a service over a temp index, in-memory behavior, and no oracle
pub fn build_service(dir: &TempDir, vector: Option<Arc<dyn VectorSearch>>) -> Arc<SuggestService> {
    let config = test_config(dir);
    let embedding = Arc::new(EmbeddingProvider::new(config.embedder.clone()));
    let lexical = Arc::new(IndexManager::new(&config.lexical).unwrap());
    let vector =
        vector.unwrap_or_else(|| Arc::new(HnswVectorIndex::new(config.embedder.dimension)));
    let behavior: Arc<dyn BehaviorStore> =
        Arc::new(InMemoryBehaviorStore::new(&config.behavior));

    Arc::new(SuggestService::new(
        config,
        embedding,
        lexical,
        vector,
        Some(behavior),
        None,
    ))
}

/// Index the three-document corpus most scenarios share
pub async fn seed_sales_corpus(service: &SuggestService) {
    let docs = [
        NewDocument {
            text: "销售额".to_string(),
            doc_id: Some("1".to_string()),
            keywords: vec!["销售".to_string(), "revenue".to_string()],
            metadata: Default::default(),
        },
        NewDocument {
            text: "销售额趋势分析".to_string(),
            doc_id: Some("2".to_string()),
            keywords: vec!["销售".to_string(), "trend".to_string()],
            metadata: Default::default(),
        },
        NewDocument {
            text: "市场分析".to_string(),
            doc_id: Some("3".to_string()),
            keywords: vec!["market".to_string()],
            metadata: Default::default(),
        },
    ];

    for doc in &docs {
        service.add_document(doc).await.unwrap();
    }
}
