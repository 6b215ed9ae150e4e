use super::{EmbeddingError, EmbeddingResult, HashedNgramEncoder, TextEncoder};
use crate::config::EmbedderConfig;
use moka::future::Cache;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Batched, cached embedding provider.
///
/// The underlying encoder loads lazily on first use; identical inputs hit
/// the bounded LRU cache and skip re-encoding. Inputs longer than the
/// configured limit are truncated at a char boundary before caching so the
/// truncation policy is stable across calls.
pub struct EmbeddingProvider {
    config: EmbedderConfig,
    encoder: OnceCell<Arc<dyn TextEncoder>>,
    factory: Box<dyn Fn() -> EmbeddingResult<Arc<dyn TextEncoder>> + Send + Sync>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl EmbeddingProvider {
    /// Create a provider backed by the default deterministic encoder
    pub fn new(config: EmbedderConfig) -> Self {
        let dimension = config.dimension;
        Self::with_factory(config, move || {
            Ok(Arc::new(HashedNgramEncoder::new(dimension)) as Arc<dyn TextEncoder>)
        })
    }

    /// Create a provider with a custom encoder factory (loaded lazily)
    pub fn with_factory<F>(config: EmbedderConfig, factory: F) -> Self
    where
        F: Fn() -> EmbeddingResult<Arc<dyn TextEncoder>> + Send + Sync + 'static,
    {
        let cache = Cache::builder().max_capacity(config.cache_size).build();
        Self {
            config,
            encoder: OnceCell::new(),
            factory: Box::new(factory),
            cache,
        }
    }

    /// Embedding dimension
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn encoder(&self) -> EmbeddingResult<Arc<dyn TextEncoder>> {
        let encoder = self
            .encoder
            .get_or_try_init(|| async {
                tracing::info!(model = %self.config.model, "Loading text encoder");
                let encoder = (self.factory)()?;
                if encoder.dimension() != self.config.dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.config.dimension,
                        actual: encoder.dimension(),
                    });
                }
                Ok(encoder)
            })
            .await?;
        Ok(encoder.clone())
    }

    /// Right-truncate at a char boundary, keeping the policy stable
    fn truncate(&self, text: &str) -> String {
        if text.chars().count() <= self.config.max_input_chars {
            return text.to_string();
        }
        text.chars().take(self.config.max_input_chars).collect()
    }

    /// Encode a single text (wrapped as a batch of one)
    pub async fn encode_single(&self, text: &str) -> EmbeddingResult<Arc<Vec<f32>>> {
        let mut vectors = self.encode(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }

    /// Encode a batch of texts, serving cache hits without re-invocation
    pub async fn encode(&self, texts: &[String]) -> EmbeddingResult<Vec<Arc<Vec<f32>>>> {
        let keys: Vec<String> = texts.iter().map(|t| self.truncate(t)).collect();

        let mut results: Vec<Option<Arc<Vec<f32>>>> = Vec::with_capacity(keys.len());
        let mut misses: Vec<(usize, String)> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            match self.cache.get(key).await {
                Some(hit) => results.push(Some(hit)),
                None => {
                    results.push(None);
                    misses.push((i, key.clone()));
                }
            }
        }

        if !misses.is_empty() {
            let encoder = self.encoder().await?;
            let batch: Vec<String> = misses.iter().map(|(_, k)| k.clone()).collect();
            let dimension = self.config.dimension;

            let encoded = tokio::task::spawn_blocking(move || encoder.encode_batch(&batch))
                .await
                .map_err(|e| EmbeddingError::EncodingFailed(format!("join error: {}", e)))??;

            if encoded.len() != misses.len() {
                return Err(EmbeddingError::EncodingFailed(format!(
                    "encoder returned {} vectors for {} inputs",
                    encoded.len(),
                    misses.len()
                )));
            }

            for ((i, key), vector) in misses.into_iter().zip(encoded) {
                if vector.len() != dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: dimension,
                        actual: vector.len(),
                    });
                }
                let vector = Arc::new(vector);
                self.cache.insert(key, vector.clone()).await;
                results[i] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.expect("slot filled")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dimension: usize) -> EmbedderConfig {
        EmbedderConfig {
            model: "hashed-ngram".to_string(),
            dimension,
            cache_size: 100,
            max_input_chars: 8,
        }
    }

    #[tokio::test]
    async fn test_encode_single_is_unit_vector() {
        let provider = EmbeddingProvider::new(test_config(64));
        let vector = provider.encode_single("销售额").await.unwrap();
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_cache_returns_same_vector() {
        let provider = EmbeddingProvider::new(test_config(64));
        let first = provider.encode_single("market share").await.unwrap();
        let second = provider.encode_single("market share").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_truncation_is_stable() {
        let provider = EmbeddingProvider::new(test_config(64));
        // Both inputs share the same 8-char prefix, so they truncate to the
        // same key and must produce the same embedding.
        let a = provider.encode_single("一二三四五六七八九十").await.unwrap();
        let b = provider.encode_single("一二三四五六七八AB").await.unwrap();
        assert_eq!(*a, *b);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_detected() {
        let config = test_config(64);
        let provider = EmbeddingProvider::with_factory(config, || {
            Ok(Arc::new(HashedNgramEncoder::new(32)) as Arc<dyn TextEncoder>)
        });
        let result = provider.encode_single("text").await;
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch { .. })
        ));
    }
}
