use super::{EmbeddingError, EmbeddingResult};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Pluggable text encoder. Implementations are CPU-bound and synchronous;
/// the provider runs them on the blocking pool.
///
/// Contract: identical input produces identical output within a run, and
/// every returned vector has unit L2 norm.
pub trait TextEncoder: Send + Sync {
    /// Embedding dimension
    fn dimension(&self) -> usize;

    /// Encode a batch of texts into unit vectors, one per input
    fn encode_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;
}

/// Deterministic hashed-feature encoder.
///
/// Tokens (whitespace-separated words plus overlapping character bigrams,
/// which carry the signal for unsegmented CJK text) are hashed into the
/// target dimension with a sign bit, then the vector is L2-normalized.
/// Suitable wherever reproducibility matters more than semantic fidelity;
/// a transformer-backed encoder can be swapped in behind [`TextEncoder`].
pub struct HashedNgramEncoder {
    dimension: usize,
}

impl HashedNgramEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_feature(feature: &str) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(feature.as_bytes());
        hasher.finish()
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let h = Self::hash_feature(feature);
        let idx = (h as usize) % self.dimension;
        // Highest hash bit decides the sign so collisions tend to cancel
        let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign * weight;
    }

    fn encode_one(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];

        for word in text.split_whitespace() {
            self.accumulate(&mut vector, word, 1.0);
        }

        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        for ch in &chars {
            let mut buf = [0u8; 4];
            self.accumulate(&mut vector, ch.encode_utf8(&mut buf), 0.5);
        }
        for pair in chars.windows(2) {
            let bigram: String = pair.iter().collect();
            self.accumulate(&mut vector, &bigram, 1.0);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(EmbeddingError::ZeroVector);
        }
        for x in &mut vector {
            *x /= norm;
        }
        Ok(vector)
    }
}

impl TextEncoder for HashedNgramEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode_one(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_norm() {
        let encoder = HashedNgramEncoder::new(64);
        let vectors = encoder
            .encode_batch(&["销售额趋势分析".to_string(), "market share".to_string()])
            .unwrap();

        for v in &vectors {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6, "norm was {}", norm);
        }
    }

    #[test]
    fn test_deterministic() {
        let encoder = HashedNgramEncoder::new(64);
        let a = encoder.encode_batch(&["销售额".to_string()]).unwrap();
        let b = encoder.encode_batch(&["销售额".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_ngrams_increase_similarity() {
        let encoder = HashedNgramEncoder::new(128);
        let vectors = encoder
            .encode_batch(&[
                "销售额".to_string(),
                "销售额趋势".to_string(),
                "市场分析".to_string(),
            ])
            .unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        let close = dot(&vectors[0], &vectors[1]);
        let far = dot(&vectors[0], &vectors[2]);
        assert!(
            close > far,
            "expected overlapping text to score higher: {} vs {}",
            close,
            far
        );
    }

    #[test]
    fn test_zero_vector_rejected() {
        let encoder = HashedNgramEncoder::new(64);
        let result = encoder.encode_batch(&["".to_string()]);
        assert!(matches!(result, Err(EmbeddingError::ZeroVector)));
    }
}
