//! HNSW-backed vector index with incremental insertion.

use super::{VectorError, VectorHit, VectorResult, VectorSearch};
use async_trait::async_trait;
use hnsw::{Hnsw, Searcher};
use parking_lot::RwLock;
use space::{Metric, Neighbor};
use std::collections::HashMap;
use std::sync::Arc;

/// Cosine distance over unit vectors, scaled into u32 per the `space`
/// metric contract. Inputs are validated to be unit length on upsert, so
/// the dot product alone is the cosine similarity.
struct CosineDistance;

impl Metric<Vec<f32>> for CosineDistance {
    type Unit = u32;

    fn distance(&self, a: &Vec<f32>, b: &Vec<f32>) -> u32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        // Similarity in [-1, 1] maps to distance in [0, 2]
        let distance = (1.0 - dot).clamp(0.0, 2.0);
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

const EF_SEARCH_FLOOR: usize = 50;

struct Inner {
    index: Hnsw<CosineDistance, Vec<f32>, rand::rngs::StdRng, 16, 32>,
    /// Insertion slot -> document id
    slots: Vec<String>,
    /// Document id -> its live slot; superseded slots are skipped on read
    positions: HashMap<String, usize>,
}

/// In-process ANN index. Deterministic given the same insertion order and
/// parameters: the HNSW graph is seeded from a fixed RNG and search results
/// are re-sorted with a total order before returning.
#[derive(Clone)]
pub struct HnswVectorIndex {
    inner: Arc<RwLock<Inner>>,
    dimension: usize,
}

impl HnswVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                index: Hnsw::new(CosineDistance),
                slots: Vec::new(),
                positions: HashMap::new(),
            })),
            dimension,
        }
    }

    fn validate(&self, vector: &[f32]) -> VectorResult<()> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if (norm - 1.0).abs() > 1e-3 {
            return Err(VectorError::NotUnitLength { norm });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorSearch for HnswVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.inner.read().positions.len()
    }

    fn check_connection(&self) -> bool {
        true
    }

    async fn upsert(&self, id: &str, vector: &[f32]) -> VectorResult<()> {
        self.validate(vector)?;

        let inner = self.inner.clone();
        let id = id.to_string();
        let vector = vector.to_vec();

        // Graph insertion is CPU-bound
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.write();
            let mut searcher = Searcher::default();
            let slot = guard.index.insert(vector, &mut searcher);
            if guard.slots.len() <= slot {
                guard.slots.resize(slot + 1, String::new());
            }
            guard.slots[slot] = id.clone();
            // A re-upsert leaves the old slot in the graph; positions keeps
            // only the latest one visible
            guard.positions.insert(id, slot);
        })
        .await
        .map_err(|e| VectorError::UpsertFailed(format!("join error: {}", e)))?;

        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> VectorResult<Vec<VectorHit>> {
        self.validate(vector)?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.clone();
        let query = vector.to_vec();

        let hits = tokio::task::spawn_blocking(move || {
            let guard = inner.read();
            if guard.slots.is_empty() {
                return Vec::new();
            }

            // Overfetch so superseded slots can be dropped without
            // shrinking the result set
            let want = (k * 2).min(guard.slots.len()).max(1);
            let mut neighbors = vec![
                Neighbor {
                    index: !0,
                    distance: !0,
                };
                want
            ];

            let ef_search = (k * 2).max(EF_SEARCH_FLOOR);
            let mut searcher = Searcher::default();
            guard
                .index
                .nearest(&query, ef_search, &mut searcher, &mut neighbors);

            let mut hits: Vec<VectorHit> = neighbors
                .into_iter()
                .filter(|n| n.index != !0)
                .filter_map(|neighbor| {
                    let id = guard.slots.get(neighbor.index)?;
                    // Skip slots superseded by a later upsert of the same id
                    if guard.positions.get(id) != Some(&neighbor.index) {
                        return None;
                    }
                    let distance = (neighbor.distance as f32) / (u32::MAX as f32 / 2.0);
                    let similarity = (1.0 - distance).clamp(-1.0, 1.0);
                    Some(VectorHit {
                        id: id.clone(),
                        similarity,
                    })
                })
                .collect();

            hits.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            hits.truncate(k);
            hits
        })
        .await
        .map_err(|e| VectorError::SearchFailed(format!("join error: {}", e)))?;

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        v
    }

    #[tokio::test]
    async fn test_nearest_neighbor_ordering() {
        let index = HnswVectorIndex::new(3);

        index.upsert("a", &unit(vec![1.0, 0.0, 0.0])).await.unwrap();
        index.upsert("b", &unit(vec![0.0, 1.0, 0.0])).await.unwrap();
        index.upsert("c", &unit(vec![0.9, 0.1, 0.0])).await.unwrap();

        let hits = index.search(&unit(vec![1.0, 0.0, 0.0]), 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "c");
        assert!(hits[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_similarity_range() {
        let index = HnswVectorIndex::new(2);
        index.upsert("pos", &unit(vec![1.0, 0.0])).await.unwrap();
        index.upsert("neg", &unit(vec![-1.0, 0.0])).await.unwrap();

        let hits = index.search(&unit(vec![1.0, 0.0]), 2).await.unwrap();
        for hit in &hits {
            assert!((-1.0..=1.0).contains(&hit.similarity));
        }
        assert_eq!(hits[0].id, "pos");
        assert!(hits.iter().any(|h| h.id == "neg" && h.similarity < -0.9));
    }

    #[tokio::test]
    async fn test_upsert_replaces_stale_vector() {
        let index = HnswVectorIndex::new(2);

        index.upsert("a", &unit(vec![1.0, 0.0])).await.unwrap();
        index.upsert("a", &unit(vec![0.0, 1.0])).await.unwrap();
        assert_eq!(index.len(), 1);

        let hits = index.search(&unit(vec![0.0, 1.0]), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_empty_index() {
        let index = HnswVectorIndex::new(2);
        let hits = index.search(&unit(vec![1.0, 0.0]), 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_unit_vectors() {
        let index = HnswVectorIndex::new(2);
        let result = index.upsert("a", &[3.0, 4.0]).await;
        assert!(matches!(result, Err(VectorError::NotUnitLength { .. })));
    }

    #[tokio::test]
    async fn test_rejects_dimension_mismatch() {
        let index = HnswVectorIndex::new(3);
        let result = index.upsert("a", &[1.0, 0.0]).await;
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
    }
}
