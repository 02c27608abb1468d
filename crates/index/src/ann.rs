//! Approximate nearest-neighbor search over unit-normalized float32 vectors.
//!
//! Backed by an HNSW graph once the corpus is large enough to benefit from one;
//! below that, falls back to an exact linear scan. Internal ids here are plain
//! vector positions (0-based, append-only) — the record-identity mapping lives
//! one layer up, in [`crate::manager::IndexManager`].

use hnsw_rs::prelude::*;

/// Tuning knobs for the HNSW graph. Defaults favor recall over raw speed,
/// matching what a corpus of a few thousand records actually needs.
#[derive(Debug, Clone, Copy)]
pub struct AnnConfig {
  /// Neighbors per node. Higher = better recall, slower build.
  pub m: usize,
  /// Candidate list size during construction.
  pub ef_construction: usize,
  /// Candidate list size during search.
  pub ef_search: usize,
  /// Below this many live vectors, use exact linear scan instead of HNSW.
  pub min_vectors_for_ann: usize,
}

impl Default for AnnConfig {
  fn default() -> Self {
    Self {
      m: 16,
      ef_construction: 200,
      ef_search: 64,
      min_vectors_for_ann: 1000,
    }
  }
}

impl AnnConfig {
  fn should_use_ann(&self, num_vectors: usize) -> bool {
    num_vectors >= self.min_vectors_for_ann
  }
}

/// A single hit: internal vector id plus cosine similarity in `[-1, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct AnnHit {
  pub id: usize,
  pub similarity: f32,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum AnnError {
  #[error("dimension mismatch: expected {expected}, got {got}")]
  DimensionMismatch { expected: usize, got: usize },
}

/// Append-only vector store with an optional HNSW graph on top.
pub struct AnnIndex {
  config: AnnConfig,
  dimension: usize,
  vectors: Vec<Vec<f32>>,
  hnsw: Option<Hnsw<'static, f32, DistCosine>>,
  stale: bool,
}

impl AnnIndex {
  pub fn new(dimension: usize, config: AnnConfig) -> Self {
    Self {
      config,
      dimension,
      vectors: Vec::new(),
      hnsw: None,
      stale: true,
    }
  }

  pub fn dimension(&self) -> usize {
    self.dimension
  }

  pub fn len(&self) -> usize {
    self.vectors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.vectors.is_empty()
  }

  /// The raw vector store, in internal-id order. Used by snapshot persistence.
  pub fn vectors(&self) -> &[Vec<f32>] {
    &self.vectors
  }

  /// Append a vector, returning its newly assigned internal id.
  pub fn push(&mut self, vector: Vec<f32>) -> Result<usize, AnnError> {
    if vector.len() != self.dimension {
      return Err(AnnError::DimensionMismatch {
        expected: self.dimension,
        got: vector.len(),
      });
    }
    let id = self.vectors.len();
    self.vectors.push(vector);
    self.stale = true;
    Ok(id)
  }

  /// Rebuild the HNSW graph from the current vector set. Cheap no-op if
  /// nothing changed since the last build.
  pub fn refresh(&mut self) {
    if !self.stale {
      return;
    }
    let n = self.vectors.len();
    if !self.config.should_use_ann(n) || n == 0 {
      self.hnsw = None;
      self.stale = false;
      return;
    }
    let nb_layer = 16usize.min((n as f32).ln().trunc() as usize).max(1);
    let hnsw = Hnsw::<f32, DistCosine>::new(self.config.m, n, nb_layer, self.config.ef_construction, DistCosine {});
    let data: Vec<(&Vec<f32>, usize)> = self.vectors.iter().enumerate().map(|(id, v)| (v, id)).collect();
    hnsw.parallel_insert(&data);
    self.hnsw = Some(hnsw);
    self.stale = false;
  }

  /// Search for up to `k` nearest neighbors of `query`, as cosine similarity
  /// in descending order. `query` must already be unit-normalized.
  pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<AnnHit>, AnnError> {
    if query.len() != self.dimension {
      return Err(AnnError::DimensionMismatch {
        expected: self.dimension,
        got: query.len(),
      });
    }
    if k == 0 || self.vectors.is_empty() {
      return Ok(Vec::new());
    }

    if let Some(ref hnsw) = self.hnsw
      && !self.stale
    {
      let results: Vec<Neighbour> = hnsw.search(query, k, self.config.ef_search);
      return Ok(
        results
          .into_iter()
          .map(|n| AnnHit {
            id: n.get_origin_id(),
            similarity: 1.0 - n.distance,
          })
          .collect(),
      );
    }

    Ok(self.linear_search(query, k))
  }

  fn linear_search(&self, query: &[f32], k: usize) -> Vec<AnnHit> {
    let mut scored: Vec<AnnHit> = self
      .vectors
      .iter()
      .enumerate()
      .map(|(id, v)| AnnHit {
        id,
        similarity: cosine_similarity(query, v),
      })
      .collect();
    scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
  }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
  let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm_a == 0.0 || norm_b == 0.0 {
    return -1.0;
  }
  (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn idx() -> AnnIndex {
    AnnIndex::new(3, AnnConfig { min_vectors_for_ann: 1, ..AnnConfig::default() })
  }

  #[test]
  fn push_assigns_monotonic_ids() {
    let mut index = idx();
    assert_eq!(index.push(vec![1.0, 0.0, 0.0]).unwrap(), 0);
    assert_eq!(index.push(vec![0.0, 1.0, 0.0]).unwrap(), 1);
    assert_eq!(index.push(vec![0.0, 0.0, 1.0]).unwrap(), 2);
  }

  #[test]
  fn push_rejects_wrong_dimension() {
    let mut index = idx();
    let err = index.push(vec![1.0, 0.0]).unwrap_err();
    assert!(matches!(err, AnnError::DimensionMismatch { expected: 3, got: 2 }));
  }

  #[test]
  fn linear_search_orders_by_similarity() {
    let mut index = idx();
    index.push(vec![1.0, 0.0, 0.0]).unwrap();
    index.push(vec![0.0, 1.0, 0.0]).unwrap();
    index.push(vec![0.9, 0.1, 0.0]).unwrap();

    let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, 0);
    assert!(hits[0].similarity > hits[1].similarity);
  }

  #[test]
  fn search_respects_k_and_caps_at_available() {
    let mut index = idx();
    for i in 0..5 {
      index.push(vec![i as f32, 0.0, 0.0]).unwrap();
    }
    assert_eq!(index.search(&[0.0, 0.0, 0.0], 2).unwrap().len(), 2);
    assert_eq!(index.search(&[0.0, 0.0, 0.0], 100).unwrap().len(), 5);
  }

  #[test]
  fn empty_index_returns_no_hits() {
    let index = idx();
    assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
  }

  #[test]
  fn refresh_builds_hnsw_above_threshold() {
    let mut index = idx();
    for i in 0..20 {
      index.push(vec![i as f32, 0.0, 0.0]).unwrap();
    }
    index.refresh();
    assert!(index.hnsw.is_some());
    let hits = index.search(&[0.0, 0.0, 0.0], 3).unwrap();
    assert_eq!(hits.len(), 3);
  }

  #[test]
  fn cosine_similarity_known_values() {
    assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
  }
}
