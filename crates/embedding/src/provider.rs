//! Narrow interfaces the search and embedding subsystem consumes external
//! models through. Concrete HTTP backends are out of scope here — callers
//! inject whatever implements these traits.

use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn model_version(&self) -> &str;
  fn dimension(&self) -> usize;

  /// Encode a single text into a unit-normalized vector of `dimension()` length.
  async fn encode_single(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

  /// Encode several texts. Implementations may batch internally; callers must
  /// not assume per-text isolation of failures beyond what the provider documents.
  async fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

#[async_trait]
pub trait RerankerProvider: Send + Sync {
  /// Score `(search, task)` against each document, returning one probability
  /// in `[0, 1]` per document, same order as `documents`.
  async fn rerank(&self, search: &str, task: &str, documents: &[&str]) -> Result<Vec<f32>, ProviderError>;
}

/// Error raised by an embedding or reranker provider. `retryable` makes the
/// orchestrator's retry/fallback decision a pure function of the value
/// instead of the variant name, so a new failure mode doesn't silently fall
/// through retry logic written for an old one.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ProviderError {
  #[error("provider unavailable")]
  Unavailable,
  #[error("request timed out")]
  Timeout,
  #[error("network error: {0}")]
  Network(String),
  #[error("provider returned an error: {0}")]
  Remote(String),
  #[error("invalid input: {0}")]
  InvalidInput(String),
}

impl ProviderError {
  pub fn is_retryable(&self) -> bool {
    match self {
      ProviderError::Network(_) | ProviderError::Timeout => true,
      ProviderError::Remote(msg) => msg.contains("429") || msg.contains("502") || msg.contains("503") || msg.contains("504"),
      ProviderError::Unavailable | ProviderError::InvalidInput(_) => false,
    }
  }

  /// True for the class of failure the orchestrator should skip retries for
  /// entirely and fall back immediately (spec §4.H step 1).
  pub fn is_unavailable(&self) -> bool {
    matches!(self, ProviderError::Unavailable)
  }
}
