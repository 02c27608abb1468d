//! The `SearchProvider` seam the orchestrator routes through (spec §4.H).
//! Two implementations exist: [`crate::text_provider::TextProvider`] (always
//! available) and [`crate::vector_provider::VectorProvider`] (semantic,
//! optionally reranked).

use async_trait::async_trait;
use kb_core::{Category, RecordId, RecordKind};

use crate::types::{DuplicateCandidate, ProviderKind, SearchError, SearchResultItem};

#[async_trait]
pub trait SearchProvider: Send + Sync {
  fn kind(&self) -> ProviderKind;

  /// Whether this provider can currently serve requests. The text provider
  /// is always `true`; the vector provider depends on the embedding model
  /// and index snapshot both being usable.
  async fn is_available(&self) -> bool;

  async fn search(
    &self,
    query: &str,
    kind: Option<RecordKind>,
    category_code: Option<&Category>,
    top_k: usize,
  ) -> Result<Vec<SearchResultItem>, SearchError>;

  async fn find_duplicates(
    &self,
    title: &str,
    body: &str,
    kind: RecordKind,
    category_code: Option<&Category>,
    exclude_id: Option<&RecordId>,
    threshold: f32,
  ) -> Result<Vec<DuplicateCandidate>, SearchError>;

  async fn rebuild_index(&self) -> Result<(), SearchError>;
}
