//! Shared result and error types for the search and embedding subsystem's
//! provider trait, orchestrator, and duplicate probe (spec §4.E–§4.J).

use kb_core::{Category, RecordId, RecordKind};

/// Which provider actually produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
  Vector,
  Text,
}

impl ProviderKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ProviderKind::Vector => "vector",
      ProviderKind::Text => "text",
    }
  }
}

/// Why a result or duplicate candidate was surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
  SemanticMatch,
  TextMatch,
  SemanticDuplicate,
  TextDuplicate,
}

impl Reason {
  pub fn as_str(&self) -> &'static str {
    match self {
      Reason::SemanticMatch => "semantic_match",
      Reason::TextMatch => "text_match",
      Reason::SemanticDuplicate => "semantic_duplicate",
      Reason::TextDuplicate => "text_duplicate",
    }
  }
}

#[derive(Debug, Clone)]
pub struct SearchResultItem {
  pub record_id: RecordId,
  pub kind: RecordKind,
  pub score: f32,
  pub reason: Reason,
  pub provider: ProviderKind,
  /// 0-based rank, assigned by the caller after the final sort.
  pub rank: usize,
  /// Set when this result came from a text-provider fallback after the
  /// primary provider failed or declined.
  pub degraded: bool,
  pub hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DuplicateCandidate {
  pub record_id: RecordId,
  pub kind: RecordKind,
  pub score: f32,
  pub reason: Reason,
  pub provider: ProviderKind,
  pub title: String,
  pub summary: Option<String>,
}

/// Error surfaced by a search provider or the orchestrator (spec §7). Every
/// variant is carried as data, not inferred from a message string, so the
/// orchestrator's retry/fallback decision is a pure function of the value.
#[derive(Debug, thiserror::Error, Clone)]
pub enum SearchError {
  /// The provider can't serve requests right now (e.g. no usable index
  /// snapshot). The orchestrator skips remaining retries on this provider.
  #[error("provider unavailable")]
  Unavailable,
  #[error("store error: {0}")]
  Store(String),
  #[error("provider error: {0}")]
  Provider(String),
  #[error("validation error: {0}")]
  Validation(String),
  #[error("all providers failed: {0}")]
  Orchestrator(String),
}

impl SearchError {
  pub fn is_unavailable(&self) -> bool {
    matches!(self, SearchError::Unavailable)
  }
}

impl From<kb_db::DbError> for SearchError {
  fn from(err: kb_db::DbError) -> Self {
    SearchError::Store(err.to_string())
  }
}

impl From<kb_embedding::ProviderError> for SearchError {
  fn from(err: kb_embedding::ProviderError) -> Self {
    if err.is_unavailable() {
      SearchError::Unavailable
    } else {
      SearchError::Provider(err.to_string())
    }
  }
}

impl From<kb_index::IndexError> for SearchError {
  fn from(err: kb_index::IndexError) -> Self {
    SearchError::Provider(err.to_string())
  }
}

pub(crate) fn category_matches(want: Option<&Category>, got: Option<&Category>) -> bool {
  match want {
    None => true,
    Some(want) => got.is_some_and(|got| got == want),
  }
}
