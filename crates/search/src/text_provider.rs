//! Substring-matching fallback provider (spec §4.E). Always available;
//! used directly when configured as primary and automatically by the
//! orchestrator when the vector provider fails or declines.

use std::sync::Arc;

use async_trait::async_trait;
use kb_core::{Category, RecordId, RecordKind};
use kb_db::Db;

use crate::provider::SearchProvider;
use crate::types::{DuplicateCandidate, ProviderKind, Reason, SearchError, SearchResultItem};

const MAX_TOKENS: usize = 5;

pub struct TextProvider {
  db: Arc<Db>,
}

impl TextProvider {
  pub fn new(db: Arc<Db>) -> Self {
    Self { db }
  }
}

/// Split on whitespace or commas, drop empty pieces, keep at most the first
/// five tokens (spec §4.E).
fn tokenize(query: &str) -> Vec<&str> {
  query.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()).take(MAX_TOKENS).collect()
}

#[async_trait]
impl SearchProvider for TextProvider {
  fn kind(&self) -> ProviderKind {
    ProviderKind::Text
  }

  async fn is_available(&self) -> bool {
    true
  }

  async fn search(
    &self,
    query: &str,
    kind: Option<RecordKind>,
    category_code: Option<&Category>,
    top_k: usize,
  ) -> Result<Vec<SearchResultItem>, SearchError> {
    let tokens = tokenize(query);
    let mut patterns = vec![query];
    patterns.extend(tokens);

    let records = self.db.search_text(&patterns, kind, category_code, top_k).await?;

    Ok(
      records
        .into_iter()
        .enumerate()
        .map(|(rank, record)| SearchResultItem {
          record_id: record.id,
          kind: record.kind,
          score: 0.0,
          reason: Reason::TextMatch,
          provider: ProviderKind::Text,
          rank,
          degraded: true,
          hint: Some("Vector search unavailable; result generated via substring fallback.".to_string()),
        })
        .collect(),
    )
  }

  async fn find_duplicates(
    &self,
    title: &str,
    _body: &str,
    kind: RecordKind,
    category_code: Option<&Category>,
    exclude_id: Option<&RecordId>,
    _threshold: f32,
  ) -> Result<Vec<DuplicateCandidate>, SearchError> {
    let exact = self.db.find_by_exact_title(title, kind, category_code, exclude_id).await?;
    if !exact.is_empty() {
      return Ok(exact.into_iter().map(|r| to_candidate(r, 1.0)).collect());
    }

    let substring = self.db.find_by_title_substring(title, kind, category_code, exclude_id, 5).await?;
    Ok(substring.into_iter().map(|r| to_candidate(r, 0.75)).collect())
  }

  /// No separate index to rebuild; substring matching reads the store directly.
  async fn rebuild_index(&self) -> Result<(), SearchError> {
    Ok(())
  }
}

fn to_candidate(record: kb_core::Record, score: f32) -> DuplicateCandidate {
  let summary = record.summary.clone().or_else(|| Some(record.body.chars().take(200).collect()));
  DuplicateCandidate {
    record_id: record.id,
    kind: record.kind,
    score,
    reason: Reason::TextDuplicate,
    provider: ProviderKind::Text,
    title: record.title,
    summary,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use kb_core::{Category, EmbeddingStatus, Record};

  async fn db() -> Arc<Db> {
    let db = Db::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    Arc::new(db)
  }

  fn sample(id: &str, title: &str, body: &str) -> Record {
    Record {
      id: RecordId::new(id),
      kind: RecordKind::Experience,
      title: title.to_string(),
      body: body.to_string(),
      summary: None,
      category_code: Some(Category::from("OPS")),
      author: None,
      section: None,
      embedding_status: EmbeddingStatus::Pending,
      updated_at: Utc::now(),
    }
  }

  #[test]
  fn tokenize_caps_at_five_and_splits_on_commas() {
    let tokens = tokenize("one, two three,four five six seven");
    assert_eq!(tokens, vec!["one", "two", "three", "four", "five"]);
  }

  #[tokio::test]
  async fn search_marks_every_result_degraded_with_a_hint() {
    let db = db().await;
    db.upsert_record(&sample("E1", "Flush Redis cache on restart", "Call FLUSHALL before boot.")).await.unwrap();
    let provider = TextProvider::new(db);

    let results = provider.search("redis cache", None, None, 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].degraded);
    assert!(results[0].hint.is_some());
    assert_eq!(results[0].reason.as_str(), "text_match");
  }

  #[tokio::test]
  async fn find_duplicates_prefers_exact_title_match_at_full_score() {
    let db = db().await;
    db.upsert_record(&sample("E1", "Flush Redis cache on restart", "body")).await.unwrap();
    let provider = TextProvider::new(db);

    let candidates = provider.find_duplicates("Flush Redis cache on restart", "body", RecordKind::Experience, None, None, 0.60).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].score, 1.0);
  }

  #[tokio::test]
  async fn find_duplicates_falls_back_to_title_substring_at_lower_score() {
    let db = db().await;
    db.upsert_record(&sample("E1", "Flush Redis cache before every restart", "body")).await.unwrap();
    let provider = TextProvider::new(db);

    let candidates = provider.find_duplicates("Flush Redis cache", "body", RecordKind::Experience, None, None, 0.60).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].score, 0.75);
  }

  #[tokio::test]
  async fn is_always_available() {
    let db = db().await;
    let provider = TextProvider::new(db);
    assert!(provider.is_available().await);
  }
}
