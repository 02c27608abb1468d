//! Provider registry, retry/fallback decision table, and multi-kind merge
//! (spec §4.H). This is the seam the write pipeline and CLI call through;
//! individual providers never see each other.

use std::collections::HashMap;
use std::sync::Arc;

use kb_core::config::SearchConfig;
use kb_core::{Category, RecordId, RecordKind};
use kb_db::Db;
use tracing::{debug, warn};

use crate::provider::SearchProvider;
use crate::types::{DuplicateCandidate, ProviderKind, SearchError, SearchResultItem};

pub struct SearchOutcome {
  pub items: Vec<SearchResultItem>,
  pub degraded: bool,
  pub provider: ProviderKind,
}

pub struct UnifiedSearchResult {
  pub results: Vec<SearchResultItem>,
  pub total: usize,
  pub degraded: bool,
  pub provider: ProviderKind,
  pub warnings: Vec<String>,
}

pub struct SearchOrchestrator {
  providers: HashMap<ProviderKind, Arc<dyn SearchProvider>>,
  primary: ProviderKind,
  max_retries: u32,
  fallback_enabled: bool,
  unified_buffer: usize,
  soft_threshold_vector: f32,
  soft_threshold_text: f32,
  db: Arc<Db>,
}

impl SearchOrchestrator {
  /// `text` is always registered; `vector` is registered only when the
  /// caller has one available. The primary is the config's named provider
  /// if registered, else vector-if-present, else text.
  pub fn new(text: Arc<dyn SearchProvider>, vector: Option<Arc<dyn SearchProvider>>, config: &SearchConfig, db: Arc<Db>) -> Self {
    let mut providers: HashMap<ProviderKind, Arc<dyn SearchProvider>> = HashMap::new();
    providers.insert(ProviderKind::Text, text);
    if let Some(vector) = vector {
      providers.insert(ProviderKind::Vector, vector);
    }

    let configured = match config.primary_provider {
      kb_core::config::PrimaryProvider::Vector => ProviderKind::Vector,
      kb_core::config::PrimaryProvider::Text => ProviderKind::Text,
    };
    let primary = if providers.contains_key(&configured) {
      configured
    } else if providers.contains_key(&ProviderKind::Vector) {
      ProviderKind::Vector
    } else {
      ProviderKind::Text
    };

    Self {
      providers,
      primary,
      max_retries: config.max_retries,
      fallback_enabled: config.fallback_enabled,
      unified_buffer: config.unified_buffer,
      soft_threshold_vector: config.soft_threshold_vector,
      soft_threshold_text: config.soft_threshold_text,
      db,
    }
  }

  pub fn primary(&self) -> ProviderKind {
    self.primary
  }

  async fn try_primary_then_fallback<F, Fut, T>(&self, primary_kind: ProviderKind, call: F) -> Result<(T, bool, ProviderKind), SearchError>
  where
    F: Fn(Arc<dyn SearchProvider>) -> Fut,
    Fut: std::future::Future<Output = Result<T, SearchError>>,
  {
    if let Some(primary) = self.providers.get(&primary_kind) {
      for attempt in 0..=self.max_retries {
        if !primary.is_available().await {
          debug!(provider = primary_kind.as_str(), "provider unavailable, skipping remaining retries");
          break;
        }
        match call(primary.clone()).await {
          Ok(result) => return Ok((result, false, primary_kind)),
          Err(err) if err.is_unavailable() => break,
          Err(err) => {
            warn!(provider = primary_kind.as_str(), attempt, error = %err, "search provider attempt failed");
          }
        }
      }
    }

    if self.fallback_enabled
      && primary_kind != ProviderKind::Text
      && let Some(text) = self.providers.get(&ProviderKind::Text)
    {
      return match call(text.clone()).await {
        Ok(result) => Ok((result, true, ProviderKind::Text)),
        Err(err) => Err(SearchError::Orchestrator(err.to_string())),
      };
    }

    Err(SearchError::Orchestrator(format!("provider {} unavailable and fallback exhausted", primary_kind.as_str())))
  }

  pub async fn search(
    &self,
    query: &str,
    kind: Option<RecordKind>,
    category_code: Option<&Category>,
    top_k: usize,
    provider_override: Option<ProviderKind>,
  ) -> Result<SearchOutcome, SearchError> {
    let primary_kind = provider_override.unwrap_or(self.primary);
    let (mut items, degraded, used) =
      self.try_primary_then_fallback(primary_kind, |provider| async move { provider.search(query, kind, category_code, top_k).await }).await?;

    if degraded {
      for item in &mut items {
        item.degraded = true;
      }
    }
    Ok(SearchOutcome { items, degraded, provider: used })
  }

  pub async fn find_duplicates(
    &self,
    title: &str,
    body: &str,
    kind: RecordKind,
    category_code: Option<&Category>,
    exclude_id: Option<&RecordId>,
    threshold: f32,
  ) -> Result<(Vec<DuplicateCandidate>, ProviderKind), SearchError> {
    let (candidates, _degraded, used) = self
      .try_primary_then_fallback(self.primary, |provider| async move {
        provider.find_duplicates(title, body, kind, category_code, exclude_id, threshold).await
      })
      .await?;
    Ok((candidates, used))
  }

  pub async fn rebuild_index(&self, provider: Option<ProviderKind>) -> Result<(), SearchError> {
    match provider {
      Some(kind) => match self.providers.get(&kind) {
        Some(provider) => provider.rebuild_index().await,
        None => Ok(()),
      },
      None => {
        for provider in self.providers.values() {
          provider.rebuild_index().await?;
        }
        Ok(())
      }
    }
  }

  /// `filters` is `(author, section)`; section only constrains experiences
  /// (spec §4.H — skills ignore a section filter entirely).
  pub async fn unified_search(
    &self,
    query: &str,
    kinds: &[RecordKind],
    category_code: Option<&Category>,
    limit: usize,
    offset: usize,
    min_score: Option<f32>,
    filters: (Option<&str>, Option<&str>),
  ) -> Result<UnifiedSearchResult, SearchError> {
    let (author, section) = filters;
    let per_kind_cap = limit + offset + self.unified_buffer;

    let mut merged: Vec<SearchResultItem> = Vec::new();
    let mut degraded = false;
    let mut used_provider = self.primary;
    let mut warnings = Vec::new();

    for &kind in kinds {
      let outcome = self.search(query, Some(kind), category_code, per_kind_cap, None).await?;
      if outcome.degraded {
        degraded = true;
      }
      used_provider = outcome.provider;
      merged.extend(outcome.items);
    }

    if author.is_some() || section.is_some() {
      let mut filtered = Vec::with_capacity(merged.len());
      for item in merged {
        let Ok(Some(record)) = self.db.get_record(&item.record_id, item.kind).await else { continue };
        if let Some(author) = author
          && record.author.as_deref() != Some(author)
        {
          continue;
        }
        if let Some(section) = section
          && item.kind == RecordKind::Experience
          && record.section.as_deref() != Some(section)
        {
          continue;
        }
        filtered.push(item);
      }
      merged = filtered;
    }

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for (rank, item) in merged.iter_mut().enumerate() {
      item.rank = rank;
    }

    let total = merged.len();

    if let Some(min_score) = min_score {
      let before = merged.len();
      merged.retain(|item| item.score >= min_score);
      if merged.len() < before {
        warnings.push(format!("min_score_dropped={}", before - merged.len()));
      }
    }

    let soft_threshold = if used_provider == ProviderKind::Vector { self.soft_threshold_vector } else { self.soft_threshold_text };
    if let Some(top) = merged.first()
      && top.score < soft_threshold
    {
      warnings.push(format!("top_score_below_soft_threshold={soft_threshold}"));
    }

    let page: Vec<SearchResultItem> = merged.into_iter().skip(offset).take(limit).collect();

    Ok(UnifiedSearchResult { results: page, total, degraded, provider: used_provider, warnings })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::text_provider::TextProvider;
  use kb_core::{Category as Cat, EmbeddingStatus, Record};

  async fn db() -> Arc<Db> {
    let db = Db::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    Arc::new(db)
  }

  fn sample(id: &str, title: &str, author: Option<&str>) -> Record {
    Record {
      id: RecordId::new(id),
      kind: RecordKind::Experience,
      title: title.to_string(),
      body: "body text".to_string(),
      summary: None,
      category_code: Some(Cat::from("OPS")),
      author: author.map(|a| a.to_string()),
      section: None,
      embedding_status: EmbeddingStatus::Pending,
      updated_at: chrono::Utc::now(),
    }
  }

  #[tokio::test]
  async fn falls_back_to_text_when_vector_not_registered() {
    let db = db().await;
    db.upsert_record(&sample("E1", "Flush Redis cache on restart", None)).await.unwrap();
    let text = Arc::new(TextProvider::new(db.clone()));
    let config = SearchConfig::default();
    let orchestrator = SearchOrchestrator::new(text, None, &config, db);

    let outcome = orchestrator.search("redis", None, None, 10, None).await.unwrap();
    assert_eq!(outcome.provider, ProviderKind::Text);
    assert!(!outcome.items.is_empty());
  }

  #[tokio::test]
  async fn unified_search_applies_author_filter_and_ranks() {
    let db = db().await;
    db.upsert_record(&sample("E1", "Flush Redis cache on restart", Some("alice"))).await.unwrap();
    db.upsert_record(&sample("E2", "Flush Redis cache variant", Some("bob"))).await.unwrap();
    let text = Arc::new(TextProvider::new(db.clone()));
    let config = SearchConfig::default();
    let orchestrator = SearchOrchestrator::new(text, None, &config, db);

    let result = orchestrator
      .unified_search("redis", &[RecordKind::Experience], None, 10, 0, None, (Some("alice"), None))
      .await
      .unwrap();
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.results[0].record_id, RecordId::new("E1"));
    assert_eq!(result.results[0].rank, 0);
  }

  #[tokio::test]
  async fn unified_search_min_score_cutoff_warns() {
    let db = db().await;
    db.upsert_record(&sample("E1", "Flush Redis cache on restart", None)).await.unwrap();
    let text = Arc::new(TextProvider::new(db.clone()));
    let config = SearchConfig::default();
    let orchestrator = SearchOrchestrator::new(text, None, &config, db);

    let result =
      orchestrator.unified_search("redis", &[RecordKind::Experience], None, 10, 0, Some(0.9), (None, None)).await.unwrap();
    assert!(result.results.is_empty());
    assert!(result.warnings.iter().any(|w| w.starts_with("min_score_dropped")));
  }
}
