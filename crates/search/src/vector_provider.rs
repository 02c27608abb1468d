//! Semantic search provider (spec §4.F): encode → ANN retrieval → optional
//! rerank → category filter → top-k.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kb_core::{Category, RecordId, RecordKind};
use kb_db::Db;
use kb_embedding::{EmbeddingProvider, RerankerProvider};
use kb_index::IndexManager;

use crate::parser::parse_two_phase_query;
use crate::provider::SearchProvider;
use crate::types::{DuplicateCandidate, ProviderKind, Reason, SearchError, SearchResultItem};

pub struct VectorProvider {
  embedder: Arc<dyn EmbeddingProvider>,
  reranker: Option<Arc<dyn RerankerProvider>>,
  index: Arc<IndexManager>,
  db: Arc<Db>,
  topk_retrieve: usize,
  topk_rerank: usize,
}

impl VectorProvider {
  pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<IndexManager>, db: Arc<Db>, topk_retrieve: usize, topk_rerank: usize) -> Self {
    Self { embedder, reranker: None, index, db, topk_retrieve, topk_rerank: topk_rerank.min(topk_retrieve) }
  }

  pub fn with_reranker(mut self, reranker: Arc<dyn RerankerProvider>) -> Self {
    self.reranker = Some(reranker);
    self
  }

  /// Cosine similarity in `[-1, 1]` projected onto `[0, 1]`.
  fn project_score(similarity: f32) -> f32 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
  }

  async fn rerank_text(&self, record_id: &RecordId, kind: RecordKind) -> String {
    match self.db.get_record(record_id, kind).await {
      Ok(Some(record)) => record.embedding_source_text(),
      _ => String::new(),
    }
  }
}

fn dedup_best(items: Vec<(RecordId, RecordKind, f32)>) -> Vec<(RecordId, RecordKind, f32)> {
  let mut best: HashMap<(RecordId, RecordKind), f32> = HashMap::new();
  let mut order: Vec<(RecordId, RecordKind)> = Vec::new();
  for (id, kind, score) in items {
    let key = (id.clone(), kind);
    match best.get(&key) {
      Some(&existing) if existing >= score => {}
      Some(_) => {
        best.insert(key, score);
      }
      None => {
        best.insert(key.clone(), score);
        order.push(key);
      }
    }
  }
  let mut out: Vec<(RecordId, RecordKind, f32)> = order.into_iter().map(|k| (k.0.clone(), k.1, best[&k])).collect();
  out.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
  out
}

#[async_trait]
impl SearchProvider for VectorProvider {
  fn kind(&self) -> ProviderKind {
    ProviderKind::Vector
  }

  async fn is_available(&self) -> bool {
    !self.index.needs_rebuild()
  }

  async fn search(
    &self,
    query: &str,
    kind: Option<RecordKind>,
    category_code: Option<&Category>,
    top_k: usize,
  ) -> Result<Vec<SearchResultItem>, SearchError> {
    let (search_phrase, task_context) = parse_two_phase_query(query);

    let embedding = self.embedder.encode_single(&search_phrase).await?;
    let hits = self.index.search(&embedding, self.topk_retrieve, kind)?;
    if hits.is_empty() {
      return Ok(Vec::new());
    }

    let mut candidates: Vec<(RecordId, RecordKind, f32)> =
      hits.into_iter().map(|h| (h.record_id, h.kind, Self::project_score(h.similarity))).collect();
    candidates = dedup_best(candidates);

    if let Some(reranker) = &self.reranker
      && candidates.len() > 1
    {
      let fan_in: Vec<_> = candidates.into_iter().take(self.topk_rerank).collect();
      let mut texts = Vec::with_capacity(fan_in.len());
      for (id, kind, _) in &fan_in {
        texts.push(self.rerank_text(id, *kind).await);
      }
      let text_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
      match reranker.rerank(&search_phrase, &task_context, &text_refs).await {
        Ok(scores) => {
          candidates = fan_in.into_iter().zip(scores).map(|((id, kind, _), score)| (id, kind, score)).collect();
          candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        }
        Err(_) => {
          candidates = fan_in;
        }
      }
    }

    if let Some(category_code) = category_code {
      let mut filtered = Vec::with_capacity(candidates.len());
      for (id, kind, score) in candidates {
        if let Ok(Some(record)) = self.db.get_record(&id, kind).await
          && crate::types::category_matches(Some(category_code), record.category_code.as_ref())
        {
          filtered.push((id, kind, score));
        }
      }
      candidates = filtered;
    }

    candidates = dedup_best(candidates);
    candidates.truncate(top_k);

    Ok(
      candidates
        .into_iter()
        .enumerate()
        .map(|(rank, (record_id, kind, score))| SearchResultItem {
          record_id,
          kind,
          score,
          reason: Reason::SemanticMatch,
          provider: ProviderKind::Vector,
          rank,
          degraded: false,
          hint: None,
        })
        .collect(),
    )
  }

  async fn find_duplicates(
    &self,
    title: &str,
    body: &str,
    kind: RecordKind,
    category_code: Option<&Category>,
    exclude_id: Option<&RecordId>,
    threshold: f32,
  ) -> Result<Vec<DuplicateCandidate>, SearchError> {
    let query_text = match kind {
      RecordKind::Experience => format!("{title}\n\n{body}"),
      RecordKind::Skill => body.to_string(),
    };
    let embedding = self.embedder.encode_single(&query_text).await?;
    let hits = self.index.search(&embedding, self.topk_retrieve, Some(kind))?;

    let mut candidates: Vec<(RecordId, RecordKind, f32)> = Vec::new();
    for hit in hits {
      let score = Self::project_score(hit.similarity);
      if score < threshold {
        continue;
      }
      if let Some(exclude_id) = exclude_id
        && &hit.record_id == exclude_id
      {
        continue;
      }
      candidates.push((hit.record_id, hit.kind, score));
    }
    candidates = dedup_best(candidates);

    if let Some(category_code) = category_code {
      let mut filtered = Vec::with_capacity(candidates.len());
      for (id, kind, score) in candidates {
        if let Ok(Some(record)) = self.db.get_record(&id, kind).await
          && crate::types::category_matches(Some(category_code), record.category_code.as_ref())
        {
          filtered.push((id, kind, score));
        }
      }
      candidates = filtered;
    }

    if let Some(reranker) = &self.reranker
      && candidates.len() > 1
    {
      let fan_in: Vec<_> = candidates.into_iter().take(self.topk_rerank).collect();
      let mut texts = Vec::with_capacity(fan_in.len());
      for (id, kind, _) in &fan_in {
        texts.push(self.rerank_text(id, *kind).await);
      }
      let text_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
      let task = format!("Determine if this {kind} matches the proposed content:\n{}", body.chars().take(1000).collect::<String>());
      match reranker.rerank(title, &task, &text_refs).await {
        Ok(scores) => {
          candidates = fan_in.into_iter().zip(scores).map(|((id, kind, _), score)| (id, kind, score)).collect();
          candidates = dedup_best(candidates);
        }
        Err(_) => {
          candidates = fan_in;
        }
      }
    }

    let mut out = Vec::with_capacity(candidates.len());
    for (record_id, kind, score) in candidates {
      let Ok(Some(record)) = self.db.get_record(&record_id, kind).await else { continue };
      let summary = record.summary.clone().or_else(|| Some(record.body.chars().take(200).collect()));
      out.push(DuplicateCandidate { record_id, kind, score, reason: Reason::SemanticDuplicate, provider: ProviderKind::Vector, title: record.title, summary });
    }
    Ok(out)
  }

  async fn rebuild_index(&self) -> Result<(), SearchError> {
    let embeddings = self.db.list_embeddings(self.index.model_version()).await?;
    self.index.rebuild_from_embeddings(embeddings)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn project_score_clamps_into_unit_range() {
    assert_eq!(VectorProvider::project_score(1.0), 1.0);
    assert_eq!(VectorProvider::project_score(-1.0), 0.0);
    assert!((VectorProvider::project_score(0.0) - 0.5).abs() < 1e-6);
  }

  #[test]
  fn dedup_best_keeps_highest_score_per_entity() {
    let id = RecordId::new("E1");
    let deduped = dedup_best(vec![(id.clone(), RecordKind::Experience, 0.4), (id.clone(), RecordKind::Experience, 0.9)]);
    assert_eq!(deduped.len(), 1);
    assert_eq!(deduped[0].2, 0.9);
  }
}
