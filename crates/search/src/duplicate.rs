//! Duplicate probe (spec §4.J): a timeout-bounded call the write pipeline
//! makes before committing, never a reason to block the write itself.

use std::sync::Arc;

use kb_core::config::DuplicateConfig;
use kb_core::{Category, RecordId, RecordKind};

use crate::orchestrator::SearchOrchestrator;
use crate::types::DuplicateCandidate;

pub struct DuplicateProbeResult {
  pub candidates: Vec<DuplicateCandidate>,
  pub recommendation: Option<&'static str>,
  pub warnings: Vec<String>,
}

pub async fn duplicate_probe(
  orchestrator: &Arc<SearchOrchestrator>,
  title: &str,
  body: &str,
  kind: RecordKind,
  category_code: Option<&Category>,
  exclude_id: Option<&RecordId>,
  config: &DuplicateConfig,
) -> DuplicateProbeResult {
  let orchestrator = orchestrator.clone();
  let title = title.to_string();
  let body = body.to_string();
  let category_code = category_code.cloned();
  let exclude_id = exclude_id.cloned();
  let threshold = config.retrieve_threshold;
  let recommend_threshold = config.recommend_threshold;

  let call = orchestrator.find_duplicates(&title, &body, kind, category_code.as_ref(), exclude_id.as_ref(), threshold);

  match tokio::time::timeout(std::time::Duration::from_millis(config.timeout_ms), call).await {
    Ok(Ok((candidates, _provider))) => {
      let recommendation =
        candidates.iter().map(|c| c.score).fold(None::<f32>, |acc, s| Some(acc.map_or(s, |a| a.max(s)))).filter(|&max| max >= recommend_threshold).map(|_| "review_first");
      DuplicateProbeResult { candidates, recommendation, warnings: Vec::new() }
    }
    Ok(Err(_)) => DuplicateProbeResult { candidates: Vec::new(), recommendation: None, warnings: vec!["duplicate_check_failed=true".to_string()] },
    Err(_) => DuplicateProbeResult { candidates: Vec::new(), recommendation: None, warnings: vec!["duplicate_check_timeout=true".to_string()] },
  }
}
