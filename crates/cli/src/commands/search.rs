//! `kb search` — unified search across experiences and skills.

use anyhow::{Context, Result};
use kb_core::RecordKind;
use kb_daemon::Context as KbContext;

#[allow(clippy::too_many_arguments)]
pub async fn run(
  ctx: &KbContext,
  query: &str,
  kinds: &[RecordKind],
  category: Option<&str>,
  author: Option<&str>,
  section: Option<&str>,
  limit: usize,
  offset: usize,
  min_score: Option<f32>,
  json_output: bool,
) -> Result<()> {
  let category_code = category.map(kb_core::Category::from);
  let result = ctx
    .orchestrator
    .unified_search(query, kinds, category_code.as_ref(), limit, offset, min_score, (author, section))
    .await
    .context("search failed")?;

  if json_output {
    let rows: Vec<_> = result
      .results
      .iter()
      .map(|item| {
        serde_json::json!({
          "id": item.record_id.as_str(),
          "kind": item.kind.to_string(),
          "score": item.score,
          "rank": item.rank,
          "reason": item.reason.as_str(),
          "degraded": item.degraded,
        })
      })
      .collect();
    let body = serde_json::json!({
      "results": rows,
      "total": result.total,
      "provider": result.provider.as_str(),
      "degraded": result.degraded,
      "warnings": result.warnings,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    return Ok(());
  }

  for item in &result.results {
    let flag = if item.degraded { " (degraded)" } else { "" };
    println!("{:>3}  {:.3}  {:<10} {}{}", item.rank, item.score, item.kind, item.record_id.as_str(), flag);
  }
  println!("-- {} of {} via {}", result.results.len(), result.total, result.provider.as_str());
  for warning in &result.warnings {
    println!("warning: {warning}");
  }
  Ok(())
}
