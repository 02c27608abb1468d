//! `kb duplicate` — probe for likely-duplicate records before a write.

use anyhow::Result;
use kb_core::RecordKind;
use kb_daemon::Context as KbContext;
use kb_search::duplicate_probe;

pub async fn run(ctx: &KbContext, title: &str, body: &str, kind: RecordKind, category: Option<&str>, json_output: bool) -> Result<()> {
  let category_code = category.map(kb_core::Category::from);
  let result = duplicate_probe(&ctx.orchestrator, title, body, kind, category_code.as_ref(), None, &ctx.config.duplicate).await;

  if json_output {
    let rows: Vec<_> = result
      .candidates
      .iter()
      .map(|c| serde_json::json!({"id": c.record_id.as_str(), "score": c.score, "title": c.title}))
      .collect();
    let body = serde_json::json!({"candidates": rows, "recommendation": result.recommendation, "warnings": result.warnings});
    println!("{}", serde_json::to_string_pretty(&body)?);
    return Ok(());
  }

  if result.candidates.is_empty() {
    println!("no likely duplicates found");
  }
  for candidate in &result.candidates {
    println!("{:.3}  {:<10} {}", candidate.score, candidate.record_id.as_str(), candidate.title);
  }
  if let Some(recommendation) = result.recommendation {
    println!("recommendation: {recommendation}");
  }
  for warning in &result.warnings {
    println!("warning: {warning}");
  }
  Ok(())
}
