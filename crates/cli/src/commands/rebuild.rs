//! `kb rebuild-index` — force a full ANN rebuild from stored embeddings.

use anyhow::{Context, Result};
use kb_daemon::Context as KbContext;
use kb_search::ProviderKind;

pub async fn run(ctx: &KbContext, provider: Option<ProviderKind>) -> Result<()> {
  ctx.orchestrator.rebuild_index(provider).await.context("index rebuild failed")?;
  println!("index rebuilt ({} entries)", ctx.index.len());
  Ok(())
}
