//! `kb worker` — inspect or pause/resume the background embedding worker.

use anyhow::{anyhow, Result};
use kb_daemon::Context as KbContext;
use tokio_util::sync::CancellationToken;

pub fn pause(ctx: &KbContext) -> Result<()> {
  let worker = ctx.worker.as_ref().ok_or_else(|| anyhow!("no embedding provider configured, worker is not running"))?;
  worker.pause();
  println!("worker paused");
  Ok(())
}

pub fn resume(ctx: &KbContext) -> Result<()> {
  let worker = ctx.worker.as_ref().ok_or_else(|| anyhow!("no embedding provider configured, worker is not running"))?;
  worker.resume();
  println!("worker resumed");
  Ok(())
}

/// Forces a retry pass over `failed` records right now, rather than waiting
/// for the worker to hit an idle tick on its own.
pub async fn retry_failed(ctx: &KbContext) -> Result<()> {
  let worker = ctx.worker.as_ref().ok_or_else(|| anyhow!("no embedding provider configured, worker is not running"))?;
  let outcome = worker.retry_failed_batch(&CancellationToken::new()).await;
  println!("retried: {}  succeeded: {}  failed: {}", outcome.processed, outcome.succeeded, outcome.failed);
  Ok(())
}

pub fn stats(ctx: &KbContext, json_output: bool) -> Result<()> {
  let worker = ctx.worker.as_ref().ok_or_else(|| anyhow!("no embedding provider configured, worker is not running"))?;
  let snapshot = worker.get_stats();

  if json_output {
    let body = serde_json::json!({
      "total_processed": snapshot.total_processed,
      "total_succeeded": snapshot.total_succeeded,
      "total_failed": snapshot.total_failed,
      "last_run": snapshot.last_run,
      "last_batch_size": snapshot.last_batch_size,
      "is_running": snapshot.is_running,
      "is_paused": snapshot.is_paused,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    return Ok(());
  }

  println!("running: {}  paused: {}", snapshot.is_running, snapshot.is_paused);
  println!("processed: {}  succeeded: {}  failed: {}", snapshot.total_processed, snapshot.total_succeeded, snapshot.total_failed);
  if let Some(last_run) = snapshot.last_run {
    println!("last batch: {} records at {}", snapshot.last_batch_size, last_run);
  }
  Ok(())
}
