//! Store-commit retry with exponential backoff (spec §4.I step 3): every
//! commit that touches the record store is retried on busy/locked, other
//! errors abort the record outright.

use std::future::Future;
use std::time::Duration;

use kb_core::config::WorkerConfig;
use kb_db::DbError;
use tracing::debug;

fn backoff_for_attempt(config: &WorkerConfig, attempt: u32) -> Duration {
  let base_ms = config.retry_base_delay_ms as f64;
  let delay_ms = base_ms * (config.retry_factor as f64).powi(attempt as i32);
  Duration::from_millis(delay_ms as u64)
}

/// Re-invokes `op` from scratch on each attempt up to `retry_max_attempts`,
/// only when the failure is `DbError::is_busy()`. Any other error aborts
/// immediately without consuming further attempts.
pub async fn retry_on_busy<T, F, Fut>(config: &WorkerConfig, mut op: F) -> Result<T, DbError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, DbError>>,
{
  let mut attempt = 0;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(err) if err.is_busy() && attempt < config.retry_max_attempts => {
        let backoff = backoff_for_attempt(config, attempt);
        debug!(attempt, ?backoff, "store busy, retrying");
        tokio::time::sleep(backoff).await;
        attempt += 1;
      }
      Err(err) => return Err(err),
    }
  }
}
