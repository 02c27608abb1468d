//! Cumulative worker counters (spec §4.I `get_stats`), mirroring the locked
//! stats dict the original background worker exposes to its status endpoint.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct WorkerStatsSnapshot {
  pub total_processed: u64,
  pub total_succeeded: u64,
  pub total_failed: u64,
  pub last_run: Option<DateTime<Utc>>,
  pub last_batch_size: usize,
  pub is_running: bool,
  pub is_paused: bool,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
  inner: Mutex<WorkerStatsSnapshot>,
}

/// Outcome of one pass over a batch of records.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
  pub processed: usize,
  pub succeeded: usize,
  pub failed: usize,
}

impl WorkerStats {
  pub fn set_running(&self, running: bool) {
    self.inner.lock().unwrap().is_running = running;
  }

  pub fn set_paused(&self, paused: bool) {
    self.inner.lock().unwrap().is_paused = paused;
  }

  pub fn record_batch(&self, batch: BatchOutcome, now: DateTime<Utc>) {
    let mut stats = self.inner.lock().unwrap();
    stats.total_processed += batch.processed as u64;
    stats.total_succeeded += batch.succeeded as u64;
    stats.total_failed += batch.failed as u64;
    stats.last_run = Some(now);
    stats.last_batch_size = batch.processed;
  }

  pub fn snapshot(&self) -> WorkerStatsSnapshot {
    self.inner.lock().unwrap().clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn record_batch_accumulates_across_calls() {
    let stats = WorkerStats::default();
    let now = Utc::now();
    stats.record_batch(BatchOutcome { processed: 3, succeeded: 2, failed: 1 }, now);
    stats.record_batch(BatchOutcome { processed: 2, succeeded: 2, failed: 0 }, now);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total_processed, 5);
    assert_eq!(snapshot.total_succeeded, 4);
    assert_eq!(snapshot.total_failed, 1);
    assert_eq!(snapshot.last_batch_size, 2);
  }
}
