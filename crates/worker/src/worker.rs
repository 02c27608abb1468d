//! The background embedding worker (spec §4.I): a long-lived, cancellable
//! loop that brings `pending`/`failed` records to `embedded`, cooperating
//! with other processes through a database-backed lease.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use kb_core::config::WorkerConfig;
use kb_core::domain::{EmbeddingStatus, Record, RecordId, RecordKind};
use kb_db::lease::LeaseOutcome;
use kb_db::Db;
use kb_embedding::EmbeddingProvider;
use kb_index::IndexManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::retry::retry_on_busy;
use crate::stats::{BatchOutcome, WorkerStats, WorkerStatsSnapshot};

const LEASE_NAME: &str = "embedding-worker";

struct LeaseState {
  held: bool,
  next_refresh: tokio::time::Instant,
}

pub struct EmbeddingWorker {
  db: Arc<Db>,
  embedder: Arc<dyn EmbeddingProvider>,
  index: Arc<IndexManager>,
  config: WorkerConfig,
  owner: String,
  paused: AtomicBool,
  lease: Mutex<LeaseState>,
  stats: WorkerStats,
}

impl EmbeddingWorker {
  pub fn new(db: Arc<Db>, embedder: Arc<dyn EmbeddingProvider>, index: Arc<IndexManager>, config: WorkerConfig) -> Self {
    let owner = lease_owner();
    Self {
      db,
      embedder,
      index,
      config,
      owner,
      paused: AtomicBool::new(false),
      lease: Mutex::new(LeaseState { held: false, next_refresh: tokio::time::Instant::now() }),
      stats: WorkerStats::default(),
    }
  }

  pub fn pause(&self) {
    self.paused.store(true, Ordering::SeqCst);
    self.stats.set_paused(true);
    info!("embedding worker paused");
  }

  pub fn resume(&self) {
    self.paused.store(false, Ordering::SeqCst);
    info!("embedding worker resumed");
  }

  pub fn is_paused(&self) -> bool {
    self.paused.load(Ordering::SeqCst)
  }

  pub fn get_stats(&self) -> WorkerStatsSnapshot {
    self.stats.snapshot()
  }

  /// Runs until `cancel` fires, then releases the lease (if held) and returns.
  pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
    info!(poll_interval_secs = self.config.poll_interval_secs, batch_size = self.config.batch_size, "embedding worker loop started");
    self.stats.set_running(true);

    loop {
      if cancel.is_cancelled() {
        break;
      }

      if !self.ensure_lease().await {
        self.stats.set_paused(true);
        if sleep_or_cancel(Duration::from_secs(self.config.poll_interval_secs.min(2)), &cancel).await {
          break;
        }
        continue;
      }

      if self.is_paused() {
        self.stats.set_paused(true);
        if sleep_or_cancel(Duration::from_secs(1), &cancel).await {
          break;
        }
        continue;
      }
      self.stats.set_paused(false);

      let outcome = self.process_batch(&cancel).await;
      self.stats.record_batch(outcome, Utc::now());
      if outcome.processed > 0 {
        info!(processed = outcome.processed, succeeded = outcome.succeeded, failed = outcome.failed, "processed embedding batch");
      }

      if sleep_or_cancel(Duration::from_secs(self.config.poll_interval_secs), &cancel).await {
        break;
      }
    }

    self.db.release_lease(LEASE_NAME, &self.owner).await;
    self.stats.set_running(false);
    info!("embedding worker loop stopped");
  }

  /// Leader election. Refreshes at half TTL past acquisition; if the check
  /// itself errors, fails open into follower mode rather than guessing
  /// (spec §4.I: never process while unsure of leadership).
  async fn ensure_lease(&self) -> bool {
    let now = tokio::time::Instant::now();
    {
      let state = self.lease.lock().unwrap();
      if state.held && now < state.next_refresh {
        return true;
      }
    }

    let ttl = Duration::from_secs(self.config.lease_ttl_secs);
    match self.db.try_acquire_lease(LEASE_NAME, &self.owner, ttl).await {
      Ok(LeaseOutcome::Acquired(_)) => {
        let mut state = self.lease.lock().unwrap();
        state.held = true;
        state.next_refresh = now + (ttl / 2).max(Duration::from_secs(1));
        true
      }
      Ok(LeaseOutcome::Follower) => {
        self.lease.lock().unwrap().held = false;
        false
      }
      Err(err) => {
        debug!(error = %err, "lease check failed, deferring to follower mode");
        self.lease.lock().unwrap().held = false;
        false
      }
    }
  }

  /// One pass: claims up to `batch_size` pending records, falling back to
  /// the failed-records retry pass when there's no pending work. The retry
  /// pass is also reachable directly through `retry_failed_batch` so it can
  /// be forced on request rather than waiting for an idle tick.
  async fn process_batch(&self, cancel: &CancellationToken) -> BatchOutcome {
    let pending = match self.db.list_pending(None, self.config.batch_size).await {
      Ok(rows) => rows,
      Err(err) => {
        warn!(error = %err, "failed to list pending records");
        return BatchOutcome::default();
      }
    };

    if pending.is_empty() {
      return self.retry_failed_batch(cancel).await;
    }

    self.process_records(pending, cancel).await
  }

  /// Claims up to `batch_size` failed records and retries them. Unlike the
  /// implicit fallback inside `process_batch`, this is a standalone
  /// operation: callable on a schedule of its own, or on request (e.g. from
  /// the CLI), so failed records can't starve behind a steady stream of
  /// pending work.
  pub async fn retry_failed_batch(&self, cancel: &CancellationToken) -> BatchOutcome {
    let failed = match self.db.list_failed(None, self.config.batch_size).await {
      Ok(rows) => rows,
      Err(err) => {
        warn!(error = %err, "failed to list failed records for retry");
        return BatchOutcome::default();
      }
    };

    self.process_records(failed, cancel).await
  }

  async fn process_records(&self, records: Vec<Record>, cancel: &CancellationToken) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for record in records {
      if cancel.is_cancelled() {
        break;
      }
      outcome.processed += 1;
      if self.process_one(&record, cancel).await {
        outcome.succeeded += 1;
      } else {
        outcome.failed += 1;
      }
    }
    outcome
  }

  async fn process_one(&self, record: &Record, cancel: &CancellationToken) -> bool {
    let id = &record.id;
    let kind = record.kind;

    if let Err(err) = retry_on_busy(&self.config, || self.db.set_status(id, kind, EmbeddingStatus::Processing)).await {
      warn!(record_id = %id, error = %err, "failed to mark record processing");
      return false;
    }

    let text = record.embedding_source_text();
    let vector = tokio::select! {
      _ = cancel.cancelled() => {
        debug!(record_id = %id, "embedding encode cancelled by shutdown");
        return false;
      }
      result = self.embedder.encode_single(&text) => match result {
        Ok(vector) => vector,
        Err(err) => {
          warn!(record_id = %id, error = %err, "embedding encode failed");
          let _ = retry_on_busy(&self.config, || self.db.set_status(id, kind, EmbeddingStatus::Failed)).await;
          return false;
        }
      }
    };

    let embedding = kb_core::domain::Embedding { record_id: id.clone(), kind, model_version: self.index.model_version().to_string(), vector };
    if let Err(err) = retry_on_busy(&self.config, || self.db.upsert_embedding(&embedding)).await {
      warn!(record_id = %id, error = %err, "failed to persist embedding");
      return false;
    }

    if let Err(err) = retry_on_busy(&self.config, || self.db.set_status(id, kind, EmbeddingStatus::Embedded)).await {
      warn!(record_id = %id, error = %err, "failed to mark record embedded");
      return false;
    }

    if let Err(err) = self.index.add(&[(id.clone(), kind, embedding.vector.clone())]) {
      warn!(record_id = %id, error = %err, "best-effort index add failed; next rebuild will reconcile");
    }

    true
  }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
  tokio::select! {
    _ = cancel.cancelled() => true,
    _ = tokio::time::sleep(duration) => false,
  }
}

fn lease_owner() -> String {
  let host = hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "unknown-host".to_string());
  let pid = std::process::id();
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("{host}:{pid}:{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
  use super::*;
  use kb_core::domain::Category;
  use kb_embedding::ProviderError;
  use kb_index::{AnnConfig, IndexManagerConfig, SavePolicy};

  struct FixedEmbedder {
    vector: Vec<f32>,
  }

  #[async_trait::async_trait]
  impl EmbeddingProvider for FixedEmbedder {
    fn model_version(&self) -> &str {
      "v1"
    }

    fn dimension(&self) -> usize {
      self.vector.len()
    }

    async fn encode_single(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
      Ok(self.vector.clone())
    }

    async fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
      Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }
  }

  /// An embedder whose `encode_single` never resolves, to pin down the
  /// cancellation race in `process_one` deterministically.
  struct StuckEmbedder;

  #[async_trait::async_trait]
  impl EmbeddingProvider for StuckEmbedder {
    fn model_version(&self) -> &str {
      "v1"
    }

    fn dimension(&self) -> usize {
      3
    }

    async fn encode_single(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
      std::future::pending().await
    }

    async fn encode(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
      std::future::pending().await
    }
  }

  async fn db() -> Arc<Db> {
    let db = Db::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    Arc::new(db)
  }

  fn sample(id: &str) -> Record {
    Record {
      id: RecordId::new(id),
      kind: RecordKind::Experience,
      title: "Flush Redis cache on restart".to_string(),
      body: "Call FLUSHALL before boot.".to_string(),
      summary: None,
      category_code: Some(Category::from("OPS")),
      author: None,
      section: None,
      embedding_status: EmbeddingStatus::Pending,
      updated_at: Utc::now(),
    }
  }

  fn unit3() -> Vec<f32> {
    vec![1.0, 0.0, 0.0]
  }

  fn test_index_manager() -> IndexManager {
    IndexManager::new(IndexManagerConfig {
      dimension: 3,
      model_version: "v1".to_string(),
      save_policy: SavePolicy::OnShutdownOnly,
      rebuild_threshold: 5_000,
      ann: AnnConfig::default(),
    })
  }

  #[tokio::test]
  async fn processes_a_pending_record_to_embedded() {
    let db = db().await;
    db.upsert_record(&sample("E1")).await.unwrap();
    let index = Arc::new(test_index_manager());
    let embedder = Arc::new(FixedEmbedder { vector: unit3() });
    let worker = EmbeddingWorker::new(db.clone(), embedder, index, WorkerConfig::default());

    let outcome = worker.process_batch(&CancellationToken::new()).await;
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.succeeded, 1);

    let record = db.get_record(&RecordId::new("E1"), RecordKind::Experience).await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Embedded);
  }

  #[tokio::test]
  async fn retry_failed_batch_reprocesses_failed_records_on_request() {
    let db = db().await;
    let mut record = sample("E2");
    record.embedding_status = EmbeddingStatus::Failed;
    db.upsert_record(&record).await.unwrap();

    let index = Arc::new(test_index_manager());
    let embedder = Arc::new(FixedEmbedder { vector: unit3() });
    let worker = EmbeddingWorker::new(db.clone(), embedder, index, WorkerConfig::default());

    // Nothing pending, so a plain process_batch would also reach the retry
    // records, but retry_failed_batch must work standalone too.
    let outcome = worker.retry_failed_batch(&CancellationToken::new()).await;
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.succeeded, 1);

    let stored = db.get_record(&RecordId::new("E2"), RecordKind::Experience).await.unwrap().unwrap();
    assert_eq!(stored.embedding_status, EmbeddingStatus::Embedded);
  }

  #[tokio::test]
  async fn process_one_aborts_without_marking_failed_when_cancelled() {
    let db = db().await;
    db.upsert_record(&sample("E3")).await.unwrap();
    let index = Arc::new(test_index_manager());
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StuckEmbedder);
    let worker = Arc::new(EmbeddingWorker::new(db.clone(), embedder, index, WorkerConfig::default()));

    let cancel = CancellationToken::new();
    let record = db.get_record(&RecordId::new("E3"), RecordKind::Experience).await.unwrap().unwrap();

    let task_worker = worker.clone();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move { task_worker.process_one(&record, &task_cancel).await });

    // Give process_one a chance to mark the record processing and reach the
    // stuck encode call before cancelling it out from under it.
    tokio::task::yield_now().await;
    cancel.cancel();
    let ok = handle.await.unwrap();
    assert!(!ok);

    let stored = db.get_record(&RecordId::new("E3"), RecordKind::Experience).await.unwrap().unwrap();
    assert_eq!(stored.embedding_status, EmbeddingStatus::Processing);
  }

  #[tokio::test]
  async fn pause_stops_claiming_new_batches() {
    let db = db().await;
    let index = Arc::new(test_index_manager());
    let embedder = Arc::new(FixedEmbedder { vector: unit3() });
    let worker = EmbeddingWorker::new(db, embedder, index, WorkerConfig::default());

    worker.pause();
    assert!(worker.is_paused());
    worker.resume();
    assert!(!worker.is_paused());
  }

  #[tokio::test]
  async fn lease_is_acquired_and_released() {
    let db = db().await;
    let index = Arc::new(test_index_manager());
    let embedder = Arc::new(FixedEmbedder { vector: unit3() });
    let worker = EmbeddingWorker::new(db.clone(), embedder, index, WorkerConfig::default());

    assert!(worker.ensure_lease().await);
    worker.db.release_lease(LEASE_NAME, &worker.owner).await;
  }
}
