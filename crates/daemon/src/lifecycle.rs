//! Process-level wiring: owns the tokio runtime entry point, starts the
//! background embedding worker, and brings everything down cleanly on
//! SIGINT/SIGTERM. Request handling itself (the HTTP/MCP surface) lives
//! outside this crate; `Daemon` only owns what every surface shares.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kb_core::Config;
use kb_embedding::{EmbeddingProvider, RerankerProvider};
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{Context, ContextError};

#[derive(Error, Debug)]
pub enum DaemonError {
  #[error("context error: {0}")]
  Context(#[from] ContextError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Default budget `run_until_signal` gives the worker to finish its current
/// batch before the task is aborted outright.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DaemonConfig {
  pub db_path: PathBuf,
  pub index_path: PathBuf,
  pub config: Config,
}

impl DaemonConfig {
  pub fn new(data_dir: impl Into<PathBuf>, config: Config) -> Self {
    let data_dir = data_dir.into();
    Self { db_path: data_dir.join("kb.sqlite3"), index_path: data_dir.join("kb.index"), config }
  }
}

/// Owns the shared [`Context`] and the worker task spawned over it.
pub struct Daemon {
  pub context: Arc<Context>,
  cancel: CancellationToken,
  worker_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Daemon {
  pub async fn start(
    config: DaemonConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn RerankerProvider>>,
  ) -> Result<Self, DaemonError> {
    info!(db = %config.db_path.display(), index = %config.index_path.display(), "starting embedding subsystem");
    let context = Arc::new(Context::open(&config.db_path, config.index_path.clone(), config.config, embedder, reranker).await?);

    let cancel = CancellationToken::new();
    let worker_handle = context.worker.clone().map(|worker| {
      let cancel = cancel.clone();
      tokio::spawn(async move { worker.run(cancel).await })
    });

    Ok(Self { context, cancel, worker_handle })
  }

  /// Runs until SIGINT or SIGTERM arrives, then stops the worker and returns.
  pub async fn run_until_signal(&mut self) -> Result<(), DaemonError> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
      _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
      _ = sigterm.recv() => info!("received sigterm, shutting down"),
    }
    self.stop(DEFAULT_STOP_TIMEOUT).await;
    Ok(())
  }

  /// Cancels the worker loop and waits up to `timeout` for it to finish its
  /// current batch. Cancellation interrupts the loop at its sleep points and
  /// at the encoder call inside `process_one`, so a well-behaved worker
  /// should return well inside `timeout`; if it doesn't (a stuck encoder
  /// call that ignores cancellation, say), the task is aborted rather than
  /// left to hang the shutdown indefinitely.
  pub async fn stop(&mut self, timeout: Duration) {
    self.cancel.cancel();
    let Some(handle) = self.worker_handle.take() else {
      return;
    };

    let abort_handle = handle.abort_handle();
    tokio::select! {
      result = handle => {
        if let Err(err) = result {
          warn!(error = %err, "embedding worker task panicked during shutdown");
        }
      }
      _ = tokio::time::sleep(timeout) => {
        warn!(?timeout, "embedding worker did not stop within timeout, aborting");
        abort_handle.abort();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn starts_and_shuts_down_without_an_embedder() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.index.dimension = 3;
    let mut daemon = Daemon::start(DaemonConfig::new(dir.path(), config), None, None).await.unwrap();
    assert!(daemon.worker_handle.is_none());
    daemon.stop(Duration::from_secs(1)).await;
  }

  #[tokio::test]
  async fn stop_aborts_a_worker_that_ignores_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.index.dimension = 3;
    let mut daemon = Daemon::start(DaemonConfig::new(dir.path(), config), None, None).await.unwrap();

    // No worker was started (no embedder configured), so there's nothing to
    // hang; stand in a handle that never finishes to exercise the abort path.
    let stuck = tokio::spawn(async {
      std::future::pending::<()>().await;
    });
    daemon.worker_handle = Some(stuck);

    daemon.stop(Duration::from_millis(50)).await;
    assert!(daemon.worker_handle.is_none());
  }
}
