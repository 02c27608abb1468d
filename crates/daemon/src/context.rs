//! Wires the record store, ANN index, search providers and orchestrator,
//! and the background embedding worker into one shared handle. The
//! embedding and reranker model implementations are supplied by the
//! caller: this crate only has the narrow trait seams, never a concrete
//! HTTP client for a specific model vendor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kb_core::Config;
use kb_db::Db;
use kb_embedding::{EmbeddingProvider, RerankerProvider};
use kb_index::{IndexManager, IndexManagerConfig};
use kb_search::{SearchOrchestrator, TextProvider, VectorProvider};
use kb_worker::EmbeddingWorker;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ContextError {
  #[error("database error: {0}")]
  Db(#[from] kb_db::DbError),
  #[error("index error: {0}")]
  Index(#[from] kb_index::IndexError),
}

/// Everything a request handler or CLI command needs to act on one project's
/// knowledge base.
pub struct Context {
  pub db: Arc<Db>,
  pub index: Arc<IndexManager>,
  pub orchestrator: Arc<SearchOrchestrator>,
  pub worker: Option<Arc<EmbeddingWorker>>,
  pub config: Config,
}

impl Context {
  /// Opens (creating if absent) the record store at `db_path`, loads or
  /// initializes the index snapshot at `index_path`, and assembles the
  /// search providers named by `config`. `embedder` is `None` when no model
  /// is configured; the orchestrator then runs text-only, matching what the
  /// search providers already do when the vector provider is unregistered.
  pub async fn open(
    db_path: impl AsRef<Path>,
    index_path: impl Into<PathBuf>,
    config: Config,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn RerankerProvider>>,
  ) -> Result<Self, ContextError> {
    let db = Db::connect(db_path).await?;
    db.run_migrations().await?;
    let db = Arc::new(db);

    let index_path = index_path.into();
    let index_config = IndexManagerConfig {
      dimension: config.index.dimension,
      model_version: config.index.model_version.clone(),
      save_policy: map_save_policy(config.index.save_policy, config.index.save_every_n_mutations),
      rebuild_threshold: config.index.rebuild_threshold,
      ann: kb_index::AnnConfig::default(),
    };
    let index = if index_path.exists() {
      match IndexManager::load_with_config(&index_path, Some(index_config.clone())) {
        Ok(manager) => manager,
        Err(err) => {
          warn!(error = %err, "failed to load index snapshot, starting empty");
          IndexManager::new(index_config).with_snapshot_path(index_path.clone())
        }
      }
    } else {
      IndexManager::new(index_config).with_snapshot_path(index_path.clone())
    };
    let index = Arc::new(index);

    let text_provider: Arc<dyn kb_search::SearchProvider> = Arc::new(TextProvider::new(db.clone()));
    let vector_provider: Option<Arc<dyn kb_search::SearchProvider>> = embedder.clone().map(|embedder| {
      let mut provider = VectorProvider::new(embedder, index.clone(), db.clone(), config.search.topk_retrieve, config.search.topk_rerank);
      if let Some(reranker) = reranker {
        provider = provider.with_reranker(reranker);
      }
      Arc::new(provider) as Arc<dyn kb_search::SearchProvider>
    });
    if vector_provider.is_none() {
      warn!("no embedding provider configured, search runs text-only");
    }

    let orchestrator = Arc::new(SearchOrchestrator::new(text_provider, vector_provider, &config.search, db.clone()));

    let worker = embedder.map(|embedder| {
      info!("embedding worker enabled");
      Arc::new(EmbeddingWorker::new(db.clone(), embedder, index.clone(), config.worker.clone()))
    });

    Ok(Self { db, index, orchestrator, worker, config })
  }
}

fn map_save_policy(policy: kb_core::config::SavePolicy, every_n: u64) -> kb_index::SavePolicy {
  match policy {
    kb_core::config::SavePolicy::OnEveryMutation => kb_index::SavePolicy::OnEveryMutation,
    kb_core::config::SavePolicy::EveryN => kb_index::SavePolicy::EveryN(every_n),
    kb_core::config::SavePolicy::OnShutdownOnly => kb_index::SavePolicy::OnShutdownOnly,
  }
}
