//! Typed configuration for the search and embedding subsystem.
//!
//! Every struct here derives `Deserialize` with `#[serde(default)]` so a
//! deployment can override only the fields it cares about; everything else
//! falls back to the numeric defaults named throughout the component design.

use serde::{Deserialize, Serialize};

/// Which provider the orchestrator tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryProvider {
  Vector,
  Text,
}

impl Default for PrimaryProvider {
  fn default() -> Self {
    PrimaryProvider::Vector
  }
}

/// How often the index manager persists its snapshot to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePolicy {
  OnEveryMutation,
  EveryN,
  OnShutdownOnly,
}

impl Default for SavePolicy {
  fn default() -> Self {
    SavePolicy::EveryN
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub primary_provider: PrimaryProvider,
  pub fallback_enabled: bool,
  pub max_retries: u32,
  /// Retrieval breadth `R` requested from the index manager (spec §4.F step 3).
  pub topk_retrieve: usize,
  /// Rerank fan-in bound `K` (spec §4.F step 6).
  pub topk_rerank: usize,
  /// Per-kind cap headroom added to `limit + offset` in `unified_search`.
  pub unified_buffer: usize,
  /// Soft top-score warning thresholds, vector then text (spec §4.H).
  pub soft_threshold_vector: f32,
  pub soft_threshold_text: f32,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      primary_provider: PrimaryProvider::default(),
      fallback_enabled: true,
      max_retries: 1,
      topk_retrieve: 100,
      topk_rerank: 40,
      unified_buffer: 50,
      soft_threshold_vector: 0.50,
      soft_threshold_text: 0.35,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
  pub save_policy: SavePolicy,
  pub save_every_n_mutations: u64,
  /// Unpersisted-mutation count past which a full rebuild is forced instead
  /// of another incremental save, to bound fragmentation.
  pub rebuild_threshold: u64,
  pub model_version: String,
  pub dimension: usize,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      save_policy: SavePolicy::default(),
      save_every_n_mutations: 50,
      rebuild_threshold: 5_000,
      model_version: "v1".to_string(),
      dimension: 384,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  pub lease_ttl_secs: u64,
  pub poll_interval_secs: u64,
  pub batch_size: usize,
  pub max_tokens: usize,
  pub retry_base_delay_ms: u64,
  pub retry_factor: u32,
  pub retry_max_attempts: u32,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      lease_ttl_secs: 30,
      poll_interval_secs: 5,
      batch_size: 10,
      max_tokens: 8000,
      retry_base_delay_ms: 100,
      retry_factor: 2,
      retry_max_attempts: 8,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
  pub timeout_ms: u64,
  pub retrieve_threshold: f32,
  pub recommend_threshold: f32,
}

impl Default for DuplicateConfig {
  fn default() -> Self {
    Self {
      timeout_ms: 750,
      retrieve_threshold: 0.60,
      recommend_threshold: 0.85,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub search: SearchConfig,
  pub index: IndexConfig,
  pub worker: WorkerConfig,
  pub duplicate: DuplicateConfig,
}
