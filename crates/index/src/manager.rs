//! Thread-safe facade over the ANN index: owns the mapping table, the
//! tombstone set, and the save/rebuild policy. No other component touches
//! the raw [`AnnIndex`] directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use kb_core::{Embedding, RecordId, RecordKind};
use tracing::{debug, info, warn};

use crate::ann::{AnnConfig, AnnIndex};
use crate::error::{IndexError, Result};
use crate::snapshot::{MappingEntry, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
  OnEveryMutation,
  EveryN(u64),
  OnShutdownOnly,
}

#[derive(Debug, Clone)]
pub struct IndexManagerConfig {
  pub dimension: usize,
  pub model_version: String,
  pub save_policy: SavePolicy,
  /// Unpersisted-mutation count past which a full rebuild replaces an
  /// incremental save, bounding fragmentation (spec §4.D "Save policy").
  pub rebuild_threshold: u64,
  pub ann: AnnConfig,
}

/// A point-in-time lookup result for an internal vector id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
  pub record_id: RecordId,
  pub kind: RecordKind,
  pub model_version: String,
}

/// One search hit: the resolved entity plus its cosine similarity in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct SearchHit {
  pub record_id: RecordId,
  pub kind: RecordKind,
  pub similarity: f32,
}

struct State {
  ann: AnnIndex,
  mapping: Vec<MappingEntry>,
  /// Live (non-tombstoned) internal id for a (record, kind) pair. At most one
  /// entry per key at any time, enforcing the "at most one live" invariant.
  live: HashMap<(RecordId, RecordKind), usize>,
  unpersisted_mutations: u64,
  /// Set when load() finds a missing/inconsistent snapshot; cleared by a
  /// successful rebuild_from_embeddings.
  recoverable: bool,
}

pub struct IndexManager {
  state: RwLock<State>,
  config: IndexManagerConfig,
  snapshot_path: Option<PathBuf>,
}

impl IndexManager {
  pub fn new(config: IndexManagerConfig) -> Self {
    let ann = AnnIndex::new(config.dimension, config.ann);
    Self {
      state: RwLock::new(State {
        ann,
        mapping: Vec::new(),
        live: HashMap::new(),
        unpersisted_mutations: 0,
        recoverable: false,
      }),
      config,
      snapshot_path: None,
    }
  }

  pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.snapshot_path = Some(path.into());
    self
  }

  pub fn model_version(&self) -> &str {
    &self.config.model_version
  }

  /// True if the manager is in a recoverable state (snapshot missing or
  /// inconsistent) and needs `rebuild_from_embeddings` before serving search.
  pub fn needs_rebuild(&self) -> bool {
    self.state.read().unwrap().recoverable
  }

  /// Append vectors for `(record_id, kind)` pairs. Fails the whole call if
  /// any vector has the wrong dimension or isn't unit-normalized.
  pub fn add(&self, entries: &[(RecordId, RecordKind, Vec<f32>)]) -> Result<()> {
    const NORM_TOLERANCE: f32 = 1e-3;
    for (_, _, v) in entries {
      if v.len() != self.config.dimension {
        return Err(IndexError::DimensionMismatch { expected: self.config.dimension, got: v.len() });
      }
      let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
      if (norm - 1.0).abs() > NORM_TOLERANCE {
        return Err(IndexError::NotUnitNormalized { norm, tolerance: NORM_TOLERANCE });
      }
    }

    let mut state = self.state.write().unwrap();
    let now = chrono::Utc::now();
    for (record_id, kind, vector) in entries {
      // Tombstone any existing live mapping for this (record, kind) first —
      // "writing a new one overwrites the previous" (spec §3 Embedding).
      if let Some(&old_id) = state.live.get(&(record_id.clone(), *kind)) {
        state.mapping[old_id].deleted = true;
        state.live.remove(&(record_id.clone(), *kind));
      }

      let internal_id = state.ann.push(vector.clone()).map_err(|e| match e {
        crate::ann::AnnError::DimensionMismatch { expected, got } => IndexError::DimensionMismatch { expected, got },
      })?;
      state.mapping.push(MappingEntry {
        record_id: record_id.clone(),
        kind: *kind,
        model_version: self.config.model_version.clone(),
        deleted: false,
        created_at: now,
      });
      debug_assert_eq!(state.mapping.len() - 1, internal_id);
      state.live.insert((record_id.clone(), *kind), internal_id);
      state.unpersisted_mutations += 1;
    }

    self.maybe_save_locked(&mut state);
    Ok(())
  }

  /// Search for up to `top_k` live, non-tombstoned entities nearest `query`.
  /// Requests a small headroom above `top_k` from the ANN layer to absorb
  /// tombstoned/mismatched-kind hits without a second round trip.
  pub fn search(&self, query: &[f32], top_k: usize, kind: Option<RecordKind>) -> Result<Vec<SearchHit>> {
    if query.len() != self.config.dimension {
      return Err(IndexError::DimensionMismatch { expected: self.config.dimension, got: query.len() });
    }
    if top_k == 0 {
      return Ok(Vec::new());
    }

    let state = self.state.read().unwrap();
    let headroom = top_k + top_k.min(32);
    let hits = state
      .ann
      .search(query, headroom)
      .map_err(|e| match e {
        crate::ann::AnnError::DimensionMismatch { expected, got } => IndexError::DimensionMismatch { expected, got },
      })?;

    let mut out = Vec::with_capacity(top_k);
    for hit in hits {
      let Some(entry) = state.mapping.get(hit.id) else { continue };
      if entry.deleted {
        continue;
      }
      if let Some(k) = kind
        && entry.kind != k
      {
        continue;
      }
      out.push(SearchHit { record_id: entry.record_id.clone(), kind: entry.kind, similarity: hit.similarity });
      if out.len() >= top_k {
        break;
      }
    }
    Ok(out)
  }

  /// Mark all live internal ids for `(record_id, kind)` as deleted. Idempotent.
  pub fn tombstone(&self, record_id: &RecordId, kind: RecordKind) {
    let mut state = self.state.write().unwrap();
    if let Some(id) = state.live.remove(&(record_id.clone(), kind)) {
      state.mapping[id].deleted = true;
      state.unpersisted_mutations += 1;
      self.maybe_save_locked(&mut state);
    }
  }

  pub fn get_entity(&self, internal_id: usize) -> Option<EntityRef> {
    let state = self.state.read().unwrap();
    state.mapping.get(internal_id).map(|e| EntityRef {
      record_id: e.record_id.clone(),
      kind: e.kind,
      model_version: e.model_version.clone(),
    })
  }

  pub fn len(&self) -> usize {
    self.state.read().unwrap().live.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Clears the mapping table, builds a fresh ANN structure, and re-adds
  /// every embedding matching the current model version, sorted by
  /// `(kind, record_id)` for deterministic internal-id assignment.
  pub fn rebuild_from_embeddings(&self, embeddings: impl IntoIterator<Item = Embedding>) -> Result<()> {
    let mut sorted: Vec<Embedding> =
      embeddings.into_iter().filter(|e| e.model_version == self.config.model_version).collect();
    sorted.sort_by(|a, b| (a.kind, &a.record_id).cmp(&(b.kind, &b.record_id)));

    let mut fresh_ann = AnnIndex::new(self.config.dimension, self.config.ann);
    let mut mapping = Vec::with_capacity(sorted.len());
    let mut live = HashMap::with_capacity(sorted.len());
    let now = chrono::Utc::now();

    for embedding in sorted {
      let internal_id = fresh_ann
        .push(embedding.vector)
        .map_err(|e| match e {
          crate::ann::AnnError::DimensionMismatch { expected, got } => IndexError::DimensionMismatch { expected, got },
        })?;
      mapping.push(MappingEntry {
        record_id: embedding.record_id.clone(),
        kind: embedding.kind,
        model_version: embedding.model_version,
        deleted: false,
        created_at: now,
      });
      live.insert((embedding.record_id, embedding.kind), internal_id);
    }
    fresh_ann.refresh();

    let mut state = self.state.write().unwrap();
    state.ann = fresh_ann;
    state.mapping = mapping;
    state.live = live;
    state.unpersisted_mutations = 0;
    state.recoverable = false;
    info!(entities = state.live.len(), "index rebuilt from embeddings");
    Ok(())
  }

  fn maybe_save_locked(&self, state: &mut State) {
    match self.config.save_policy {
      SavePolicy::OnEveryMutation => self.save_locked(state),
      SavePolicy::EveryN(n) => {
        if state.unpersisted_mutations >= self.config.rebuild_threshold {
          // Too much drift since the last save: rebuild is cheaper than an
          // incremental save would be at this point (spec §4.D save policy).
          warn!(
            unpersisted = state.unpersisted_mutations,
            threshold = self.config.rebuild_threshold,
            "unpersisted mutation count exceeded rebuild threshold"
          );
          state.ann.refresh();
          state.unpersisted_mutations = 0;
        } else if state.unpersisted_mutations >= n {
          self.save_locked(state);
        }
      }
      SavePolicy::OnShutdownOnly => {}
    }
  }

  fn save_locked(&self, state: &mut State) {
    state.ann.refresh();
    if let Some(path) = &self.snapshot_path
      && let Err(err) = Snapshot::write(path, &self.config.model_version, self.config.dimension, &state.mapping, &state.ann)
    {
      warn!(error = %err, "failed to persist index snapshot");
      return;
    }
    state.unpersisted_mutations = 0;
  }

  pub fn save(&self) -> Result<()> {
    let mut state = self.state.write().unwrap();
    state.ann.refresh();
    let Some(path) = &self.snapshot_path else {
      return Ok(());
    };
    Snapshot::write(path, &self.config.model_version, self.config.dimension, &state.mapping, &state.ann)?;
    state.unpersisted_mutations = 0;
    Ok(())
  }

  /// Load a persisted snapshot. If it's missing or its `model_version`/`dimension`
  /// header disagrees with the current config, enters a recoverable state
  /// rather than failing — the caller is expected to call
  /// `rebuild_from_embeddings` next (spec §4.D recovery semantics).
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    Self::load_with_config(path.as_ref(), None)
  }

  pub fn load_with_config(path: &Path, fallback_config: Option<IndexManagerConfig>) -> Result<Self> {
    match Snapshot::read(path) {
      Ok(snapshot) => {
        let config = IndexManagerConfig {
          dimension: snapshot.dimension,
          model_version: snapshot.model_version.clone(),
          save_policy: fallback_config.as_ref().map(|c| c.save_policy).unwrap_or(SavePolicy::EveryN(50)),
          rebuild_threshold: fallback_config.as_ref().map(|c| c.rebuild_threshold).unwrap_or(5_000),
          ann: fallback_config.as_ref().map(|c| c.ann).unwrap_or_default(),
        };
        let mut ann = AnnIndex::new(snapshot.dimension, config.ann);
        for vector in &snapshot.vectors {
          ann.push(vector.clone()).map_err(|e| match e {
            crate::ann::AnnError::DimensionMismatch { expected, got } => IndexError::DimensionMismatch { expected, got },
          })?;
        }
        ann.refresh();
        let live = snapshot
          .mapping
          .iter()
          .enumerate()
          .filter(|(_, m)| !m.deleted)
          .map(|(id, m)| ((m.record_id.clone(), m.kind), id))
          .collect();
        debug!(entities = snapshot.mapping.len(), "index snapshot loaded");
        Ok(Self {
          state: RwLock::new(State {
            ann,
            mapping: snapshot.mapping,
            live,
            unpersisted_mutations: 0,
            recoverable: false,
          }),
          config,
          snapshot_path: Some(path.to_path_buf()),
        })
      }
      Err(err) => {
        warn!(error = %err, path = %path.display(), "index snapshot missing or inconsistent, entering recoverable state");
        let Some(config) = fallback_config else {
          return Err(IndexError::SnapshotInconsistent);
        };
        let mut manager = Self::new(config);
        manager.snapshot_path = Some(path.to_path_buf());
        manager.state.get_mut().unwrap().recoverable = true;
        Ok(manager)
      }
    }
  }
}
