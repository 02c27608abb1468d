//! On-disk persistence for the index manager: a versioned header plus the
//! mapping table and raw vectors, bincode-encoded and zstd-compressed.

use std::fs;
use std::io::Write;
use std::path::Path;

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use chrono::{DateTime, Utc};
use kb_core::{RecordId, RecordKind};
use serde::{Deserialize, Serialize};

use crate::ann::AnnIndex;
use crate::error::{IndexError, Result};

/// Bumped whenever the on-disk layout changes incompatibly. A mismatch is
/// treated the same as a missing snapshot: recoverable, not a hard error.
pub const SNAPSHOT_SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
  pub record_id: RecordId,
  pub kind: RecordKind,
  pub model_version: String,
  pub deleted: bool,
  pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotHeader {
  schema_version: u16,
  model_version: String,
  dimension: usize,
  size: usize,
  created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
  mapping: Vec<MappingEntry>,
  vectors: Vec<Vec<f32>>,
}

pub struct Snapshot {
  pub model_version: String,
  pub dimension: usize,
  pub mapping: Vec<MappingEntry>,
  pub vectors: Vec<Vec<f32>>,
}

impl Snapshot {
  pub fn write(path: &Path, model_version: &str, dimension: usize, mapping: &[MappingEntry], ann: &AnnIndex) -> Result<()> {
    let header = SnapshotHeader {
      schema_version: SNAPSHOT_SCHEMA_VERSION,
      model_version: model_version.to_string(),
      dimension,
      size: mapping.len(),
      created_at: Utc::now(),
    };
    let body = SnapshotBody { mapping: mapping.to_vec(), vectors: ann.vectors().to_vec() };

    let header_bytes = encode_to_vec(&header, standard())?;
    let body_bytes = encode_to_vec(&body, standard())?;
    let compressed_body = zstd::encode_all(&body_bytes[..], 0)?;

    let tmp_path = path.with_extension("tmp");
    {
      let mut file = fs::File::create(&tmp_path)?;
      file.write_all(&(header_bytes.len() as u64).to_le_bytes())?;
      file.write_all(&header_bytes)?;
      file.write_all(&compressed_body)?;
      file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
  }

  pub fn read(path: &Path) -> Result<Self> {
    let bytes = fs::read(path)?;
    if bytes.len() < 8 {
      return Err(IndexError::SnapshotInconsistent);
    }
    let header_len = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
    if bytes.len() < 8 + header_len {
      return Err(IndexError::SnapshotInconsistent);
    }
    let (header, _): (SnapshotHeader, usize) = decode_from_slice(&bytes[8..8 + header_len], standard())?;
    if header.schema_version != SNAPSHOT_SCHEMA_VERSION {
      return Err(IndexError::SnapshotInconsistent);
    }

    let compressed_body = &bytes[8 + header_len..];
    let body_bytes = zstd::decode_all(compressed_body)?;
    let (body, _): (SnapshotBody, usize) = decode_from_slice(&body_bytes, standard())?;

    if body.mapping.len() != header.size || body.vectors.len() != header.size {
      return Err(IndexError::SnapshotInconsistent);
    }

    Ok(Snapshot { model_version: header.model_version, dimension: header.dimension, mapping: body.mapping, vectors: body.vectors })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ann::AnnConfig;
  use kb_core::RecordKind::Experience;
  use tempfile::tempdir;

  #[test]
  fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.snap");

    let mut ann = AnnIndex::new(3, AnnConfig::default());
    ann.push(vec![1.0, 0.0, 0.0]).unwrap();
    ann.refresh();

    let mapping = vec![MappingEntry {
      record_id: RecordId::new("E1"),
      kind: Experience,
      model_version: "v1".to_string(),
      deleted: false,
      created_at: Utc::now(),
    }];

    Snapshot::write(&path, "v1", 3, &mapping, &ann).unwrap();
    let loaded = Snapshot::read(&path).unwrap();

    assert_eq!(loaded.model_version, "v1");
    assert_eq!(loaded.dimension, 3);
    assert_eq!(loaded.mapping.len(), 1);
    assert_eq!(loaded.vectors, vec![vec![1.0, 0.0, 0.0]]);
  }

  #[test]
  fn missing_file_is_reported_as_inconsistent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.snap");
    assert!(Snapshot::read(&path).is_err());
  }
}
