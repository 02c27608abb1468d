//! Error type for the index manager.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum IndexError {
  #[error("dimension mismatch: expected {expected}, got {got}")]
  DimensionMismatch { expected: usize, got: usize },
  #[error("vector is not unit-normalized (|v| = {norm}, tolerance = {tolerance})")]
  NotUnitNormalized { norm: f32, tolerance: f32 },
  #[error("snapshot is missing or inconsistent with the mapping table, rebuild required")]
  SnapshotInconsistent,
  #[error("encode error: {0}")]
  Encode(String),
  #[error("decode error: {0}")]
  Decode(String),
  #[error("io error: {0}")]
  Io(String),
}

impl IndexError {
  /// Whether this failure is the kind the orchestrator should treat as a
  /// transient, retryable provider failure rather than a hard validation error.
  pub fn is_transient(&self) -> bool {
    matches!(self, IndexError::SnapshotInconsistent)
  }
}

impl From<bincode::error::EncodeError> for IndexError {
  fn from(e: bincode::error::EncodeError) -> Self {
    IndexError::Encode(e.to_string())
  }
}

impl From<bincode::error::DecodeError> for IndexError {
  fn from(e: bincode::error::DecodeError) -> Self {
    IndexError::Decode(e.to_string())
  }
}

impl From<std::io::Error> for IndexError {
  fn from(e: std::io::Error) -> Self {
    IndexError::Io(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, IndexError>;
