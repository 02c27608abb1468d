use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable opaque identifier for a record. Issued by the writer, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for RecordId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for RecordId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for RecordId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

/// Discriminator for the two record shapes the core understands.
///
/// The legacy `manual` alias for `skill` seen in some upstream sources is a
/// store-layer read-time normalization concern, not something this type models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
  Experience,
  Skill,
}

impl RecordKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      RecordKind::Experience => "experience",
      RecordKind::Skill => "skill",
    }
  }
}

impl std::fmt::Display for RecordKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for RecordKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "experience" => Ok(RecordKind::Experience),
      "skill" => Ok(RecordKind::Skill),
      other => Err(format!("unknown record kind: {other}")),
    }
  }
}

/// Lifecycle state of a record's embedding, driven by the background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
  Pending,
  Processing,
  Embedded,
  Failed,
}

impl EmbeddingStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      EmbeddingStatus::Pending => "pending",
      EmbeddingStatus::Processing => "processing",
      EmbeddingStatus::Embedded => "embedded",
      EmbeddingStatus::Failed => "failed",
    }
  }
}

impl std::str::FromStr for EmbeddingStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(EmbeddingStatus::Pending),
      "processing" => Ok(EmbeddingStatus::Processing),
      "embedded" => Ok(EmbeddingStatus::Embedded),
      "failed" => Ok(EmbeddingStatus::Failed),
      other => Err(format!("unknown embedding status: {other}")),
    }
  }
}

/// An opaque category code referenced by records. The core only filters and
/// groups by this value; it never interprets its structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category(pub String);

impl Category {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for Category {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// The subset of a record's attributes the search and embedding subsystem
/// reads or writes. Everything else about a record is opaque to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
  pub id: RecordId,
  pub kind: RecordKind,
  pub title: String,
  /// Playbook text for experiences; full manual body for skills.
  pub body: String,
  /// Skills only.
  pub summary: Option<String>,
  pub category_code: Option<Category>,
  /// Post-filter field for unified search (spec §4.H). Present on both kinds.
  pub author: Option<String>,
  /// Post-filter field for unified search. Experiences only; skills ignore
  /// a section filter rather than treating a missing value as a mismatch.
  pub section: Option<String>,
  pub embedding_status: EmbeddingStatus,
  pub updated_at: DateTime<Utc>,
}

impl Record {
  /// The text the embedding worker encodes for this record (spec §4.I step 2b).
  pub fn embedding_source_text(&self) -> String {
    match self.kind {
      RecordKind::Experience => format!("{}\n\n{}", self.title, self.body),
      RecordKind::Skill => {
        let mut parts = vec![self.title.clone()];
        if let Some(summary) = &self.summary {
          parts.push(summary.clone());
        }
        parts.push(self.body.clone());
        parts.join("\n\n")
      }
    }
  }

  /// The text used as the duplicate-probe query (spec §4.F `find_duplicates`).
  pub fn duplicate_probe_text(&self) -> String {
    match self.kind {
      RecordKind::Experience => format!("{} {}", self.title, self.body),
      RecordKind::Skill => self.body.clone(),
    }
  }
}

/// A unit-normalized dense vector attached to a `(record_id, kind, model_version)`
/// triple. At most one embedding exists per triple; a new one overwrites the old.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
  pub record_id: RecordId,
  pub kind: RecordKind,
  pub model_version: String,
  pub vector: Vec<f32>,
}

impl Embedding {
  pub fn norm(&self) -> f32 {
    self.vector.iter().map(|v| v * v).sum::<f32>().sqrt()
  }

  /// Whether the vector is unit-normalized within `tolerance` (spec invariant 3).
  pub fn is_unit_normalized(&self, tolerance: f32) -> bool {
    (self.norm() - 1.0).abs() <= tolerance
  }
}

/// A TTL-bounded database row granting one process the right to act as the
/// embedding worker (spec §3 "Worker lease").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLease {
  pub name: String,
  pub owner: String,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl WorkerLease {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now
  }
}
