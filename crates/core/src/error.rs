use thiserror::Error;

/// Cross-crate error kinds that domain-level code needs to reason about
/// without depending on the crates that actually produce them (`kb-db`,
/// `kb-embedding`, `kb-index` all depend on this crate, not the reverse).
#[derive(Error, Debug)]
pub enum Error {
  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("validation error: {0}")]
  Validation(String),

  #[error("store error: {0}")]
  Store(String),

  #[error("embedding error: {0}")]
  Embedding(String),

  #[error("index error: {0}")]
  Index(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl Error {
  /// JSON-RPC-style error code, mirroring the convention used across the
  /// broader service taxonomy this core is part of.
  pub fn code(&self) -> i32 {
    match self {
      Error::Validation(_) => -32602,
      _ => -32000,
    }
  }

  pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
    Error::NotFound { entity, id: id.into() }
  }

  pub fn validation(msg: impl Into<String>) -> Self {
    Error::Validation(msg.into())
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Error::Internal(msg.into())
  }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_codes() {
    assert_eq!(Error::validation("bad top_k").code(), -32602);
    assert_eq!(Error::not_found("record", "E1").code(), -32000);
  }
}
