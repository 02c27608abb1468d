pub mod config;
pub mod domain;
pub mod error;

pub use config::Config;
pub use domain::{Category, Embedding, EmbeddingStatus, Record, RecordId, RecordKind, WorkerLease};
pub use error::{Error, Result};
