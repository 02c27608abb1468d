//! SQLite-backed record store connection. An embedded relational engine is
//! used here (not the vector-native store the rest of the lineage favors)
//! because the contract this crate implements needs a real busy/locked error
//! class, case-insensitive substring `LIKE`, and a unique-constraint-backed
//! lease row — none of which a vector database exposes at this grain.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DbError {
  #[error("database is busy or locked")]
  Busy,
  #[error("not found: {0}")]
  NotFound(String),
  #[error("sqlx error: {0}")]
  Sqlx(#[from] sqlx::Error),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl DbError {
  /// True for the transient error class the worker retries with backoff
  /// (spec §4.I step 3); request handlers surface these as retryable instead.
  pub fn is_busy(&self) -> bool {
    match self {
      DbError::Busy => true,
      DbError::Sqlx(sqlx::Error::Database(db_err)) => {
        matches!(db_err.code().as_deref(), Some("5") | Some("6")) // SQLITE_BUSY, SQLITE_LOCKED
      }
      _ => false,
    }
  }
}

pub type Result<T> = std::result::Result<T, DbError>;

fn classify(err: sqlx::Error) -> DbError {
  let db_err = DbError::Sqlx(err);
  if db_err.is_busy() { DbError::Busy } else { db_err }
}

#[derive(Clone)]
pub struct Db {
  pub pool: SqlitePool,
}

impl Db {
  pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
      .create_if_missing(true)
      .busy_timeout(std::time::Duration::from_secs(5));

    info!(path = %path.display(), "opening record store");
    let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await?;
    Ok(Self { pool })
  }

  pub async fn connect_in_memory() -> Result<Self> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
    Ok(Self { pool })
  }
}

pub(crate) fn map_err(err: sqlx::Error) -> DbError {
  classify(err)
}
