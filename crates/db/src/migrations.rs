//! Forward-only schema migrations, version-tracked in a `_migrations` table.

use tracing::{debug, info};

use crate::connection::{Db, Result, map_err};

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone)]
pub struct Migration {
  pub version: i64,
  pub name: &'static str,
  pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
  version: 1,
  name: "initial_schema",
  sql: r#"
    CREATE TABLE IF NOT EXISTS records (
      id TEXT NOT NULL,
      kind TEXT NOT NULL,
      title TEXT NOT NULL,
      body TEXT NOT NULL,
      summary TEXT,
      category_code TEXT,
      author TEXT,
      section TEXT,
      embedding_status TEXT NOT NULL DEFAULT 'pending',
      updated_at TEXT NOT NULL,
      PRIMARY KEY (id, kind)
    );

    CREATE INDEX IF NOT EXISTS idx_records_status ON records(embedding_status);
    CREATE INDEX IF NOT EXISTS idx_records_updated_at ON records(updated_at);

    CREATE TABLE IF NOT EXISTS embeddings (
      record_id TEXT NOT NULL,
      kind TEXT NOT NULL,
      model_version TEXT NOT NULL,
      vector BLOB NOT NULL,
      PRIMARY KEY (record_id, kind, model_version)
    );

    CREATE TABLE IF NOT EXISTS worker_leases (
      name TEXT PRIMARY KEY,
      owner TEXT NOT NULL,
      created_at TEXT NOT NULL,
      expires_at TEXT NOT NULL
    );
  "#,
}];

impl Db {
  pub async fn run_migrations(&self) -> Result<Vec<i64>> {
    self.ensure_migrations_table().await?;
    let current = self.current_schema_version().await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
      debug!(current, "no pending migrations");
      return Ok(Vec::new());
    }

    let mut applied = Vec::new();
    for migration in pending {
      info!(version = migration.version, name = migration.name, "applying migration");
      let mut tx = self.pool.begin().await.map_err(map_err)?;
      for statement in migration.sql.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
          continue;
        }
        sqlx::query(trimmed).execute(&mut *tx).await.map_err(map_err)?;
      }
      sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES (?, ?, datetime('now'))")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
      tx.commit().await.map_err(map_err)?;
      applied.push(migration.version);
    }
    Ok(applied)
  }

  async fn ensure_migrations_table(&self) -> Result<()> {
    sqlx::query(
      "CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY, name TEXT NOT NULL, applied_at TEXT NOT NULL)",
    )
    .execute(&self.pool)
    .await
    .map_err(map_err)?;
    Ok(())
  }

  async fn current_schema_version(&self) -> Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
      .fetch_optional(&self.pool)
      .await
      .map_err(map_err)?;
    Ok(row.map(|(v,)| v).unwrap_or(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn migrations_apply_once() {
    let db = Db::connect_in_memory().await.unwrap();
    let applied = db.run_migrations().await.unwrap();
    assert_eq!(applied, vec![1]);

    let applied_again = db.run_migrations().await.unwrap();
    assert!(applied_again.is_empty());
  }
}
