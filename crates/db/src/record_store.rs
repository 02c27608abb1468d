//! Record and embedding persistence: the "Record store" external collaborator
//! named in spec §6, backed by SQLite so busy/locked is a real error class.

use kb_core::domain::{Category, Embedding, EmbeddingStatus, Record, RecordId, RecordKind};
use sqlx::Row;

use crate::connection::{Db, DbError, Result, map_err};

#[derive(sqlx::FromRow)]
struct RecordRow {
  id: String,
  kind: String,
  title: String,
  body: String,
  summary: Option<String>,
  category_code: Option<String>,
  author: Option<String>,
  section: Option<String>,
  embedding_status: String,
  updated_at: String,
}

impl TryFrom<RecordRow> for Record {
  type Error = DbError;

  fn try_from(row: RecordRow) -> std::result::Result<Self, Self::Error> {
    let kind: RecordKind = row.kind.parse().map_err(DbError::NotFound)?;
    let embedding_status: EmbeddingStatus = row.embedding_status.parse().map_err(DbError::NotFound)?;
    let updated_at = chrono::DateTime::parse_from_rfc3339(&row.updated_at)
      .map_err(|e| DbError::NotFound(e.to_string()))?
      .with_timezone(&chrono::Utc);
    Ok(Record {
      id: RecordId::new(row.id),
      kind,
      title: row.title,
      body: row.body,
      summary: row.summary,
      category_code: row.category_code.map(|s| Category::from(s.as_str())),
      author: row.author,
      section: row.section,
      embedding_status,
      updated_at,
    })
  }
}

impl Db {
  /// Seeds or overwrites a record row. Not part of the spec's read-path
  /// surface (records are created by the write pipeline this crate doesn't
  /// own) but needed to exercise the rest of this store against real data.
  pub async fn upsert_record(&self, record: &Record) -> Result<()> {
    sqlx::query(
      "INSERT INTO records (id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
       ON CONFLICT(id, kind) DO UPDATE SET
         title = excluded.title,
         body = excluded.body,
         summary = excluded.summary,
         category_code = excluded.category_code,
         author = excluded.author,
         section = excluded.section,
         embedding_status = excluded.embedding_status,
         updated_at = excluded.updated_at",
    )
    .bind(record.id.as_str())
    .bind(record.kind.as_str())
    .bind(&record.title)
    .bind(&record.body)
    .bind(&record.summary)
    .bind(record.category_code.as_ref().map(|c| c.as_str()))
    .bind(&record.author)
    .bind(&record.section)
    .bind(record.embedding_status.as_str())
    .bind(record.updated_at.to_rfc3339())
    .execute(&self.pool)
    .await
    .map_err(map_err)?;
    Ok(())
  }

  pub async fn get_record(&self, id: &RecordId, kind: RecordKind) -> Result<Option<Record>> {
    let row: Option<RecordRow> = sqlx::query_as(
      "SELECT id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at
       FROM records WHERE id = ? AND kind = ?",
    )
    .bind(id.as_str())
    .bind(kind.as_str())
    .fetch_optional(&self.pool)
    .await
    .map_err(map_err)?;
    row.map(Record::try_from).transpose()
  }

  pub async fn list_pending(&self, kind: Option<RecordKind>, limit: usize) -> Result<Vec<Record>> {
    self.list_by_status(EmbeddingStatus::Pending, kind, limit).await
  }

  pub async fn list_failed(&self, kind: Option<RecordKind>, limit: usize) -> Result<Vec<Record>> {
    self.list_by_status(EmbeddingStatus::Failed, kind, limit).await
  }

  async fn list_by_status(&self, status: EmbeddingStatus, kind: Option<RecordKind>, limit: usize) -> Result<Vec<Record>> {
    let rows: Vec<RecordRow> = if let Some(kind) = kind {
      sqlx::query_as(
        "SELECT id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at
         FROM records WHERE embedding_status = ? AND kind = ? ORDER BY updated_at ASC LIMIT ?",
      )
      .bind(status.as_str())
      .bind(kind.as_str())
      .bind(limit as i64)
      .fetch_all(&self.pool)
      .await
      .map_err(map_err)?
    } else {
      sqlx::query_as(
        "SELECT id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at
         FROM records WHERE embedding_status = ? ORDER BY updated_at ASC LIMIT ?",
      )
      .bind(status.as_str())
      .bind(limit as i64)
      .fetch_all(&self.pool)
      .await
      .map_err(map_err)?
    };
    rows.into_iter().map(Record::try_from).collect()
  }

  pub async fn set_status(&self, id: &RecordId, kind: RecordKind, status: EmbeddingStatus) -> Result<()> {
    let result = sqlx::query("UPDATE records SET embedding_status = ? WHERE id = ? AND kind = ?")
      .bind(status.as_str())
      .bind(id.as_str())
      .bind(kind.as_str())
      .execute(&self.pool)
      .await
      .map_err(map_err)?;
    if result.rows_affected() == 0 {
      return Err(DbError::NotFound(format!("{kind}:{id}")));
    }
    Ok(())
  }

  pub async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
    let bytes = vector_to_bytes(&embedding.vector);
    sqlx::query(
      "INSERT INTO embeddings (record_id, kind, model_version, vector) VALUES (?, ?, ?, ?)
       ON CONFLICT(record_id, kind, model_version) DO UPDATE SET vector = excluded.vector",
    )
    .bind(embedding.record_id.as_str())
    .bind(embedding.kind.as_str())
    .bind(&embedding.model_version)
    .bind(bytes)
    .execute(&self.pool)
    .await
    .map_err(map_err)?;
    Ok(())
  }

  pub async fn list_embeddings(&self, model_version: &str) -> Result<Vec<Embedding>> {
    let rows = sqlx::query("SELECT record_id, kind, model_version, vector FROM embeddings WHERE model_version = ?")
      .bind(model_version)
      .fetch_all(&self.pool)
      .await
      .map_err(map_err)?;

    rows
      .into_iter()
      .map(|row| {
        let kind: RecordKind = row.get::<String, _>("kind").parse().map_err(DbError::NotFound)?;
        Ok(Embedding {
          record_id: RecordId::new(row.get::<String, _>("record_id")),
          kind,
          model_version: row.get("model_version"),
          vector: bytes_to_vector(row.get("vector")),
        })
      })
      .collect()
  }

  /// Rows where title, body, or summary contain any of `patterns` as a
  /// substring. SQLite's `LIKE` is case-insensitive for ASCII by default, so
  /// no explicit lower-casing is needed (spec §4.E text provider).
  pub async fn search_text(&self, patterns: &[&str], kind: Option<RecordKind>, category_code: Option<&Category>, limit: usize) -> Result<Vec<Record>> {
    if patterns.is_empty() {
      return Ok(Vec::new());
    }
    let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
      "SELECT id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at FROM records WHERE (",
    );
    for (i, pattern) in patterns.iter().enumerate() {
      if i > 0 {
        qb.push(" OR ");
      }
      let like = format!("%{pattern}%");
      qb.push("title LIKE ").push_bind(like.clone());
      qb.push(" OR body LIKE ").push_bind(like.clone());
      qb.push(" OR summary LIKE ").push_bind(like);
    }
    qb.push(")");
    if let Some(kind) = kind {
      qb.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(category_code) = category_code {
      qb.push(" AND category_code = ").push_bind(category_code.as_str().to_string());
    }
    qb.push(" ORDER BY updated_at DESC LIMIT ").push_bind(limit as i64);

    let rows: Vec<RecordRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(map_err)?;
    rows.into_iter().map(Record::try_from).collect()
  }

  /// Rows whose title matches `title` exactly, case-insensitively.
  pub async fn find_by_exact_title(
    &self,
    title: &str,
    kind: RecordKind,
    category_code: Option<&Category>,
    exclude_id: Option<&RecordId>,
  ) -> Result<Vec<Record>> {
    let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
      "SELECT id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at FROM records WHERE kind = ",
    );
    qb.push_bind(kind.as_str());
    qb.push(" AND title LIKE ").push_bind(title.to_string());
    if let Some(category_code) = category_code {
      qb.push(" AND category_code = ").push_bind(category_code.as_str().to_string());
    }
    if let Some(exclude_id) = exclude_id {
      qb.push(" AND id != ").push_bind(exclude_id.as_str().to_string());
    }
    let rows: Vec<RecordRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(map_err)?;
    rows.into_iter().map(Record::try_from).collect()
  }

  /// Rows whose title contains `title` as a substring, up to `limit` rows.
  pub async fn find_by_title_substring(
    &self,
    title: &str,
    kind: RecordKind,
    category_code: Option<&Category>,
    exclude_id: Option<&RecordId>,
    limit: usize,
  ) -> Result<Vec<Record>> {
    let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
      "SELECT id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at FROM records WHERE kind = ",
    );
    qb.push_bind(kind.as_str());
    qb.push(" AND title LIKE ").push_bind(format!("%{title}%"));
    if let Some(category_code) = category_code {
      qb.push(" AND category_code = ").push_bind(category_code.as_str().to_string());
    }
    if let Some(exclude_id) = exclude_id {
      qb.push(" AND id != ").push_bind(exclude_id.as_str().to_string());
    }
    qb.push(" LIMIT ").push_bind(limit as i64);
    let rows: Vec<RecordRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(map_err)?;
    rows.into_iter().map(Record::try_from).collect()
  }

  pub async fn list_by_category(&self, category_code: &Category, kind: Option<RecordKind>) -> Result<Vec<Record>> {
    let rows: Vec<RecordRow> = if let Some(kind) = kind {
      sqlx::query_as(
        "SELECT id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at
         FROM records WHERE category_code = ? AND kind = ? ORDER BY updated_at DESC",
      )
      .bind(category_code.as_str())
      .bind(kind.as_str())
      .fetch_all(&self.pool)
      .await
      .map_err(map_err)?
    } else {
      sqlx::query_as(
        "SELECT id, kind, title, body, summary, category_code, author, section, embedding_status, updated_at
         FROM records WHERE category_code = ? ORDER BY updated_at DESC",
      )
      .bind(category_code.as_str())
      .fetch_all(&self.pool)
      .await
      .map_err(map_err)?
    };
    rows.into_iter().map(Record::try_from).collect()
  }
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
  vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: Vec<u8>) -> Vec<f32> {
  bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn sample(id: &str, status: EmbeddingStatus) -> Record {
    Record {
      id: RecordId::new(id),
      kind: RecordKind::Experience,
      title: "Flush Redis cache on restart".to_string(),
      body: "Call FLUSHALL before boot.".to_string(),
      summary: None,
      category_code: Some(Category::from("OPS")),
      author: None,
      section: None,
      embedding_status: status,
      updated_at: Utc::now(),
    }
  }

  async fn db() -> Db {
    let db = Db::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    db
  }

  #[tokio::test]
  async fn round_trips_a_record() {
    let db = db().await;
    let record = sample("E1", EmbeddingStatus::Pending);
    db.upsert_record(&record).await.unwrap();

    let loaded = db.get_record(&RecordId::new("E1"), RecordKind::Experience).await.unwrap().unwrap();
    assert_eq!(loaded.title, record.title);
    assert_eq!(loaded.embedding_status, EmbeddingStatus::Pending);
  }

  #[tokio::test]
  async fn lists_pending_oldest_first() {
    let db = db().await;
    db.upsert_record(&sample("E1", EmbeddingStatus::Pending)).await.unwrap();
    db.upsert_record(&sample("E2", EmbeddingStatus::Pending)).await.unwrap();
    db.upsert_record(&sample("E3", EmbeddingStatus::Embedded)).await.unwrap();

    let pending = db.list_pending(None, 10).await.unwrap();
    assert_eq!(pending.len(), 2);
  }

  #[tokio::test]
  async fn set_status_rejects_missing_record() {
    let db = db().await;
    let err = db.set_status(&RecordId::new("missing"), RecordKind::Experience, EmbeddingStatus::Failed).await;
    assert!(matches!(err, Err(DbError::NotFound(_))));
  }

  #[tokio::test]
  async fn embedding_round_trip_preserves_float_precision() {
    let db = db().await;
    db.upsert_record(&sample("E1", EmbeddingStatus::Pending)).await.unwrap();
    let embedding =
      Embedding { record_id: RecordId::new("E1"), kind: RecordKind::Experience, model_version: "v1".to_string(), vector: vec![0.5, -0.25, 0.125] };
    db.upsert_embedding(&embedding).await.unwrap();

    let all = db.list_embeddings("v1").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].vector, vec![0.5, -0.25, 0.125]);
  }

  #[tokio::test]
  async fn search_text_matches_title_or_body_case_insensitively() {
    let db = db().await;
    db.upsert_record(&sample("E1", EmbeddingStatus::Pending)).await.unwrap();
    db.upsert_record(&sample("E2", EmbeddingStatus::Pending)).await.unwrap();

    let hits = db.search_text(&["redis"], None, None, 10).await.unwrap();
    assert_eq!(hits.len(), 2);

    let hits = db.search_text(&["FLUSHALL"], None, None, 10).await.unwrap();
    assert_eq!(hits.len(), 2);

    let hits = db.search_text(&["nonexistent-token"], None, None, 10).await.unwrap();
    assert!(hits.is_empty());
  }

  #[tokio::test]
  async fn find_by_exact_title_excludes_given_id() {
    let db = db().await;
    db.upsert_record(&sample("E1", EmbeddingStatus::Pending)).await.unwrap();

    let hits = db.find_by_exact_title("Flush Redis cache on restart", RecordKind::Experience, None, None).await.unwrap();
    assert_eq!(hits.len(), 1);

    let hits = db
      .find_by_exact_title("Flush Redis cache on restart", RecordKind::Experience, None, Some(&RecordId::new("E1")))
      .await
      .unwrap();
    assert!(hits.is_empty());
  }

  #[tokio::test]
  async fn find_by_title_substring_respects_limit() {
    let db = db().await;
    for i in 0..8 {
      let mut r = sample(&format!("E{i}"), EmbeddingStatus::Pending);
      r.title = format!("Flush Redis cache variant {i}");
      db.upsert_record(&r).await.unwrap();
    }

    let hits = db.find_by_title_substring("Flush Redis", RecordKind::Experience, None, None, 5).await.unwrap();
    assert_eq!(hits.len(), 5);
  }

  #[tokio::test]
  async fn upsert_embedding_overwrites_previous_for_same_triple() {
    let db = db().await;
    db.upsert_record(&sample("E1", EmbeddingStatus::Pending)).await.unwrap();
    db.upsert_embedding(&Embedding { record_id: RecordId::new("E1"), kind: RecordKind::Experience, model_version: "v1".to_string(), vector: vec![1.0] })
      .await
      .unwrap();
    db.upsert_embedding(&Embedding { record_id: RecordId::new("E1"), kind: RecordKind::Experience, model_version: "v1".to_string(), vector: vec![2.0] })
      .await
      .unwrap();

    let all = db.list_embeddings("v1").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].vector, vec![2.0]);
  }
}
