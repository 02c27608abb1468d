//! Cross-process leader election via a TTL-bounded row in `worker_leases`.
//! The only cross-process synchronization primitive the background embedding
//! worker needs (spec §3 "Worker lease", §4.I lease protocol).

use chrono::{DateTime, Duration, Utc};
use kb_core::domain::WorkerLease;
use tracing::{debug, warn};

use crate::connection::{Db, Result, map_err};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
  /// This call made (or kept) `owner` the leader; `lease.expires_at` is the new expiry.
  Acquired(WorkerLease),
  /// Another live owner holds the lease.
  Follower,
}

impl Db {
  /// Attempt to acquire or renew the named lease for `owner`. Mirrors the
  /// original worker's `_ensure_lease`: insert if absent, take over if the
  /// caller already owns it or the existing row has expired, otherwise
  /// become a follower. An insert racing another process's insert is treated
  /// as losing the race, not an error.
  pub async fn try_acquire_lease(&self, name: &str, owner: &str, ttl: std::time::Duration) -> Result<LeaseOutcome> {
    let now = Utc::now();
    let expires_at = now + Duration::from_std(ttl).unwrap_or(Duration::seconds(30));

    let mut tx = self.pool.begin().await.map_err(map_err)?;

    let existing: Option<(String, String, String)> =
      sqlx::query_as("SELECT owner, created_at, expires_at FROM worker_leases WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;

    let outcome = match existing {
      None => {
        let insert = sqlx::query("INSERT INTO worker_leases (name, owner, created_at, expires_at) VALUES (?, ?, ?, ?)")
          .bind(name)
          .bind(owner)
          .bind(now.to_rfc3339())
          .bind(expires_at.to_rfc3339())
          .execute(&mut *tx)
          .await;
        match insert {
          Ok(_) => LeaseOutcome::Acquired(WorkerLease { name: name.to_string(), owner: owner.to_string(), created_at: now, expires_at }),
          Err(_) => {
            debug!(name, "lost the race to insert a new lease row");
            LeaseOutcome::Follower
          }
        }
      }
      Some((current_owner, created_at, row_expires_at)) => {
        let row_expires_at: DateTime<Utc> =
          DateTime::parse_from_rfc3339(&row_expires_at).map_err(|e| crate::connection::DbError::NotFound(e.to_string()))?.with_timezone(&Utc);
        let created_at: DateTime<Utc> =
          DateTime::parse_from_rfc3339(&created_at).map_err(|e| crate::connection::DbError::NotFound(e.to_string()))?.with_timezone(&Utc);

        if current_owner == owner || row_expires_at <= now {
          sqlx::query("UPDATE worker_leases SET owner = ?, expires_at = ? WHERE name = ?")
            .bind(owner)
            .bind(expires_at.to_rfc3339())
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
          LeaseOutcome::Acquired(WorkerLease { name: name.to_string(), owner: owner.to_string(), created_at, expires_at })
        } else {
          LeaseOutcome::Follower
        }
      }
    };

    tx.commit().await.map_err(map_err)?;
    Ok(outcome)
  }

  /// Best-effort release, only if `owner` still holds the row. Never fails
  /// the caller's shutdown path — logs and swallows any store error.
  pub async fn release_lease(&self, name: &str, owner: &str) {
    let result = sqlx::query("DELETE FROM worker_leases WHERE name = ? AND owner = ?").bind(name).bind(owner).execute(&self.pool).await;
    if let Err(err) = result {
      warn!(name, owner, error = %err, "failed to release lease row");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn db() -> Db {
    let db = Db::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    db
  }

  #[tokio::test]
  async fn first_caller_acquires_an_unclaimed_lease() {
    let db = db().await;
    let outcome = db.try_acquire_lease("embedding-worker", "host-a:1:aaaa", std::time::Duration::from_secs(30)).await.unwrap();
    assert!(matches!(outcome, LeaseOutcome::Acquired(_)));
  }

  #[tokio::test]
  async fn second_caller_becomes_follower_while_lease_is_live() {
    let db = db().await;
    db.try_acquire_lease("embedding-worker", "host-a:1:aaaa", std::time::Duration::from_secs(30)).await.unwrap();
    let outcome = db.try_acquire_lease("embedding-worker", "host-b:1:bbbb", std::time::Duration::from_secs(30)).await.unwrap();
    assert_eq!(outcome, LeaseOutcome::Follower);
  }

  #[tokio::test]
  async fn owner_can_renew_its_own_lease() {
    let db = db().await;
    db.try_acquire_lease("embedding-worker", "host-a:1:aaaa", std::time::Duration::from_secs(30)).await.unwrap();
    let outcome = db.try_acquire_lease("embedding-worker", "host-a:1:aaaa", std::time::Duration::from_secs(30)).await.unwrap();
    assert!(matches!(outcome, LeaseOutcome::Acquired(_)));
  }

  #[tokio::test]
  async fn expired_lease_can_be_taken_over() {
    let db = db().await;
    db.try_acquire_lease("embedding-worker", "host-a:1:aaaa", std::time::Duration::from_millis(0)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let outcome = db.try_acquire_lease("embedding-worker", "host-b:1:bbbb", std::time::Duration::from_secs(30)).await.unwrap();
    assert!(matches!(outcome, LeaseOutcome::Acquired(_)));
  }

  #[tokio::test]
  async fn release_only_removes_the_owners_own_row() {
    let db = db().await;
    db.try_acquire_lease("embedding-worker", "host-a:1:aaaa", std::time::Duration::from_secs(30)).await.unwrap();
    db.release_lease("embedding-worker", "host-b:1:bbbb").await;

    let outcome = db.try_acquire_lease("embedding-worker", "host-b:1:bbbb", std::time::Duration::from_secs(30)).await.unwrap();
    assert_eq!(outcome, LeaseOutcome::Follower, "host-a's row should still be live");
  }
}
