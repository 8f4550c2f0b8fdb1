//! libsql (SQLite) backed store.
//!
//! Conditional writes map onto the primary keys: creates are
//! `INSERT ... ON CONFLICT DO NOTHING` and read the affected row count, swaps
//! and deletes carry a `version = ?` predicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use url::Url;
use uuid::Uuid;

use super::migrations::run_migrations;
use super::pool::{LibsqlManager, LibsqlPool};
use super::{LeaseStore, ResultStore, StoreError, StoreResult, Versioned, WriteOutcome};
use crate::types::{CheckResult, Lease, ResultRecord};

const LEASE_COLUMNS: &str = "name, owner_id, acquired_at, expires_at, version";
const RESULT_COLUMNS: &str = "key, id, target, address, observed_at, latency_ms, status_code, is_healthy, payload, \
                              error_message, owner_id, hour_bucket";

/// LibSQL store implementation
#[derive(Clone)]
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Open (or create) the database at `path` and bring its schema up to date
    pub async fn open(path: &str, pool_size: usize) -> StoreResult<Self> {
        let database = libsql::Builder::new_local(path).build().await?;
        let pool = LibsqlPool::builder(LibsqlManager::new(database))
            .max_size(pool_size.max(1))
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self::new_from_pool(pool);
        let conn = store.get_conn().await?;
        run_migrations(&conn).await?;

        Ok(store)
    }

    /// Create a store over an existing pool; the schema must already exist
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> StoreResult<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn datetime_from_millis(key: &str, millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt { key: key.to_string(), reason: format!("timestamp {millis} out of range") })
}

fn lease_from_row(row: &Row) -> StoreResult<Versioned<Lease>> {
    let name: String = row.get(0)?;
    let acquired_at = datetime_from_millis(&name, row.get::<i64>(2)?)?;
    let expires_at = datetime_from_millis(&name, row.get::<i64>(3)?)?;

    Ok(Versioned {
        record: Lease { owner_id: row.get(1)?, acquired_at, expires_at, name },
        version: row.get::<i64>(4)? as u64,
    })
}

fn record_from_row(row: &Row) -> StoreResult<ResultRecord> {
    let key: String = row.get(0)?;
    let corrupt = |reason: String| StoreError::Corrupt { key: key.clone(), reason };

    let id_str: String = row.get(1)?;
    let address_str: String = row.get(3)?;
    let payload: Option<String> = row.get(8)?;

    let result = CheckResult {
        id: Uuid::parse_str(&id_str).map_err(|e| corrupt(format!("bad id: {e}")))?,
        target: row.get(2)?,
        address: Url::parse(&address_str).map_err(|e| corrupt(format!("bad address: {e}")))?,
        observed_at: datetime_from_millis(&key, row.get::<i64>(4)?)?,
        latency_ms: row.get::<i64>(5)? as u64,
        status_code: row.get::<i64>(6)? as u16,
        is_healthy: row.get::<i64>(7)? != 0,
        payload: payload.as_deref().map(serde_json::from_str::<serde_json::Value>).transpose()?,
        error_message: row.get(9)?,
    };

    Ok(ResultRecord { result, owner_id: row.get(10)?, hour_bucket: row.get(11)? })
}

fn outcome(rows_changed: u64) -> WriteOutcome {
    if rows_changed > 0 { WriteOutcome::Applied } else { WriteOutcome::Conflict }
}

#[async_trait]
impl LeaseStore for LibsqlStore {
    async fn get_lease(&self, name: &str) -> StoreResult<Option<Versioned<Lease>>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {LEASE_COLUMNS} FROM leases WHERE name = ?"), params![name])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(lease_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_lease_if_absent(&self, lease: &Lease) -> StoreResult<WriteOutcome> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "INSERT INTO leases (name, owner_id, acquired_at, expires_at, version) VALUES (?, ?, ?, ?, 1) \
                 ON CONFLICT(name) DO NOTHING",
                params![
                    lease.name.clone(),
                    lease.owner_id.clone(),
                    lease.acquired_at.timestamp_millis(),
                    lease.expires_at.timestamp_millis()
                ],
            )
            .await?;

        Ok(outcome(changed))
    }

    async fn compare_and_swap_lease(&self, expected_version: u64, lease: &Lease) -> StoreResult<WriteOutcome> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE leases SET owner_id = ?, acquired_at = ?, expires_at = ?, version = version + 1 \
                 WHERE name = ? AND version = ?",
                params![
                    lease.owner_id.clone(),
                    lease.acquired_at.timestamp_millis(),
                    lease.expires_at.timestamp_millis(),
                    lease.name.clone(),
                    expected_version as i64
                ],
            )
            .await?;

        Ok(outcome(changed))
    }

    async fn delete_lease_if_version(&self, name: &str, expected_version: u64) -> StoreResult<WriteOutcome> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute("DELETE FROM leases WHERE name = ? AND version = ?", params![name, expected_version as i64])
            .await?;

        Ok(outcome(changed))
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> StoreResult<Vec<Versioned<Lease>>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {LEASE_COLUMNS} FROM leases WHERE expires_at < ?"),
                params![now.timestamp_millis()],
            )
            .await?;

        let mut leases = Vec::new();
        while let Some(row) = rows.next().await? {
            leases.push(lease_from_row(&row)?);
        }

        Ok(leases)
    }
}

#[async_trait]
impl ResultStore for LibsqlStore {
    async fn create_results_if_absent(&self, records: &[ResultRecord]) -> StoreResult<Vec<WriteOutcome>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn().await?;
        // Dropping the transaction on an early return rolls the whole batch back
        let tx = conn.transaction().await?;
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            let result = &record.result;
            let payload = result.payload.as_ref().map(serde_json::to_string).transpose()?;

            let changed = tx
                .execute(
                    &format!(
                        "INSERT INTO check_results ({RESULT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                         ON CONFLICT(key) DO NOTHING"
                    ),
                    params![
                        record.key(),
                        result.id.to_string(),
                        result.target.clone(),
                        result.address.to_string(),
                        result.observed_at.timestamp_millis(),
                        result.latency_ms as i64,
                        result.status_code as i64,
                        if result.is_healthy { 1 } else { 0 },
                        payload,
                        result.error_message.clone(),
                        record.owner_id.clone(),
                        record.hour_bucket
                    ],
                )
                .await?;

            outcomes.push(outcome(changed));
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    async fn get_result(&self, key: &str) -> StoreResult<Option<ResultRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {RESULT_COLUMNS} FROM check_results WHERE key = ?"), params![key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn results_since(&self, cutoff: DateTime<Utc>, target: Option<&str>) -> StoreResult<Vec<ResultRecord>> {
        let conn = self.get_conn().await?;
        let cutoff = cutoff.timestamp_millis();

        let mut rows = match target {
            Some(target) => {
                conn.query(
                    &format!(
                        "SELECT {RESULT_COLUMNS} FROM check_results WHERE observed_at >= ? AND target = ? \
                         ORDER BY observed_at ASC"
                    ),
                    params![cutoff, target],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {RESULT_COLUMNS} FROM check_results WHERE observed_at >= ? ORDER BY observed_at ASC"),
                    params![cutoff],
                )
                .await?
            }
        };

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(record_from_row(&row)?);
        }

        Ok(records)
    }

    async fn delete_results_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM check_results WHERE key IN \
                 (SELECT key FROM check_results WHERE observed_at < ? ORDER BY observed_at LIMIT ?)",
                params![cutoff.timestamp_millis(), limit as i64],
            )
            .await?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OwnerId, Target};
    use chrono::TimeDelta;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open_store() -> (LibsqlStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regionwatch.db");
        let store = LibsqlStore::open(&path.to_string_lossy(), 2).await.unwrap();
        (store, dir)
    }

    fn record(target: &str, at: DateTime<Utc>, owner: &str) -> ResultRecord {
        let target = Target::new(target, Url::parse("https://example.com/status").unwrap());
        let result = CheckResult::new(&target, at).responded(200, 42, Some(serde_json::json!({"ok": true})));
        ResultRecord::new(result, &OwnerId::from(owner))
    }

    #[tokio::test]
    async fn test_lease_primitives() {
        let (store, _dir) = open_store().await;
        let now = Utc::now();
        let first = Lease::new("monitoring-cycle", &OwnerId::from("p1"), now, Duration::from_secs(600));
        let second = Lease::new("monitoring-cycle", &OwnerId::from("p2"), now, Duration::from_secs(600));

        assert_eq!(store.create_lease_if_absent(&first).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(store.create_lease_if_absent(&second).await.unwrap(), WriteOutcome::Conflict);

        let held = store.get_lease("monitoring-cycle").await.unwrap().unwrap();
        assert_eq!(held.record.owner_id, "p1");
        assert_eq!(held.version, 1);
        assert_eq!(held.record.expires_at.timestamp_millis(), first.expires_at.timestamp_millis());

        assert_eq!(store.compare_and_swap_lease(3, &second).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(store.compare_and_swap_lease(1, &second).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(store.delete_lease_if_version("monitoring-cycle", 1).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(store.delete_lease_if_version("monitoring-cycle", 2).await.unwrap(), WriteOutcome::Applied);
        assert!(store.get_lease("monitoring-cycle").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_leases() {
        let (store, _dir) = open_store().await;
        let now = Utc::now();
        let stale = Lease::new("stale", &OwnerId::from("p1"), now - TimeDelta::minutes(30), Duration::from_secs(600));
        let live = Lease::new("live", &OwnerId::from("p1"), now, Duration::from_secs(600));
        store.create_lease_if_absent(&stale).await.unwrap();
        store.create_lease_if_absent(&live).await.unwrap();

        let expired = store.expired_leases(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].record.name, "stale");
    }

    #[tokio::test]
    async fn test_batch_insert_skips_taken_keys() {
        let (store, _dir) = open_store().await;
        let at = Utc::now();
        let original = record("us-east", at, "p1");
        let duplicate = record("us-east", at, "p2");
        let other = record("eu-west", at, "p2");

        let first = store.create_results_if_absent(std::slice::from_ref(&original)).await.unwrap();
        assert_eq!(first, vec![WriteOutcome::Applied]);

        let second = store.create_results_if_absent(&[duplicate, other]).await.unwrap();
        assert_eq!(second, vec![WriteOutcome::Conflict, WriteOutcome::Applied]);

        let stored = store.get_result(&original.key()).await.unwrap().unwrap();
        assert_eq!(stored.owner_id, "p1");
        assert_eq!(stored.result.id, original.result.id);
        assert_eq!(stored.result.payload, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_results_since_is_ascending_and_filtered() {
        let (store, _dir) = open_store().await;
        let now = Utc::now();
        let records = vec![
            record("us-east", now - TimeDelta::hours(1), "p1"),
            record("us-east", now - TimeDelta::hours(3), "p1"),
            record("eu-west", now - TimeDelta::hours(2), "p1"),
            record("eu-west", now - TimeDelta::hours(30), "p1"),
        ];
        store.create_results_if_absent(&records).await.unwrap();

        let all = store.results_since(now - TimeDelta::hours(24), None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].result.observed_at <= w[1].result.observed_at));

        let east = store.results_since(now - TimeDelta::hours(24), Some("us-east")).await.unwrap();
        assert_eq!(east.len(), 2);
        assert!(east.iter().all(|r| r.result.target == "us-east"));
    }

    #[tokio::test]
    async fn test_delete_before_is_bounded() {
        let (store, _dir) = open_store().await;
        let now = Utc::now();
        let records: Vec<_> = (1..=5).map(|days| record("us-east", now - TimeDelta::days(days * 2), "p1")).collect();
        store.create_results_if_absent(&records).await.unwrap();

        let cutoff = now - TimeDelta::days(3);
        assert_eq!(store.delete_results_before(cutoff, 2).await.unwrap(), 2);
        assert_eq!(store.delete_results_before(cutoff, 2).await.unwrap(), 2);
        assert_eq!(store.delete_results_before(cutoff, 2).await.unwrap(), 0);
        assert_eq!(store.results_since(now - TimeDelta::days(30), None).await.unwrap().len(), 1);
    }
}
