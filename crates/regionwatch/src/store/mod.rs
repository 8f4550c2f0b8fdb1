//! Shared store abstraction.
//!
//! The lease lock and the dedup store only need a handful of conditional
//! primitives: create-if-absent, compare-and-swap on a version, and
//! conditional delete. Any backend offering those atomically (a table with a
//! unique key, a KV store with CAS) can carry the coordination state.

pub mod sql;
pub mod memory;
pub mod migrations;
pub mod pool;

pub use self::sql::LibsqlStore;
pub use self::memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Lease, ResultRecord};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(#[from] libsql::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write happened
    Applied,
    /// The precondition did not hold; nothing was written
    Conflict,
}

impl WriteOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// A stored record together with the version the store assigned to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: u64,
}

/// Lease rows, keyed by lease name
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn get_lease(&self, name: &str) -> StoreResult<Option<Versioned<Lease>>>;

    /// Insert the lease unless a row with the same name exists
    async fn create_lease_if_absent(&self, lease: &Lease) -> StoreResult<WriteOutcome>;

    /// Replace the row named `lease.name` only if it is still at `expected_version`
    async fn compare_and_swap_lease(&self, expected_version: u64, lease: &Lease) -> StoreResult<WriteOutcome>;

    /// Delete the row only if it is still at `expected_version`
    async fn delete_lease_if_version(&self, name: &str, expected_version: u64) -> StoreResult<WriteOutcome>;

    /// All leases with `expires_at < now`
    async fn expired_leases(&self, now: DateTime<Utc>) -> StoreResult<Vec<Versioned<Lease>>>;
}

/// Check result rows, keyed by `{target}_{hour_bucket}`
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert every record whose key is not taken yet, in one atomic commit.
    ///
    /// The returned outcomes line up with `records`. A taken key is a
    /// per-record `Conflict`, not a failed commit.
    async fn create_results_if_absent(&self, records: &[ResultRecord]) -> StoreResult<Vec<WriteOutcome>>;

    async fn get_result(&self, key: &str) -> StoreResult<Option<ResultRecord>>;

    /// Records observed at or after `cutoff`, oldest first
    async fn results_since(&self, cutoff: DateTime<Utc>, target: Option<&str>) -> StoreResult<Vec<ResultRecord>>;

    /// Delete at most `limit` records observed before `cutoff`
    async fn delete_results_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<u64>;
}
