//! In-process store.
//!
//! Every conditional write runs under one write lock, which gives the same
//! atomicity a database unique constraint would. Replicas sharing an
//! `Arc<MemoryStore>` behave like processes sharing a real store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LeaseStore, ResultStore, StoreResult, Versioned, WriteOutcome};
use crate::types::{Lease, ResultRecord};

#[derive(Debug, Default)]
struct State {
    leases: HashMap<String, Versioned<Lease>>,
    results: BTreeMap<String, ResultRecord>,
}

/// In-memory storage implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored result records
    pub async fn result_count(&self) -> usize {
        self.state.read().await.results.len()
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn get_lease(&self, name: &str) -> StoreResult<Option<Versioned<Lease>>> {
        Ok(self.state.read().await.leases.get(name).cloned())
    }

    async fn create_lease_if_absent(&self, lease: &Lease) -> StoreResult<WriteOutcome> {
        let mut state = self.state.write().await;
        if state.leases.contains_key(&lease.name) {
            return Ok(WriteOutcome::Conflict);
        }

        state.leases.insert(lease.name.clone(), Versioned { record: lease.clone(), version: 1 });
        Ok(WriteOutcome::Applied)
    }

    async fn compare_and_swap_lease(&self, expected_version: u64, lease: &Lease) -> StoreResult<WriteOutcome> {
        let mut state = self.state.write().await;
        match state.leases.get_mut(&lease.name) {
            Some(current) if current.version == expected_version => {
                current.record = lease.clone();
                current.version += 1;
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Conflict),
        }
    }

    async fn delete_lease_if_version(&self, name: &str, expected_version: u64) -> StoreResult<WriteOutcome> {
        let mut state = self.state.write().await;
        match state.leases.get(name) {
            Some(current) if current.version == expected_version => {
                state.leases.remove(name);
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Conflict),
        }
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> StoreResult<Vec<Versioned<Lease>>> {
        let state = self.state.read().await;
        Ok(state.leases.values().filter(|lease| lease.record.is_expired(now)).cloned().collect())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create_results_if_absent(&self, records: &[ResultRecord]) -> StoreResult<Vec<WriteOutcome>> {
        let mut state = self.state.write().await;
        let outcomes = records
            .iter()
            .map(|record| {
                let key = record.key();
                if state.results.contains_key(&key) {
                    WriteOutcome::Conflict
                } else {
                    state.results.insert(key, record.clone());
                    WriteOutcome::Applied
                }
            })
            .collect();

        Ok(outcomes)
    }

    async fn get_result(&self, key: &str) -> StoreResult<Option<ResultRecord>> {
        Ok(self.state.read().await.results.get(key).cloned())
    }

    async fn results_since(&self, cutoff: DateTime<Utc>, target: Option<&str>) -> StoreResult<Vec<ResultRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .results
            .values()
            .filter(|record| {
                record.result.observed_at >= cutoff && target.is_none_or(|t| t == record.result.target)
            })
            .cloned()
            .collect();

        records.sort_by_key(|record| record.result.observed_at);
        Ok(records)
    }

    async fn delete_results_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let doomed: Vec<String> = state
            .results
            .iter()
            .filter(|(_, record)| record.result.observed_at < cutoff)
            .map(|(key, _)| key.clone())
            .take(limit)
            .collect();

        for key in &doomed {
            state.results.remove(key);
        }

        Ok(doomed.len() as u64)
    }
}
