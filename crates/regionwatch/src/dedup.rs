//! Dedup-safe persistence of check results.
//!
//! Every record is keyed by `{target}_{hour_bucket}` and written with a
//! create-if-absent, so a second writer for the same window (a replica that
//! briefly double-held the lease, or a manual run right after the scheduled
//! one) is absorbed as a conflict instead of producing a duplicate row.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::MAX_BATCH_SIZE;
use crate::store::{ResultStore, StoreError, StoreResult, WriteOutcome};
use crate::types::{CheckResult, OwnerId, ResultRecord};

/// Counts of one `save_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    /// Records that were newly written
    pub written: usize,
    /// Records whose key already existed
    pub duplicates: usize,
}

/// At least one chunk failed to commit
#[derive(Debug, Error)]
#[error("failed to persist check results ({} written before failure): {source}", .summary.written)]
pub struct SaveError {
    /// What the chunks that did commit achieved
    pub summary: SaveSummary,
    #[source]
    pub source: StoreError,
}

/// Result persistence bound to the owner id it stamps on records
#[derive(Clone)]
pub struct DedupStore {
    results: Arc<dyn ResultStore>,
    owner_id: OwnerId,
    batch_limit: usize,
}

impl DedupStore {
    pub fn new(results: Arc<dyn ResultStore>, owner_id: OwnerId) -> Self {
        Self { results, owner_id, batch_limit: MAX_BATCH_SIZE }
    }

    /// Lower the per-commit record cap; values above 500 are clamped
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Persist `results`, silently skipping (target, hour) pairs that exist
    pub async fn save_batch(&self, results: &[CheckResult]) -> Result<SaveSummary, SaveError> {
        let records: Vec<ResultRecord> =
            results.iter().cloned().map(|result| ResultRecord::new(result, &self.owner_id)).collect();

        let mut summary = SaveSummary::default();
        let mut first_failure = None;

        for (index, chunk) in records.chunks(self.batch_limit).enumerate() {
            match self.results.create_results_if_absent(chunk).await {
                Ok(outcomes) => {
                    for (record, outcome) in chunk.iter().zip(outcomes) {
                        match outcome {
                            WriteOutcome::Applied => summary.written += 1,
                            WriteOutcome::Conflict => {
                                debug!(key = %record.key(), "Result already recorded for this hour, skipping");
                                summary.duplicates += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(chunk = index, records = chunk.len(), "Failed to commit result chunk: {e}");
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            None => {
                debug!(written = summary.written, duplicates = summary.duplicates, "Saved check results");
                Ok(summary)
            }
            Some(source) => Err(SaveError { summary, source }),
        }
    }

    /// Results observed at or after `cutoff`, oldest first
    pub async fn get_since(&self, cutoff: DateTime<Utc>, target: Option<&str>) -> StoreResult<Vec<CheckResult>> {
        let records = self.results.results_since(cutoff, target).await?;
        Ok(records.into_iter().map(|record| record.result).collect())
    }

    /// The newest result of every target seen since `cutoff`
    pub async fn latest_per_target(&self, cutoff: DateTime<Utc>) -> StoreResult<BTreeMap<String, CheckResult>> {
        let mut latest: BTreeMap<String, CheckResult> = BTreeMap::new();

        for result in self.get_since(cutoff, None).await? {
            match latest.get(&result.target) {
                Some(current) if current.observed_at >= result.observed_at => {}
                _ => {
                    latest.insert(result.target.clone(), result);
                }
            }
        }

        Ok(latest)
    }

    /// Delete every result observed before `cutoff` in bounded batches
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut removed = 0;

        loop {
            let deleted = self.results.delete_results_before(cutoff, self.batch_limit).await?;
            removed += deleted;
            if deleted < self.batch_limit as u64 {
                break;
            }
        }

        if removed > 0 {
            info!(removed, cutoff = %cutoff, "Purged old check results");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Target;
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn result(target: &str, observed_at: DateTime<Utc>) -> CheckResult {
        let url = Url::parse(&format!("https://{target}.example.com/status")).unwrap();
        CheckResult::new(&Target::new(target, url), observed_at).responded(200, 40, None)
    }

    fn dedup(store: &Arc<MemoryStore>) -> DedupStore {
        DedupStore::new(store.clone(), OwnerId::from("p1"))
    }

    #[tokio::test]
    async fn test_identical_result_saved_twice_keeps_one_record() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(&store);
        let check = result("us-east", at(10, 15));

        let first = dedup.save_batch(&[check.clone()]).await.unwrap();
        let second = dedup.save_batch(&[check.clone()]).await.unwrap();

        assert_eq!(first, SaveSummary { written: 1, duplicates: 0 });
        assert_eq!(second, SaveSummary { written: 0, duplicates: 1 });
        assert_eq!(store.result_count().await, 1);

        let stored = store.get_result(&check.dedup_key()).await.unwrap().unwrap();
        assert_eq!(stored.result.id, check.id);
        assert_eq!(stored.owner_id, "p1");
    }

    #[tokio::test]
    async fn test_first_writer_of_an_hour_wins() {
        let store = Arc::new(MemoryStore::new());
        let first = result("eu-west", at(10, 5));
        let later = result("eu-west", at(10, 45));

        DedupStore::new(store.clone(), OwnerId::from("p1")).save_batch(&[first.clone()]).await.unwrap();
        let summary = DedupStore::new(store.clone(), OwnerId::from("p2")).save_batch(&[later]).await.unwrap();

        assert_eq!(summary.duplicates, 1);
        let stored = store.get_result(&first.dedup_key()).await.unwrap().unwrap();
        assert_eq!(stored.result.id, first.id);
        assert_eq!(stored.owner_id, "p1");
    }

    #[tokio::test]
    async fn test_large_batches_are_chunked() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(&store).with_batch_limit(3);

        let results: Vec<_> = (0..8).map(|i| result(&format!("t{i}"), at(9, 0))).collect();
        let summary = dedup.save_batch(&results).await.unwrap();

        assert_eq!(summary.written, 8);
        assert_eq!(store.result_count().await, 8);
    }

    /// Records every commit size and fails every commit after the first `healthy_commits`
    struct FlakyStore {
        inner: MemoryStore,
        healthy_commits: usize,
        commits: AtomicUsize,
        sizes: Mutex<Vec<usize>>,
    }

    impl FlakyStore {
        fn new(inner: MemoryStore, healthy_commits: usize) -> Self {
            Self { inner, healthy_commits, commits: AtomicUsize::new(0), sizes: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ResultStore for FlakyStore {
        async fn create_results_if_absent(&self, records: &[ResultRecord]) -> StoreResult<Vec<WriteOutcome>> {
            self.sizes.lock().unwrap().push(records.len());
            if self.commits.fetch_add(1, Ordering::SeqCst) >= self.healthy_commits {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.create_results_if_absent(records).await
        }

        async fn get_result(&self, key: &str) -> StoreResult<Option<ResultRecord>> {
            self.inner.get_result(key).await
        }

        async fn results_since(&self, cutoff: DateTime<Utc>, target: Option<&str>) -> StoreResult<Vec<ResultRecord>> {
            self.inner.results_since(cutoff, target).await
        }

        async fn delete_results_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<u64> {
            self.inner.delete_results_before(cutoff, limit).await
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_reports_partial_summary() {
        let inner = MemoryStore::new();
        let store = Arc::new(FlakyStore::new(inner.clone(), 1));
        let dedup = DedupStore::new(store.clone(), OwnerId::from("p1")).with_batch_limit(2);

        let results: Vec<_> = (0..4).map(|i| result(&format!("t{i}"), at(9, 0))).collect();
        let err = dedup.save_batch(&results).await.unwrap_err();

        assert_eq!(err.summary.written, 2);
        assert!(matches!(err.source, StoreError::Unavailable(_)));
        assert_eq!(inner.result_count().await, 2);
        // Both chunks were attempted
        assert_eq!(store.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_cap_commits_at_most_500_records() {
        let inner = MemoryStore::new();
        let store = Arc::new(FlakyStore::new(inner.clone(), usize::MAX));
        let results: Vec<_> = (0..1001).map(|i| result(&format!("t{i}"), at(9, 0))).collect();

        let summary = DedupStore::new(store.clone(), OwnerId::from("p1")).save_batch(&results).await.unwrap();
        assert_eq!(summary.written, 1001);
        assert_eq!(*store.sizes.lock().unwrap(), vec![500, 500, 1]);

        // A larger requested limit is clamped to the same cap
        store.sizes.lock().unwrap().clear();
        let later: Vec<_> = (0..1001).map(|i| result(&format!("t{i}"), at(10, 0))).collect();
        let summary = DedupStore::new(store.clone(), OwnerId::from("p1"))
            .with_batch_limit(1000)
            .save_batch(&later)
            .await
            .unwrap();
        assert_eq!(summary.written, 1001);
        assert_eq!(*store.sizes.lock().unwrap(), vec![500, 500, 1]);
        assert_eq!(inner.result_count().await, 2002);
    }

    #[tokio::test]
    async fn test_get_since_and_latest_per_target() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(&store);

        dedup
            .save_batch(&[
                result("us-east", at(8, 0)),
                result("us-east", at(10, 0)),
                result("eu-west", at(9, 0)),
                result("us-east", at(6, 0)),
            ])
            .await
            .unwrap();

        let since = dedup.get_since(at(7, 0), None).await.unwrap();
        let times: Vec<_> = since.iter().map(|r| r.observed_at).collect();
        assert_eq!(times, vec![at(8, 0), at(9, 0), at(10, 0)]);

        let only_east = dedup.get_since(at(7, 0), Some("us-east")).await.unwrap();
        assert_eq!(only_east.len(), 2);

        let latest = dedup.latest_per_target(at(7, 0)).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["us-east"].observed_at, at(10, 0));
        assert_eq!(latest["eu-west"].observed_at, at(9, 0));
    }

    #[tokio::test]
    async fn test_purge_before_in_batches() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(&store).with_batch_limit(2);
        let old = at(0, 0) - TimeDelta::days(8);

        let mut results: Vec<_> = (0..5).map(|i| result(&format!("old{i}"), old)).collect();
        results.push(result("fresh", at(10, 0)));
        dedup.save_batch(&results).await.unwrap();

        let removed = dedup.purge_before(at(0, 0) - TimeDelta::days(7)).await.unwrap();
        assert_eq!(removed, 5);
        assert_eq!(store.result_count().await, 1);
    }

    #[tokio::test]
    async fn test_purge_on_empty_store_is_noop() {
        let store = Arc::new(MemoryStore::new());
        assert_eq!(dedup(&store).purge_before(at(12, 0)).await.unwrap(), 0);
    }
}
