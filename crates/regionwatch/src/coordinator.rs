//! The monitoring cycle.
//!
//! `run` is the only entry point, used both by the hourly timer and by the
//! on-demand trigger. A cycle only probes when this process wins the lease;
//! losing it is the normal outcome on every replica but one.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dedup::{DedupStore, SaveError};
use crate::hub::BroadcastHub;
use crate::lease::{Acquire, DenyReason, LeaseLock};
use crate::probe::ProbeExecutor;
use crate::store::{LeaseStore, ResultStore, StoreError};
use crate::types::{CheckResult, OwnerId, Target};
use crate::{DEFAULT_LEASE_TTL_SECS, DEFAULT_PROBE_TIMEOUT_SECS, MAX_BATCH_SIZE, MONITORING_CYCLE_LOCK};

/// Tunables of the monitoring cycle
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub lock_name: String,
    pub lease_ttl: Duration,
    pub probe_timeout: Duration,
    pub targets: Arc<[Target]>,
    /// How far back the health summary looks for a target's latest result
    pub summary_window: Duration,
    pub batch_limit: usize,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            lock_name: MONITORING_CYCLE_LOCK.to_string(),
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            targets: Target::default_regions().into(),
            summary_window: Duration::from_secs(3600),
            batch_limit: MAX_BATCH_SIZE,
        }
    }
}

/// Everything a process needs to take part in coordination
#[derive(Clone)]
pub struct CoordinationContext {
    pub owner_id: OwnerId,
    pub leases: Arc<dyn LeaseStore>,
    pub results: Arc<dyn ResultStore>,
    pub clock: Arc<dyn Clock>,
    pub settings: CycleSettings,
}

/// A cycle this process ran to the end
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub results: Vec<CheckResult>,
    pub written: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another replica holds the lease
    Skipped(DenyReason),
}

impl CycleOutcome {
    /// Results of the cycle; empty when skipped
    pub fn results(&self) -> &[CheckResult] {
        match self {
            CycleOutcome::Completed(report) => &report.results,
            CycleOutcome::Skipped(_) => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to acquire cycle lease: {0}")]
    Lease(#[source] StoreError),

    /// The lease was released and the results published, but not all were stored
    #[error("cycle results were only partially persisted ({persisted} of {}): {source}", .results.len())]
    Persistence {
        results: Vec<CheckResult>,
        persisted: usize,
        #[source]
        source: SaveError,
    },
}

/// Runs monitoring cycles for one process
pub struct CycleCoordinator {
    lock: LeaseLock,
    probe: ProbeExecutor,
    dedup: DedupStore,
    hub: BroadcastHub,
    ctx: CoordinationContext,
}

impl CycleCoordinator {
    pub fn new(ctx: CoordinationContext) -> Result<Self, reqwest::Error> {
        let probe = ProbeExecutor::new(ctx.settings.probe_timeout)?;
        Ok(Self::with_probe(ctx, probe))
    }

    pub fn with_probe(ctx: CoordinationContext, probe: ProbeExecutor) -> Self {
        let lock = LeaseLock::new(ctx.leases.clone(), ctx.clock.clone(), ctx.owner_id.clone());
        let dedup =
            DedupStore::new(ctx.results.clone(), ctx.owner_id.clone()).with_batch_limit(ctx.settings.batch_limit);
        let hub = BroadcastHub::new(dedup.clone(), ctx.settings.targets.clone(), ctx.settings.summary_window);

        Self { lock, probe, dedup, hub, ctx }
    }

    pub fn lock(&self) -> &LeaseLock {
        &self.lock
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn context(&self) -> &CoordinationContext {
        &self.ctx
    }

    /// Run one cycle if this process wins the lease
    pub async fn run(&self) -> Result<CycleOutcome, CycleError> {
        let settings = &self.ctx.settings;
        let lock_name = settings.lock_name.as_str();

        match self.lock.acquire(lock_name, settings.lease_ttl).await.map_err(CycleError::Lease)? {
            Acquire::Granted(lease) => {
                info!(
                    owner_id = %self.ctx.owner_id,
                    expires_at = %lease.expires_at,
                    targets = settings.targets.len(),
                    "Starting monitoring cycle"
                );
            }
            Acquire::Denied(reason) => {
                debug!(owner_id = %self.ctx.owner_id, ?reason, "Another replica is running the monitoring cycle");
                return Ok(CycleOutcome::Skipped(reason));
            }
        }

        let results = self.probe.check_all(&settings.targets, self.ctx.clock.as_ref()).await;
        let saved = self.dedup.save_batch(&results).await;

        // Release even after a failed save; holding on would block everyone for the TTL
        match self.lock.release(lock_name, &self.ctx.owner_id).await {
            Ok(true) => {}
            Ok(false) => warn!(owner_id = %self.ctx.owner_id, "Cycle lease was no longer ours at release"),
            Err(e) => warn!(owner_id = %self.ctx.owner_id, "Failed to release cycle lease, it will expire: {e}"),
        }

        self.hub.publish(results.clone());

        match saved {
            Ok(summary) => {
                let healthy = results.iter().filter(|r| r.is_healthy).count();
                info!(
                    healthy,
                    total = results.len(),
                    written = summary.written,
                    duplicates = summary.duplicates,
                    "Monitoring cycle completed"
                );
                Ok(CycleOutcome::Completed(CycleReport {
                    results,
                    written: summary.written,
                    duplicates: summary.duplicates,
                }))
            }
            Err(source) => Err(CycleError::Persistence { results, persisted: source.summary.written, source }),
        }
    }
}
