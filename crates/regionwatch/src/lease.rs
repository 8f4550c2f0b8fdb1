//! Named, time-bounded exclusive leases held across processes.
//!
//! Acquire never waits: it either creates the lease row, takes over an
//! expired one with a compare-and-swap against the version it read, or is
//! denied. Expiry is judged from the stored `expires_at`, so a crashed holder
//! stops blocking others once its TTL has passed without any cleanup running.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::store::{LeaseStore, StoreResult, WriteOutcome};
use crate::types::{Lease, OwnerId};

/// Result of an acquire attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    Granted(Lease),
    Denied(DenyReason),
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted(_))
    }
}

/// Why an acquire was denied. All of them are normal outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Someone holds an unexpired lease
    Held { owner_id: String, expires_at: DateTime<Utc> },
    /// The lease had expired but another process replaced it first
    TakeoverLost,
    /// The row kept changing between create and read
    Contended,
}

/// Lease lock bound to one process identity
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    owner_id: OwnerId,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>, owner_id: OwnerId) -> Self {
        Self { store, clock, owner_id }
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// Try to take the lease `name` for `ttl`
    pub async fn acquire(&self, name: &str, ttl: Duration) -> StoreResult<Acquire> {
        let now = self.clock.now();
        let lease = Lease::new(name, &self.owner_id, now, ttl);

        if self.store.create_lease_if_absent(&lease).await?.is_applied() {
            debug!(lease = name, owner_id = %self.owner_id, "Lease created");
            return Ok(Acquire::Granted(lease));
        }

        let Some(current) = self.store.get_lease(name).await? else {
            // Released between our create and read; one more create decides it
            return self.create_once(lease).await;
        };

        if !current.record.is_expired(now) {
            debug!(
                lease = name,
                holder = %current.record.owner_id,
                expires_at = %current.record.expires_at,
                "Lease held by another owner"
            );
            return Ok(Acquire::Denied(DenyReason::Held {
                owner_id: current.record.owner_id,
                expires_at: current.record.expires_at,
            }));
        }

        match self.store.compare_and_swap_lease(current.version, &lease).await? {
            WriteOutcome::Applied => {
                info!(
                    lease = name,
                    owner_id = %self.owner_id,
                    previous_owner = %current.record.owner_id,
                    expired_at = %current.record.expires_at,
                    "Took over expired lease"
                );
                Ok(Acquire::Granted(lease))
            }
            WriteOutcome::Conflict => {
                if self.store.get_lease(name).await?.is_none() {
                    // Swept between our read and the swap
                    return self.create_once(lease).await;
                }
                debug!(lease = name, "Lost takeover race for expired lease");
                Ok(Acquire::Denied(DenyReason::TakeoverLost))
            }
        }
    }

    async fn create_once(&self, lease: Lease) -> StoreResult<Acquire> {
        match self.store.create_lease_if_absent(&lease).await? {
            WriteOutcome::Applied => {
                debug!(lease = %lease.name, owner_id = %self.owner_id, "Lease created on retry");
                Ok(Acquire::Granted(lease))
            }
            WriteOutcome::Conflict => Ok(Acquire::Denied(DenyReason::Contended)),
        }
    }

    /// Release `name` if `owner_id` still holds it.
    ///
    /// Returns `false` without touching the store when another owner took the
    /// lease over (for example after this process overran the TTL).
    pub async fn release(&self, name: &str, owner_id: &OwnerId) -> StoreResult<bool> {
        let Some(current) = self.store.get_lease(name).await? else {
            debug!(lease = name, "Release of absent lease ignored");
            return Ok(false);
        };

        if !current.record.is_held_by(owner_id) {
            warn!(
                lease = name,
                owner_id = %owner_id,
                holder = %current.record.owner_id,
                "Lease was taken over before release"
            );
            return Ok(false);
        }

        let released = self.store.delete_lease_if_version(name, current.version).await?.is_applied();
        if released {
            debug!(lease = name, owner_id = %owner_id, "Lease released");
        }
        Ok(released)
    }

    /// Delete every expired lease row; returns how many were removed
    pub async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut removed = 0;

        for stale in self.store.expired_leases(now).await? {
            // The version check keeps a lease that was re-taken since the scan
            if self.store.delete_lease_if_version(&stale.record.name, stale.version).await?.is_applied() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Swept expired leases");
        }
        Ok(removed)
    }
}
