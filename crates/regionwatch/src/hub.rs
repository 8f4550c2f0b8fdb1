//! Fan-out of cycle results to live subscribers.
//!
//! The hub only holds the broadcast sender. Nothing is buffered for late
//! subscribers: they get a summary read from the store when they connect and
//! every update published after that.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::dedup::DedupStore;
use crate::store::StoreResult;
use crate::summary::HealthSummary;
use crate::types::{CheckResult, Target};

/// Updates queued per subscriber before it starts skipping
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum HubEvent {
    /// Full result list of one completed cycle
    StatusUpdate(Arc<Vec<CheckResult>>),
}

/// What a new subscriber receives
pub struct Subscription {
    /// Current state, computed at connect time
    pub greeting: HealthSummary,
    updates: broadcast::Receiver<HubEvent>,
}

impl Subscription {
    /// Wait for the next update; `None` once the hub is gone
    pub async fn next_event(&mut self) -> Option<HubEvent> {
        loop {
            match self.updates.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber fell behind, skipping updates");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<HubEvent>,
    dedup: DedupStore,
    targets: Arc<[Target]>,
    summary_window: Duration,
}

impl BroadcastHub {
    pub fn new(dedup: DedupStore, targets: Arc<[Target]>, summary_window: Duration) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, dedup, targets, summary_window }
    }

    /// Send `results` to every connected subscriber; returns how many there were
    pub fn publish(&self, results: Vec<CheckResult>) -> usize {
        let count = results.len();
        match self.sender.send(HubEvent::StatusUpdate(Arc::new(results))) {
            Ok(receivers) => {
                debug!(receivers, results = count, "Published status update");
                receivers
            }
            Err(_) => {
                debug!("No subscribers connected, status update dropped");
                0
            }
        }
    }

    /// Register a subscriber and read its greeting summary from the store
    pub async fn subscribe(&self, now: DateTime<Utc>) -> StoreResult<Subscription> {
        // Subscribe first so nothing published while the summary loads is missed
        let updates = self.sender.subscribe();
        let greeting = self.summary(now).await?;
        Ok(Subscription { greeting, updates })
    }

    /// Latest status of every configured target within the summary window
    pub async fn summary(&self, now: DateTime<Utc>) -> StoreResult<HealthSummary> {
        let window = TimeDelta::from_std(self.summary_window).unwrap_or(TimeDelta::hours(1));
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let latest = self.dedup.latest_per_target(cutoff).await?;
        Ok(HealthSummary::build(&self.targets, &latest, now))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
