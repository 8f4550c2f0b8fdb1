use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use regionwatch::{CycleCoordinator, CycleOutcome, Scheduler};
use tracing::{debug, error, warn};

use crate::config::Config;

/// Register the periodic loops every replica runs
pub fn schedule(scheduler: &mut Scheduler, coordinator: &Arc<CycleCoordinator>, config: &Config) {
    let cycle = coordinator.clone();
    scheduler.spawn(
        "monitoring-cycle",
        Duration::from_secs(config.cycle.interval_secs),
        Duration::from_secs(config.cycle.initial_delay_secs),
        move || {
            let coordinator = cycle.clone();
            async move { run_cycle(&coordinator).await }
        },
    );

    let sweep = coordinator.clone();
    scheduler.spawn("lease-sweep", Duration::from_secs(config.maintenance.sweep_interval_secs), Duration::ZERO, move || {
        let coordinator = sweep.clone();
        async move {
            if let Err(e) = coordinator.lock().sweep_expired().await {
                warn!("Lease sweep failed: {e}");
            }
        }
    });

    let purge = coordinator.clone();
    let retention = TimeDelta::days(config.maintenance.retention_days);
    scheduler.spawn(
        "retention-purge",
        Duration::from_secs(config.maintenance.purge_interval_secs),
        Duration::ZERO,
        move || {
            let coordinator = purge.clone();
            async move {
                let cutoff = coordinator.context().clock.now() - retention;
                if let Err(e) = coordinator.dedup().purge_before(cutoff).await {
                    warn!("Retention purge failed: {e}");
                }
            }
        },
    );
}

async fn run_cycle(coordinator: &CycleCoordinator) {
    match coordinator.run().await {
        Ok(CycleOutcome::Completed(_)) => {}
        Ok(CycleOutcome::Skipped(reason)) => debug!(?reason, "Scheduled cycle skipped"),
        Err(e) => error!("Scheduled monitoring cycle failed: {e}"),
    }
}
