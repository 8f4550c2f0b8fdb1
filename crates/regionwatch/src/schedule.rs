//! Periodic loops with cooperative shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns every periodic loop of the process
pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { token: CancellationToken::new(), tasks: Vec::new() }
    }

    /// Run `task` every `period`, the first time after `initial_delay`.
    ///
    /// A tick that overruns the period delays the next one instead of
    /// queueing catch-up runs. A running tick is finished, not aborted, on
    /// shutdown.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, period: Duration, initial_delay: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(task = name, ?period, ?initial_delay, "Periodic task scheduled");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => task().await,
                }
            }

            debug!(task = name, "Periodic task stopped");
        });

        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every loop and wait for in-flight ticks to finish
    pub async fn shutdown(self) {
        self.token.cancel();

        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(task = name, "Periodic task ended abnormally: {e}");
            }
        }

        info!("All periodic tasks stopped");
    }
}
