use std::sync::Arc;

use chrono::{DateTime, Utc};
use regionwatch::CycleCoordinator;

/// Shared by every worker of the HTTP server
pub struct AppState {
    pub coordinator: Arc<CycleCoordinator>,
    pub started_at: DateTime<Utc>,
    pub retention_days: i64,
}

impl AppState {
    pub fn new(coordinator: Arc<CycleCoordinator>, retention_days: i64) -> Self {
        Self { coordinator, started_at: Utc::now(), retention_days }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.coordinator.context().clock.now()
    }
}
