//! regionwatch - lease-coordinated endpoint monitoring
//!
//! Several replicas of the monitoring server run the same hourly cycle. A
//! named lease held in the shared store makes sure only one of them probes
//! the targets per window, and hour-bucketed result keys make a second write
//! of the same window harmless.

pub mod clock;
pub mod coordinator;
pub mod dedup;
pub mod hub;
pub mod lease;
pub mod probe;
pub mod schedule;
pub mod store;
pub mod summary;
pub mod types;

// Re-export main types
pub use reqwest;
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{CoordinationContext, CycleCoordinator, CycleError, CycleOutcome, CycleReport, CycleSettings};
pub use dedup::{DedupStore, SaveError, SaveSummary};
pub use hub::{BroadcastHub, HubEvent, Subscription};
pub use lease::{Acquire, DenyReason, LeaseLock};
pub use probe::ProbeExecutor;
pub use schedule::Scheduler;
pub use store::{LeaseStore, MemoryStore, ResultStore, StoreError, Versioned, WriteOutcome};
pub use summary::{DailyLatency, HealthStatus, HealthSummary, TargetHealth};
pub use types::{CheckResult, Lease, OwnerId, ResultRecord, Target};

/// Lock name used by the monitoring cycle
pub const MONITORING_CYCLE_LOCK: &str = "monitoring-cycle";

/// Default lease TTL: bounds how long a crashed holder can block other replicas
pub const DEFAULT_LEASE_TTL_SECS: u64 = 10 * 60;

/// Default per-target probe timeout
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Maximum number of records committed together
pub const MAX_BATCH_SIZE: usize = 500;

/// Days of results kept before the retention purge removes them
pub const DEFAULT_RETENTION_DAYS: i64 = 7;
