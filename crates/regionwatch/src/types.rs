use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Width of a dedup bucket in milliseconds
pub const HOUR_MILLIS: i64 = 3_600_000;

/// Regions probed by a default deployment
const DEFAULT_REGIONS: [&str; 6] = ["us-east", "eu-west", "eu-central", "us-west", "sa-east", "ap-southeast"];

/// A monitored endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Short region name, also the first half of the dedup key
    pub name: String,

    /// URL that is probed with a GET request
    pub address: Url,
}

impl Target {
    pub fn new(name: impl Into<String>, address: Url) -> Self {
        Self { name: name.into(), address }
    }

    /// The six regional status endpoints the service was built for
    pub fn default_regions() -> Vec<Target> {
        DEFAULT_REGIONS
            .iter()
            .filter_map(|name| {
                let address = format!("https://data--{name}.upscope.io/status?stats=1");
                Url::parse(&address).ok().map(|url| Target::new(*name, url))
            })
            .collect()
    }
}

/// Outcome of one probe against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    /// Unique id of this observation
    pub id: Uuid,

    /// Name of the target that was checked
    pub target: String,

    /// URL that was requested
    pub address: Url,

    /// When the check started
    pub observed_at: DateTime<Utc>,

    /// Wall-clock time until the response head (or the failure) arrived
    pub latency_ms: u64,

    /// HTTP status code, 0 when no response was received
    pub status_code: u16,

    /// Whether the endpoint answered with a status in [200, 400)
    pub is_healthy: bool,

    /// JSON body returned by the endpoint, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Transport or server error description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CheckResult {
    /// Create a result for `target`, unhealthy until a response is recorded
    pub fn new(target: &Target, observed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.name.clone(),
            address: target.address.clone(),
            observed_at,
            latency_ms: 0,
            status_code: 0,
            is_healthy: false,
            payload: None,
            error_message: None,
        }
    }

    /// Record a response. 5xx keeps its status code but counts as a failure.
    pub fn responded(mut self, status_code: u16, latency_ms: u64, payload: Option<serde_json::Value>) -> Self {
        self.status_code = status_code;
        self.latency_ms = latency_ms;
        self.is_healthy = (200..400).contains(&status_code);
        self.payload = payload;
        if status_code >= 500 {
            self.error_message = Some(format!("server error: HTTP {status_code}"));
        }
        self
    }

    /// Record a transport failure (timeout, DNS, connection refused)
    pub fn failed(mut self, latency_ms: u64, error: String) -> Self {
        self.status_code = 0;
        self.latency_ms = latency_ms;
        self.is_healthy = false;
        self.payload = None;
        self.error_message = Some(error);
        self
    }

    pub fn hour_bucket(&self) -> i64 {
        hour_bucket(self.observed_at)
    }

    pub fn dedup_key(&self) -> String {
        dedup_key(&self.target, self.hour_bucket())
    }
}

/// `floor(epoch_millis / 1h)`
pub fn hour_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis().div_euclid(HOUR_MILLIS)
}

/// Deterministic record key for a (target, hour-bucket) pair
pub fn dedup_key(target: &str, bucket: i64) -> String {
    format!("{target}_{bucket}")
}

/// Identity of one running process
///
/// Generated once at startup from the start time and a random suffix, so two
/// replicas started in the same millisecond still differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn generate() -> Self {
        let started = Utc::now().timestamp_millis();
        let suffix: u32 = rand::random();
        Self(format!("{started}-{suffix:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named, time-bounded exclusive hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub name: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// `expires_at` is always `acquired_at + ttl`
    pub fn new(name: impl Into<String>, owner: &OwnerId, acquired_at: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = acquired_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self { name: name.into(), owner_id: owner.as_str().to_string(), acquired_at, expires_at }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_held_by(&self, owner: &OwnerId) -> bool {
        self.owner_id == owner.as_str()
    }
}

/// Persisted form of a [`CheckResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(flatten)]
    pub result: CheckResult,

    /// Process that wrote the record
    pub owner_id: String,

    /// Kept alongside the key for range queries
    pub hour_bucket: i64,
}

impl ResultRecord {
    pub fn new(result: CheckResult, owner: &OwnerId) -> Self {
        let hour_bucket = result.hour_bucket();
        Self { result, owner_id: owner.as_str().to_string(), hour_bucket }
    }

    pub fn key(&self) -> String {
        dedup_key(&self.result.target, self.hour_bucket)
    }
}
