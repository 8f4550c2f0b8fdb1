//! Probe executor - issues one bounded GET per target.
//!
//! Transport failures never escape as errors; they become unhealthy
//! [`CheckResult`]s with status code 0 so one broken region cannot disturb
//! the others.

use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::types::{CheckResult, Target};

/// Bodies larger than this are dropped instead of kept as payload
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// HTTP checker shared by every target of a cycle
pub struct ProbeExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProbeExecutor {
    /// Create a new probe executor with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("regionwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }

    /// Use a preconfigured client; `timeout` should match the client's own
    pub fn from_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check a single target
    pub async fn check(&self, target: &Target, clock: &dyn Clock) -> CheckResult {
        let result = CheckResult::new(target, clock.now());
        let start = Instant::now();

        let response = match self.client.get(target.address.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                let latency = start.elapsed().as_millis() as u64;
                let reason = describe_transport_error(&e);
                warn!(target = %target.name, latency_ms = latency, "Check failed: {reason}");
                return result.failed(latency, reason);
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status_code = response.status().as_u16();

        // The body is informational; a slow, oversized or non-JSON body leaves no payload
        let payload = match read_capped(response).await {
            Ok(Some(body)) => serde_json::from_slice::<serde_json::Value>(&body).ok(),
            Ok(None) => {
                debug!(target = %target.name, limit = MAX_PAYLOAD_BYTES, "Response body too large, payload dropped");
                None
            }
            Err(e) => {
                debug!(target = %target.name, "Failed to read response body: {e}");
                None
            }
        };

        info!(target = %target.name, status_code, latency_ms = latency, "Check completed");
        result.responded(status_code, latency, payload)
    }

    /// Check every target concurrently and wait for all of them
    pub async fn check_all(&self, targets: &[Target], clock: &dyn Clock) -> Vec<CheckResult> {
        join_all(targets.iter().map(|target| self.check(target, clock))).await
    }
}

/// Read the body unless it exceeds `MAX_PAYLOAD_BYTES`
async fn read_capped(mut response: reqwest::Response) -> Result<Option<Vec<u8>>, reqwest::Error> {
    if response.content_length().is_some_and(|len| len > MAX_PAYLOAD_BYTES as u64) {
        return Ok(None);
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > MAX_PAYLOAD_BYTES {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body))
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        format!("request failed: {error}")
    }
}
