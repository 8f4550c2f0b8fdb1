//! Read-side views computed from stored results.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::types::{CheckResult, Target};

/// Health of a target as seen by its latest recorded check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Offline,
    /// No check inside the summary window
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetHealth {
    pub target: String,
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub status_code: Option<u16>,
}

impl TargetHealth {
    fn unknown(target: &Target) -> Self {
        Self { target: target.name.clone(), status: HealthStatus::Unknown, last_check: None, latency_ms: None, status_code: None }
    }

    fn from_result(result: &CheckResult) -> Self {
        Self {
            target: result.target.clone(),
            status: if result.is_healthy { HealthStatus::Online } else { HealthStatus::Offline },
            last_check: Some(result.observed_at),
            latency_ms: Some(result.latency_ms),
            status_code: Some(result.status_code),
        }
    }
}

/// Latest-per-target status of every configured target
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub generated_at: DateTime<Utc>,
    pub targets: Vec<TargetHealth>,
}

impl HealthSummary {
    /// Build the summary in configuration order; `latest` maps target name to its newest result
    pub fn build(targets: &[Target], latest: &BTreeMap<String, CheckResult>, generated_at: DateTime<Utc>) -> Self {
        let targets = targets
            .iter()
            .map(|target| match latest.get(&target.name) {
                Some(result) => TargetHealth::from_result(result),
                None => TargetHealth::unknown(target),
            })
            .collect();

        Self { generated_at, targets }
    }

    pub fn online_count(&self) -> usize {
        self.targets.iter().filter(|t| t.status == HealthStatus::Online).count()
    }
}

/// Average latency of one target on one UTC day
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLatency {
    pub date: NaiveDate,
    pub avg_latency_ms: f64,
    pub checks: usize,
}

/// Per target, the average latency of each of its most recent `days` days
pub fn daily_latency(records: &[CheckResult], days: usize) -> BTreeMap<String, Vec<DailyLatency>> {
    let mut grouped: BTreeMap<&str, BTreeMap<NaiveDate, (u64, usize)>> = BTreeMap::new();

    for record in records {
        let day = grouped.entry(record.target.as_str()).or_default().entry(record.observed_at.date_naive()).or_default();
        day.0 += record.latency_ms;
        day.1 += 1;
    }

    grouped
        .into_iter()
        .map(|(target, per_day)| {
            let skip = per_day.len().saturating_sub(days);
            let averages = per_day
                .into_iter()
                .skip(skip)
                .map(|(date, (total, checks))| DailyLatency { date, avg_latency_ms: total as f64 / checks as f64, checks })
                .collect();
            (target.to_string(), averages)
        })
        .collect()
}
