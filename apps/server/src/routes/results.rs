use actix_web::{HttpResponse, get, web};
use chrono::TimeDelta;
use regionwatch::summary::daily_latency;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

macros_utils::routes! {
    route health_summary,
    route recent_results,
    route recent_target_results,
    route daily_aggregates,
    data query_config,
}

/// Hours looked back when `hours` is not given
const DEFAULT_RECENT_HOURS: i64 = 24;

/// Days covered by the daily latency aggregate
const AGGREGATE_DAYS: usize = 7;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    hours: Option<i64>,
}

impl RecentQuery {
    fn window(&self, retention_days: i64) -> Result<TimeDelta, ApiError> {
        let hours = self.hours.unwrap_or(DEFAULT_RECENT_HOURS);
        let max_hours = retention_days.saturating_mul(24);
        if !(1..=max_hours).contains(&hours) {
            return Err(ApiError::BadRequest(format!("hours must be between 1 and {max_hours}")));
        }
        Ok(TimeDelta::hours(hours))
    }
}

/// Malformed query strings get the same JSON error body as every other failure
fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| ApiError::BadRequest(format!("invalid query: {err}")).into())
}

/// Latest status of every configured target
#[get("/api/health")]
pub async fn health_summary(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let summary = state.coordinator.hub().summary(state.now()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[get("/api/recent")]
pub async fn recent_results(
    state: web::Data<AppState>,
    query: web::Query<RecentQuery>,
) -> Result<HttpResponse, ApiError> {
    recent(&state, None, &query).await
}

#[get("/api/recent/{target}")]
pub async fn recent_target_results(
    state: web::Data<AppState>,
    target: web::Path<String>,
    query: web::Query<RecentQuery>,
) -> Result<HttpResponse, ApiError> {
    recent(&state, Some(target.as_str()), &query).await
}

async fn recent(state: &AppState, target: Option<&str>, query: &RecentQuery) -> Result<HttpResponse, ApiError> {
    let cutoff = state.now() - query.window(state.retention_days)?;
    let results = state.coordinator.dedup().get_since(cutoff, target).await?;
    Ok(HttpResponse::Ok().json(results))
}

/// Average latency per target and UTC day
#[get("/api/aggregates/daily")]
pub async fn daily_aggregates(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let cutoff = state.now() - TimeDelta::days(AGGREGATE_DAYS as i64);
    let records = state.coordinator.dedup().get_since(cutoff, None).await?;
    Ok(HttpResponse::Ok().json(daily_latency(&records, AGGREGATE_DAYS)))
}
