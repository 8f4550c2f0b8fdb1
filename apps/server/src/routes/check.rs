use actix_web::{HttpResponse, post, web};
use regionwatch::{CheckResult, CycleOutcome};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

macros_utils::routes! {
    route check_now,
}

const SKIPPED_MESSAGE: &str = "another replica is already running a monitoring cycle";

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum CheckNowResponse {
    Completed { results: Vec<CheckResult>, written: usize, duplicates: usize },
    Skipped { message: &'static str, results: Vec<CheckResult> },
}

/// Run a monitoring cycle now, unless another replica holds the lease
#[post("/api/check-now")]
pub async fn check_now(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let response = match state.coordinator.run().await? {
        CycleOutcome::Completed(report) => CheckNowResponse::Completed {
            results: report.results,
            written: report.written,
            duplicates: report.duplicates,
        },
        CycleOutcome::Skipped(_) => CheckNowResponse::Skipped { message: SKIPPED_MESSAGE, results: Vec::new() },
    };

    Ok(HttpResponse::Ok().json(response))
}
