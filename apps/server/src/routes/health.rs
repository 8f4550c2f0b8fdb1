use actix_web::{HttpResponse, Responder, get, web};
use serde_json::json;

use crate::state::AppState;

macros_utils::routes! {
    route banner_route,
    route health_route,
}

/// Service banner
#[get("/")]
pub async fn banner_route(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "message": "regionwatch monitoring server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "ownerId": state.coordinator.context().owner_id,
        "startedAt": state.started_at,
        "timestamp": state.now(),
    }))
}

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/healthz")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}
