use std::io::Error as IoError;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use regionwatch::{CycleError, StoreError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

/// Errors returned by route handlers.
///
/// The body only carries the display message; sources are logged, never sent.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to read monitoring data")]
    Store(#[from] StoreError),
    #[error("monitoring cycle failed")]
    Cycle(#[from] CycleError),
    #[error("failed to encode response")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    BadRequest(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Cycle(_) | ApiError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::Store(e) => error!("Store error while serving request: {e}"),
            ApiError::Cycle(e) => error!("Monitoring cycle failed: {e}"),
            ApiError::Encode(e) => error!("Failed to encode response: {e}"),
            ApiError::BadRequest(_) => {}
        }

        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
