//! Uniform error → HTTP mapping (spec.md §7), in the teacher's `error.rs`
//! shape: one enum, one `IntoResponse` impl, one JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("redirect not found")]
    NotFound,

    #[error("redirect disabled")]
    Gone,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", "Redirect not found"),
            AppError::Gone => (StatusCode::GONE, "gone", "Redirect disabled"),
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };

        (
            status,
            Json(json!({
                "error": { "code": code, "message": message }
            })),
        )
            .into_response()
    }
}
