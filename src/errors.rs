use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidArgument(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_argument",
                reason.clone(),
            ),
            AppError::NotFound(reason) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                reason.clone(),
            ),
            AppError::ResourceExhausted(reason) => (
                StatusCode::TOO_MANY_REQUESTS,
                "backpressure_error",
                "resource_exhausted",
                reason.clone(),
            ),
            // Upstream bodies are surfaced verbatim so operators can diagnose
            // provider-side auth failures from the response alone.
            AppError::Upstream(body) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                body.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        // An exhausted pool frees up as soon as a replenishment lands or a
        // token ages out of the margin window.
        if matches!(self, AppError::ResourceExhausted(_)) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("5"));
        }

        response
    }
}
