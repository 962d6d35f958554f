use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub mod handlers;

/// Build the full application router. Layers (tracing, CORS) are added by
/// the binary; tests drive this router directly.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        // Token lifecycle
        .route("/auth/token", post(handlers::generate_token))
        .route("/auth/jwt-token", post(handlers::generate_jwt_token))
        .route("/auth/token/:client_id", get(handlers::inspect_token))
        .route("/auth/pool/:client_id", get(handlers::get_pool_token))
        .route("/auth/refresh/:client_id", post(handlers::refresh_token))
        // Maintenance trigger (not part of the public contract)
        .route("/internal/cleanup", post(handlers::run_cleanup))
        .with_state(state)
}
