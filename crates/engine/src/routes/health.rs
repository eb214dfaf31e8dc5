//! Health check handlers.

use axum::{extract::State, http::StatusCode};

use crate::state::AppState;

/// Liveness: the process is up and serving.
pub async fn liveness() -> &'static str {
    "OK"
}

/// Readiness: the database answers a trivial query.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(state.pool())
        .await
    {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::error!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
