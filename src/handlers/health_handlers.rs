use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// `GET /health`
///
/// 200 `OK` when the database answers `SELECT 1`, 503 otherwise. Object
/// storage is deliberately not probed.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
    {
        Ok(1) => (StatusCode::OK, "OK"),
        Ok(v) => {
            tracing::warn!("health check returned unexpected value {}", v);
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        }
        Err(e) => {
            tracing::warn!("health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        }
    }
}
