//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// GET /health
///
/// Pings the database. Always answers 200 so probes can read the body;
/// `status` is `healthy` or `unhealthy`.
#[instrument(skip_all, name = "access.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_healthy = sqlx::query("SELECT 1").fetch_one(&state.pool).await.is_ok();

    if !db_healthy {
        tracing::warn!(target: "access.health", "Database ping failed");
    }

    let status = if db_healthy { "healthy" } else { "unhealthy" };
    Json(HealthResponse {
        status: status.to_string(),
        database: status.to_string(),
    })
}
