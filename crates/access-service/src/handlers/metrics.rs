//! Prometheus scrape endpoint.
//!
//! Unauthenticated. Labels are bounded and carry no tenant or session data.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics
#[tracing::instrument(skip_all, name = "access.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
