//! Metrics definitions for the access service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `access_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `status`: success, error, timeout
//! - `outcome` / `stage`: fixed sets defined by the callers below
//!
//! Tenant IDs, session IDs and codes never appear as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle served at `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("access_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Token exchange includes a bcrypt verification, so it runs slower.
        .set_buckets_for_metric(
            Matcher::Prefix("access_oidc".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set OIDC buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("access_terminal_connect".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 20.000],
        )
        .map_err(|e| format!("Failed to set terminal connect buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `access_http_requests_total`, `access_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("access_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("access_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        100..=399 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health"
        | "/metrics"
        | "/.well-known/openid-configuration"
        | "/oidc/jwks"
        | "/oidc/authorize"
        | "/oidc/token"
        | "/internal/v1/login-sessions/validate"
        | "/internal/v1/terminal/ca-public-key" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    // /terminal/{tenant_id}
    if parts.len() == 3 && parts.get(1) == Some(&"terminal") {
        return "/terminal/{tenant_id}".to_string();
    }

    // /tenants/{tenant_id}/login-sessions
    if parts.len() == 4
        && parts.get(1) == Some(&"tenants")
        && parts.get(3) == Some(&"login-sessions")
    {
        return "/tenants/{tenant_id}/login-sessions".to_string();
    }

    "/other".to_string()
}

// ============================================================================
// Login Session Metrics
// ============================================================================

/// Metric: `access_login_sessions_created_total`
pub fn record_login_session_created() {
    counter!("access_login_sessions_created_total").increment(1);
}

/// Metric: `access_login_session_validations_total`
/// Labels: `outcome` (success, not_found, expired, already_used, error)
pub fn record_login_session_validation(outcome: &'static str) {
    counter!("access_login_session_validations_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// OIDC Metrics
// ============================================================================

/// Metric: `access_oidc_authorize_total`, `access_oidc_authorize_duration_seconds`
/// Labels: `status` (success, error)
pub fn record_authorize(status: &'static str, duration: Duration) {
    histogram!("access_oidc_authorize_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
    counter!("access_oidc_authorize_total", "status" => status).increment(1);
}

/// Metric: `access_oidc_token_exchanges_total`, `access_oidc_token_exchange_duration_seconds`
/// Labels: `status` (success, error), `error_category`
pub fn record_token_exchange(status: &'static str, error_category: Option<&'static str>, duration: Duration) {
    histogram!("access_oidc_token_exchange_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
    counter!("access_oidc_token_exchanges_total",
        "status" => status,
        "error_category" => error_category.unwrap_or("none")
    )
    .increment(1);
}

/// Metric: `access_signing_key_ensure_total`
/// Labels: `outcome` (cached, existing, created, converged)
pub fn record_signing_key_ensure(outcome: &'static str) {
    counter!("access_signing_key_ensure_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// SSH CA and Terminal Metrics
// ============================================================================

/// Metric: `access_ssh_certificates_issued_total`
/// Labels: `status` (success, error)
pub fn record_certificate_issued(status: &'static str) {
    counter!("access_ssh_certificates_issued_total", "status" => status).increment(1);
}

/// Metric: `access_terminal_rejections_total`
/// Labels: `stage` (auth, tenant, node, certificate, upgrade)
pub fn record_terminal_rejection(stage: &'static str) {
    counter!("access_terminal_rejections_total", "stage" => stage).increment(1);
}

/// Metric: `access_terminal_connect_duration_seconds`, `access_terminal_connect_failures_total`
/// Labels: `status` (success, error), `stage` (dial, handshake, auth, channel)
pub fn record_terminal_connect(status: &'static str, stage: Option<&'static str>, duration: Duration) {
    histogram!("access_terminal_connect_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
    if let Some(stage) = stage {
        counter!("access_terminal_connect_failures_total", "stage" => stage).increment(1);
    }
}

/// Tracks `access_terminal_sessions_active` for the lifetime of the guard.
#[must_use]
pub struct ActiveTerminalSession(());

impl ActiveTerminalSession {
    pub fn start() -> Self {
        gauge!("access_terminal_sessions_active").increment(1.0);
        ActiveTerminalSession(())
    }
}

impl Drop for ActiveTerminalSession {
    fn drop(&mut self) {
        gauge!("access_terminal_sessions_active").decrement(1.0);
    }
}
