pub mod api_key_auth;
pub mod http_metrics;

pub use api_key_auth::{require_api_key, ApiKeyAuthState};
pub use http_metrics::http_metrics_middleware;
