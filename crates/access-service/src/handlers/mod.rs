//! HTTP request handlers for the access service.

pub mod health;
pub mod login_session_handler;
pub mod metrics;
pub mod oidc_handler;
pub mod terminal_handler;

pub use health::health_check;
pub use login_session_handler::{create_login_session, validate_login_session};
pub use metrics::metrics_handler;
pub use oidc_handler::{authorize, discovery, jwks, token};
pub use terminal_handler::{ca_public_key, terminal_connect};
