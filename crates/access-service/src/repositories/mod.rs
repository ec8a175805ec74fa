//! Database access layer. Each function issues one parameterized statement.

pub mod api_keys;
pub mod auth_codes;
pub mod databases;
pub mod login_sessions;
pub mod nodes;
pub mod oidc_clients;
pub mod signing_keys;
pub mod tenants;
