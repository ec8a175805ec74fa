//! Access Service Library
//!
//! Browser-facing access to tenant resources on a multi-tenant hosting
//! platform:
//!
//! - a minimal passwordless OIDC provider driven by single-use login sessions
//! - an SSH user certificate authority issuing per-connection credentials
//! - a WebSocket-to-SSH terminal bridge onto the tenant's node
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `crypto` - Signing keys, ID tokens, secret hashing
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `middleware` - API key auth and HTTP metrics
//! - `models` - Data models
//! - `observability` - Prometheus metrics
//! - `repositories` - Database access layer
//! - `routes` - Router and application state
//! - `services` - Business logic layer

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
