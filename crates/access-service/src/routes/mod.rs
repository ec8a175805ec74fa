//! HTTP routes for the access service.
//!
//! Defines the Axum router and application state.

use crate::config::{Config, ConfigError};
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_api_key, ApiKeyAuthState};
use crate::services::certificate_authority::CertificateAuthority;
use crate::services::directory::PgDirectory;
use crate::services::key_management_service::SigningKeyManager;
use crate::services::login_session_service::LoginSessionStore;
use crate::services::oidc_service::AuthorizationServer;
use crate::services::terminal::TerminalBridge;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: PgPool,

    /// Service configuration.
    pub config: Config,

    /// Postgres-backed tenant, node and API key lookups.
    pub directory: PgDirectory,

    pub sessions: LoginSessionStore,

    pub keys: Arc<SigningKeyManager>,

    pub authorization_server: AuthorizationServer,

    pub terminal: TerminalBridge,
}

impl AppState {
    /// Wire the services from configuration.
    ///
    /// `shutdown` is the root token; cancelling it closes every terminal session.
    pub fn new(
        pool: PgPool,
        config: Config,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let certificate_authority = config
            .ssh_ca_private_key
            .as_ref()
            .map(|pem| {
                CertificateAuthority::from_openssh(pem.expose_secret())
                    .map(Arc::new)
                    .map_err(|e| ConfigError::InvalidSshCaKey(e.to_string()))
            })
            .transpose()?;

        let directory = PgDirectory::new(pool.clone());
        let sessions = LoginSessionStore::new(pool.clone());
        let keys = Arc::new(SigningKeyManager::new(
            pool.clone(),
            config.master_key_bytes()?,
            &config.cluster_name,
        ));
        let authorization_server = AuthorizationServer::new(
            pool.clone(),
            &config.issuer_url,
            sessions.clone(),
            Arc::clone(&keys),
        );
        let terminal = TerminalBridge::new(
            Arc::new(directory.clone()),
            Arc::new(directory.clone()),
            Arc::new(directory.clone()),
            certificate_authority,
            config.ssh_port,
            config.terminal_cert_ttl,
            shutdown,
        );

        Ok(Self {
            pool,
            config,
            directory,
            sessions,
            keys,
            authorization_server,
            terminal,
        })
    }
}

/// Build the application routes.
///
/// - public: discovery, JWKS, authorize, token, terminal (key in query), health
/// - `/metrics` with its own state
/// - API key protected: login session create/validate, CA public key
///
/// Layers: TraceLayer, 30 second timeout, HTTP metrics (outermost).
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_key_state = Arc::new(ApiKeyAuthState {
        validator: Arc::new(state.directory.clone()),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/.well-known/openid-configuration",
            get(handlers::discovery),
        )
        .route("/oidc/jwks", get(handlers::jwks))
        .route("/oidc/authorize", get(handlers::authorize))
        .route("/oidc/token", post(handlers::token))
        .route("/terminal/:tenant_id", get(handlers::terminal_connect))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route(
            "/tenants/:tenant_id/login-sessions",
            post(handlers::create_login_session),
        )
        .route(
            "/internal/v1/login-sessions/validate",
            post(handlers::validate_login_session),
        )
        .route(
            "/internal/v1/terminal/ca-public-key",
            get(handlers::ca_public_key),
        )
        .route_layer(middleware::from_fn_with_state(api_key_state, require_api_key))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware, so framework rejections are counted too
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
