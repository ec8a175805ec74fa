//! Test server harness for E2E testing.
//!
//! Provides `TestAccessServer` for spawning real access service instances in tests.

use crate::crypto_fixtures::{test_ca_private_key_pem, test_master_key_b64};
use access_service::config::{Config, DEFAULT_CLUSTER_NAME};
use access_service::observability::metrics::init_metrics_recorder;
use access_service::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use secrecy::SecretString;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Issuer configured on every test server.
pub const TEST_ISSUER_URL: &str = "http://access.test";

/// Knobs for a test server.
#[derive(Debug, Clone)]
pub struct TestServerOptions {
    /// Seed of the deterministic SSH CA key; `None` leaves the terminal disabled.
    pub ca_seed: Option<u8>,
    /// Port the terminal dials on tenant nodes.
    pub ssh_port: u16,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            ca_seed: None,
            ssh_port: 22,
        }
    }
}

/// A running access service bound to a random local port.
///
/// # Example
/// ```rust,ignore
/// #[sqlx::test(migrations = "../../migrations")]
/// async fn test_health(pool: PgPool) -> Result<(), anyhow::Error> {
///     let server = TestAccessServer::spawn(pool).await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestAccessServer {
    addr: SocketAddr,
    pool: PgPool,
    config: Config,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestAccessServer {
    /// Spawn a server with the terminal disabled.
    pub async fn spawn(pool: PgPool) -> Result<Self, anyhow::Error> {
        Self::spawn_with(pool, TestServerOptions::default()).await
    }

    /// Spawn a server with a deterministic SSH CA (seed 1).
    pub async fn spawn_with_ca(pool: PgPool) -> Result<Self, anyhow::Error> {
        Self::spawn_with(
            pool,
            TestServerOptions {
                ca_seed: Some(1),
                ..TestServerOptions::default()
            },
        )
        .await
    }

    pub async fn spawn_with(
        pool: PgPool,
        options: TestServerOptions,
    ) -> Result<Self, anyhow::Error> {
        let config = Config {
            database_url: String::new(), // Not used after connection established
            bind_address: "127.0.0.1:0".to_string(),
            master_key: SecretString::from(test_master_key_b64()),
            issuer_url: TEST_ISSUER_URL.to_string(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            ssh_ca_private_key: options
                .ca_seed
                .map(|seed| SecretString::from(test_ca_private_key_pem(seed))),
            ssh_port: options.ssh_port,
            terminal_cert_ttl: Duration::from_secs(60),
        };

        let shutdown = CancellationToken::new();
        let state = AppState::new(pool.clone(), config.clone(), shutdown.clone())
            .map_err(|e| anyhow::anyhow!("Failed to build app state: {}", e))?;

        // The global recorder can only be installed once per process; later
        // servers get a standalone recorder.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => PrometheusBuilder::new().build_recorder().handle(),
        };

        let app = routes::build_routes(Arc::new(state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            pool,
            config,
            shutdown,
            handle,
        })
    }

    /// Base HTTP URL of the server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base WebSocket URL of the server.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Root shutdown token. Cancelling it closes all terminal sessions.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// HTTP client that does not follow redirects, for 302 assertions.
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client builds")
    }
}

impl Drop for TestAccessServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}
