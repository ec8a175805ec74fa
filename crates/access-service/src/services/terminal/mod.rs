//! Browser terminal bridge.
//!
//! `unauthenticated -> authenticated -> node-resolved -> cert-issued`
//! happens before the WebSocket upgrade and fails with a plain HTTP status.
//! `ssh-connected -> pty-ready -> streaming -> closed` happens after it, and
//! failures there are reported as WebSocket close frames.

pub mod pump;
pub mod ssh;

use crate::errors::AccessError;
use crate::observability::metrics;
use crate::services::certificate_authority::{CertificateAuthority, EphemeralCredential};
use crate::services::directory::{ApiKeyValidator, NodeDirectory, TenantDirectory};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// WebSocket close reasons are capped at 123 bytes by the protocol.
const MAX_CLOSE_REASON_LEN: usize = 123;

/// Post-upgrade failures, surfaced to the browser as close reasons.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dial timed out")]
    DialTimeout,

    #[error("dial failed: {0}")]
    Dial(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("session channel timed out")]
    ChannelTimeout,

    #[error("certificate rejected by node")]
    AuthenticationRejected,

    #[error("{0}")]
    Channel(String),

    #[error("{0}")]
    Io(String),
}

/// Everything needed to open the SSH leg, produced before the upgrade.
pub struct TerminalTarget {
    pub tenant_id: String,
    pub node: SocketAddr,
    pub credential: EphemeralCredential,
}

#[derive(Clone)]
pub struct TerminalBridge {
    api_keys: Arc<dyn ApiKeyValidator>,
    tenants: Arc<dyn TenantDirectory>,
    nodes: Arc<dyn NodeDirectory>,
    certificate_authority: Option<Arc<CertificateAuthority>>,
    ssh_port: u16,
    cert_ttl: Duration,
    shutdown: CancellationToken,
}

impl TerminalBridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_keys: Arc<dyn ApiKeyValidator>,
        tenants: Arc<dyn TenantDirectory>,
        nodes: Arc<dyn NodeDirectory>,
        certificate_authority: Option<Arc<CertificateAuthority>>,
        ssh_port: u16,
        cert_ttl: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api_keys,
            tenants,
            nodes,
            certificate_authority,
            ssh_port,
            cert_ttl,
            shutdown,
        }
    }

    /// OpenSSH public key line of the CA, for `TrustedUserCAKeys` on nodes.
    pub fn ca_public_key(&self) -> Result<String, AccessError> {
        let ca = self.certificate_authority.as_ref().ok_or_else(|| {
            AccessError::ServiceUnavailable("Terminal access is not configured".to_string())
        })?;
        ca.public_key_openssh().map_err(|e| {
            tracing::error!(target: "access.terminal", error = %e, "CA public key encoding failed");
            AccessError::Internal
        })
    }

    /// Run the pre-upgrade checks in order and issue a credential.
    ///
    /// 401 bad token, 404 unknown tenant, 403 SSH disabled, 409 no shard,
    /// 503 no node or no CA configured.
    #[instrument(skip_all, name = "access.terminal.prepare")]
    pub async fn prepare(
        &self,
        tenant_id: &str,
        token: Option<&str>,
    ) -> Result<TerminalTarget, AccessError> {
        let token = token.filter(|t| !t.is_empty()).ok_or_else(|| {
            metrics::record_terminal_rejection("auth");
            AccessError::Unauthorized("API key required".to_string())
        })?;
        if self.api_keys.validate(token).await?.is_none() {
            metrics::record_terminal_rejection("auth");
            return Err(AccessError::Unauthorized("Invalid API key".to_string()));
        }

        let tenant = self.tenants.get_tenant(tenant_id).await?.ok_or_else(|| {
            metrics::record_terminal_rejection("tenant");
            AccessError::NotFound("Tenant not found".to_string())
        })?;
        if !tenant.ssh_enabled {
            metrics::record_terminal_rejection("tenant");
            return Err(AccessError::Forbidden(
                "SSH access is disabled for this tenant".to_string(),
            ));
        }
        let shard_id = tenant.shard_id.as_deref().ok_or_else(|| {
            metrics::record_terminal_rejection("tenant");
            AccessError::Conflict("Tenant has no shard assigned".to_string())
        })?;

        let address = self.nodes.active_node_address(shard_id).await?.ok_or_else(|| {
            metrics::record_terminal_rejection("node");
            AccessError::ServiceUnavailable("No active node available for tenant".to_string())
        })?;

        let ca = self.certificate_authority.as_ref().ok_or_else(|| {
            metrics::record_terminal_rejection("certificate");
            AccessError::ServiceUnavailable("Terminal access is not configured".to_string())
        })?;
        let credential = ca.sign(&tenant.id, self.cert_ttl).map_err(|e| {
            metrics::record_terminal_rejection("certificate");
            tracing::error!(target: "access.terminal", error = %e, "Certificate issuance failed");
            AccessError::Internal
        })?;

        Ok(TerminalTarget {
            tenant_id: tenant.id,
            node: SocketAddr::new(address, self.ssh_port),
            credential,
        })
    }

    /// Drive an upgraded socket until either side closes.
    #[instrument(skip_all, name = "access.terminal.session")]
    pub async fn serve(&self, socket: WebSocket, target: TerminalTarget) {
        let _active = metrics::ActiveTerminalSession::start();
        let (mut sink, stream) = socket.split();
        let TerminalTarget {
            tenant_id,
            node,
            credential,
        } = target;

        let connect_start = Instant::now();
        let opened = tokio::select! {
            _ = self.shutdown.cancelled() => {
                metrics::record_terminal_connect("cancelled", None, connect_start.elapsed());
                close_with_reason(&mut sink, close_code::AWAY, "server shutting down").await;
                return;
            }
            opened = ssh::open_shell(node, &tenant_id, credential) => opened,
        };
        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                metrics::record_terminal_connect(
                    "error",
                    Some(ssh::failure_stage(&e)),
                    connect_start.elapsed(),
                );
                tracing::warn!(target: "access.terminal", node = %node, error = %e, "SSH connection failed");
                close_with_reason(
                    &mut sink,
                    close_code::ERROR,
                    &format!("SSH connection failed: {}", e),
                )
                .await;
                return;
            }
        };
        metrics::record_terminal_connect("success", None, connect_start.elapsed());
        tracing::info!(target: "access.terminal", node = %node, "Terminal session started");

        let ssh::ShellSession {
            handle,
            input,
            output,
        } = session;

        let (sink, input_exit, output_exit) =
            pump::run_pumps(input, output, stream, sink, self.shutdown.child_token()).await;

        tracing::info!(
            target: "access.terminal",
            input_exit = ?input_exit,
            output_exit = ?output_exit,
            "Terminal session ended"
        );

        if let Some(mut sink) = sink {
            let (code, reason) = match (&input_exit, &output_exit) {
                (pump::PumpExit::Failed(e), _) | (_, pump::PumpExit::Failed(e)) => {
                    (close_code::ERROR, e.as_str())
                }
                _ if self.shutdown.is_cancelled() => (close_code::AWAY, "server shutting down"),
                _ => (close_code::NORMAL, "session closed"),
            };
            close_with_reason(&mut sink, code, reason).await;
        }

        ssh::ShellSession::disconnect(&handle).await;
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_LEN {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason.get(..end).unwrap_or_default().to_string()
}

async fn close_with_reason<S>(sink: &mut S, code: u16, reason: &str)
where
    S: Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: Cow::Owned(truncate_reason(reason)),
    };
    // The peer may already be gone; nothing left to report to.
    let _ = sink.send(Message::Close(Some(frame))).await;
    let _ = sink.close().await;
}
