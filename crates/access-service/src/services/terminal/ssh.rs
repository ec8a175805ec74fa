//! SSH client leg of a terminal session.

use super::pump::{ShellInput, ShellOutput};
use super::TransportError;
use crate::services::certificate_authority::EphemeralCredential;
use russh::client::{self, Handle, Msg};
use russh::keys::{HashAlg, PublicKey};
use russh::{ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Disconnect, Pty};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Bound on the TCP dial.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the SSH handshake plus certificate authentication.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on opening the session channel, the PTY request, and the shell request.
pub const PTY_TIMEOUT: Duration = Duration::from_secs(10);

const TERM: &str = "xterm-256color";
const INITIAL_COLS: u32 = 80;
const INITIAL_ROWS: u32 = 24;
const TERMINAL_BAUD: u32 = 14400;

/// Host key policy for tenant nodes.
///
/// Nodes are resolved from the platform's own inventory over the internal
/// network, and their host keys are not yet distributed to this service, so
/// any host key is accepted and its fingerprint logged.
pub struct NodeHostKeyPolicy {
    node: SocketAddr,
}

impl client::Handler for NodeHostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            target: "access.terminal",
            node = %self.node,
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "Accepting node host key"
        );
        Ok(true)
    }
}

/// An authenticated SSH connection with a PTY-backed shell running.
pub struct ShellSession {
    pub handle: Handle<NodeHostKeyPolicy>,
    pub input: SshShellInput,
    pub output: SshShellOutput,
}

impl ShellSession {
    /// Politely close the SSH connection. Errors are irrelevant at this point.
    pub async fn disconnect(handle: &Handle<NodeHostKeyPolicy>) {
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "terminal session closed", "en")
            .await
        {
            tracing::debug!(target: "access.terminal", error = %e, "SSH disconnect failed");
        }
    }
}

pub struct SshShellInput {
    channel: ChannelWriteHalf<Msg>,
}

#[async_trait::async_trait]
impl ShellInput for SshShellInput {
    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| TransportError::Io(format!("SSH write failed: {}", e)))
    }

    async fn resize(&self, cols: u32, rows: u32) -> Result<(), TransportError> {
        self.channel
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| TransportError::Io(format!("SSH window change failed: {}", e)))
    }
}

pub struct SshShellOutput {
    channel: ChannelReadHalf,
}

#[async_trait::async_trait]
impl ShellOutput for SshShellOutput {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(Some(data.to_vec())),
                // stderr (ext 1) shares the terminal stream.
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(None),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::debug!(target: "access.terminal", exit_status, "Remote shell exited");
                }
                Some(_) => {}
            }
        }
    }
}

/// Which step of connection setup failed. Used for metrics.
pub fn failure_stage(error: &TransportError) -> &'static str {
    match error {
        TransportError::DialTimeout | TransportError::Dial(_) => "dial",
        TransportError::HandshakeTimeout | TransportError::Handshake(_) => "handshake",
        TransportError::AuthenticationRejected => "auth",
        TransportError::ChannelTimeout | TransportError::Channel(_) | TransportError::Io(_) => {
            "channel"
        }
    }
}

/// Dial a node, authenticate with the certificate, and start a PTY shell.
pub async fn open_shell(
    node: SocketAddr,
    principal: &str,
    credential: EphemeralCredential,
) -> Result<ShellSession, TransportError> {
    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(node))
        .await
        .map_err(|_| TransportError::DialTimeout)?
        .map_err(|e| TransportError::Dial(e.to_string()))?;

    let config = Arc::new(client::Config {
        // Streaming sessions have no idle limit; the browser decides when to leave.
        inactivity_timeout: None,
        ..client::Config::default()
    });

    let (private_key, certificate) = credential.into_parts();
    let handshake = async {
        let mut handle = client::connect_stream(config, stream, NodeHostKeyPolicy { node })
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let auth = handle
            .authenticate_openssh_cert(principal, Arc::new(private_key), certificate)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        if !auth.success() {
            return Err(TransportError::AuthenticationRejected);
        }
        Ok(handle)
    };
    let handle = timeout(HANDSHAKE_TIMEOUT, handshake)
        .await
        .map_err(|_| TransportError::HandshakeTimeout)??;

    let opened = timeout(PTY_TIMEOUT, open_pty_shell(&handle))
        .await
        .map_err(|_| TransportError::ChannelTimeout)
        .and_then(|result| result);
    let channel = match opened {
        Ok(channel) => channel,
        Err(e) => {
            ShellSession::disconnect(&handle).await;
            return Err(e);
        }
    };

    let (read_half, write_half) = channel.split();

    Ok(ShellSession {
        handle,
        input: SshShellInput {
            channel: write_half,
        },
        output: SshShellOutput { channel: read_half },
    })
}

async fn open_pty_shell(
    handle: &Handle<NodeHostKeyPolicy>,
) -> Result<russh::Channel<Msg>, TransportError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| TransportError::Channel(format!("failed to open session: {}", e)))?;

    channel
        .request_pty(
            true,
            TERM,
            INITIAL_COLS,
            INITIAL_ROWS,
            0,
            0,
            &[
                (Pty::ECHO, 1),
                (Pty::TTY_OP_ISPEED, TERMINAL_BAUD),
                (Pty::TTY_OP_OSPEED, TERMINAL_BAUD),
            ],
        )
        .await
        .map_err(|e| TransportError::Channel(format!("failed to request PTY: {}", e)))?;

    channel
        .request_shell(true)
        .await
        .map_err(|e| TransportError::Channel(format!("failed to start shell: {}", e)))?;

    Ok(channel)
}
