//! In-process SSH node for terminal tests.
//!
//! `TestSshNode` accepts any OpenSSH user certificate and records what the
//! client asked for: principals, PTY parameters, shell start, stdin bytes and
//! window changes. In `Interactive` mode it greets with `ready\r\n` once the
//! shell starts, echoes stdin back prefixed with `echo:`, and closes the
//! channel (EOF plus close) when it receives `exit\n`. In `StallChannelOpen`
//! mode it authenticates the client and then never answers the session
//! channel open.

use russh::keys::ssh_key::private::Ed25519Keypair;
use russh::keys::ssh_key::public::KeyData;
use russh::keys::ssh_key::Certificate;
use russh::keys::PrivateKey;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Greeting sent once the shell starts.
pub const NODE_READY_BANNER: &[u8] = b"ready\r\n";

/// Stdin that makes the node end the shell.
pub const NODE_EXIT_COMMAND: &[u8] = b"exit\n";

/// How the node responds after authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeBehavior {
    Interactive,
    StallChannelOpen,
}

/// Something the client did on the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    CertificateAuth {
        user: String,
        principals: Vec<String>,
        signed_by: KeyData,
    },
    Pty {
        term: String,
        cols: u32,
        rows: u32,
        echo: Option<u32>,
    },
    Shell,
    Data(Vec<u8>),
    WindowChange {
        cols: u32,
        rows: u32,
    },
}

/// A listening SSH node on `127.0.0.1`.
pub struct TestSshNode {
    addr: SocketAddr,
    events: Arc<Mutex<Vec<NodeEvent>>>,
    handle: JoinHandle<()>,
}

impl TestSshNode {
    pub async fn spawn(behavior: NodeBehavior) -> Result<Self, anyhow::Error> {
        let host_key = PrivateKey::from(Ed25519Keypair::from_seed(&[42u8; 32]));
        let config = Arc::new(server::Config {
            keys: vec![host_key],
            inactivity_timeout: None,
            auth_rejection_time: Duration::from_millis(10),
            ..server::Config::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind SSH node: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get SSH node address: {}", e))?;

        let events = Arc::new(Mutex::new(Vec::new()));
        let accept_events = Arc::clone(&events);
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = NodeHandler {
                    behavior,
                    events: Arc::clone(&accept_events),
                    channels: HashMap::new(),
                };
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    match server::run_stream(config, socket, handler).await {
                        Ok(session) => {
                            if let Err(e) = session.await {
                                eprintln!("Test SSH node session ended: {}", e);
                            }
                        }
                        Err(e) => eprintln!("Test SSH node handshake failed: {}", e),
                    }
                });
            }
        });

        Ok(Self {
            addr,
            events,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Everything recorded so far, in arrival order.
    pub fn events(&self) -> Vec<NodeEvent> {
        self.events.lock().expect("node events lock").clone()
    }

    /// Stdin bytes received so far, concatenated.
    pub fn stdin(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                NodeEvent::Data(data) => Some(data),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl Drop for TestSshNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct NodeHandler {
    behavior: NodeBehavior,
    events: Arc<Mutex<Vec<NodeEvent>>>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl NodeHandler {
    fn record(&self, event: NodeEvent) {
        self.events.lock().expect("node events lock").push(event);
    }
}

impl server::Handler for NodeHandler {
    type Error = russh::Error;

    async fn auth_openssh_certificate(
        &mut self,
        user: &str,
        certificate: &Certificate,
    ) -> Result<Auth, Self::Error> {
        self.record(NodeEvent::CertificateAuth {
            user: user.to_string(),
            principals: certificate.valid_principals().to_vec(),
            signed_by: certificate.signature_key().clone(),
        });
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.behavior == NodeBehavior::StallChannelOpen {
            std::future::pending::<()>().await;
        }
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let echo = modes
            .iter()
            .find(|(mode, _)| matches!(mode, Pty::ECHO))
            .map(|(_, value)| *value);
        self.record(NodeEvent::Pty {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
            echo,
        });
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(NodeEvent::Shell);
        let _ = session.channel_success(channel);
        let _ = session.data(channel, CryptoVec::from_slice(NODE_READY_BANNER));
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(NodeEvent::Data(data.to_vec()));

        let mut reply = b"echo:".to_vec();
        reply.extend_from_slice(data);
        let _ = session.data(channel, CryptoVec::from_slice(&reply));

        if data == NODE_EXIT_COMMAND {
            let _ = session.exit_status_request(channel, 0);
            let _ = session.eof(channel);
            let _ = session.close(channel);
            self.channels.remove(&channel);
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(NodeEvent::WindowChange {
            cols: col_width,
            rows: row_height,
        });
        Ok(())
    }
}
