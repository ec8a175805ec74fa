//! Terminal sessions against an in-process SSH node: PTY setup, streaming
//! in both directions, resize, and teardown.

use access_service::services::certificate_authority::CertificateAuthority;
use access_service::services::terminal::ssh::{failure_stage, open_shell, PTY_TIMEOUT};
use access_service::services::terminal::TransportError;
use access_test_utils::{
    seed_api_key, seed_node, seed_tenant, test_ca_key, test_ca_private_key_pem, NodeBehavior,
    NodeEvent, TestAccessServer, TestServerOptions, TestSshNode, NODE_EXIT_COMMAND,
    NODE_READY_BANNER,
};
use futures::{SinkExt, StreamExt};
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tenant `t-ok` on a node at 127.0.0.1; returns the API key.
async fn seed_tenant_on_local_node(pool: &PgPool) -> Result<String, anyhow::Error> {
    let api_key = seed_api_key(pool, "key-1").await?;
    seed_tenant(pool, "t-ok", true, Some("shard-1")).await?;
    seed_node(pool, "node-1", Some("127.0.0.1"), "active", "shard-1").await?;
    Ok(api_key)
}

async fn spawn_server_for(
    pool: PgPool,
    node: &TestSshNode,
) -> Result<TestAccessServer, anyhow::Error> {
    TestAccessServer::spawn_with(
        pool,
        TestServerOptions {
            ca_seed: Some(1),
            ssh_port: node.port(),
        },
    )
    .await
}

async fn connect(server: &TestAccessServer, api_key: &str) -> Result<WsClient, anyhow::Error> {
    let url = format!("{}/terminal/t-ok?token={}", server.ws_url(), api_key);
    let (socket, response) = tokio_tungstenite::connect_async(url).await?;
    assert_eq!(response.status().as_u16(), 101);
    Ok(socket)
}

/// Collect binary output until it contains `needle`.
async fn read_output_until(socket: &mut WsClient, needle: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
    let mut output = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while !output.windows(needle.len()).any(|window| window == needle) {
            match socket.next().await {
                Some(Ok(Message::Binary(data))) => output.extend_from_slice(&data),
                Some(Ok(Message::Close(frame))) => {
                    anyhow::bail!("socket closed before output arrived: {:?}", frame)
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("socket ended before output arrived"),
            }
        }
        Ok(())
    })
    .await??;
    Ok(output)
}

async fn next_close_frame(
    socket: &mut WsClient,
    within: Duration,
) -> Result<CloseFrame<'static>, anyhow::Error> {
    let frame = tokio::time::timeout(within, async {
        while let Some(message) = socket.next().await {
            if let Ok(Message::Close(frame)) = message {
                return frame;
            }
        }
        None
    })
    .await?;
    frame.ok_or_else(|| anyhow::anyhow!("socket ended without a close frame"))
}

async fn wait_for_certificate_auth(node: &TestSshNode) -> Result<(), anyhow::Error> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !node
            .events()
            .iter()
            .any(|event| matches!(event, NodeEvent::CertificateAuth { .. }))
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_terminal_streams_through_pty_shell(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_tenant_on_local_node(&pool).await?;
    let node = TestSshNode::spawn(NodeBehavior::Interactive).await?;
    let server = spawn_server_for(pool, &node).await?;
    let mut socket = connect(&server, &api_key).await?;

    // Node -> browser.
    read_output_until(&mut socket, NODE_READY_BANNER).await?;

    // Browser -> node, with a resize ahead of the keystrokes.
    socket
        .send(Message::Text(
            r#"{"type":"resize","cols":120,"rows":40}"#.to_string(),
        ))
        .await?;
    socket.send(Message::Text("not a control message".to_string())).await?;
    socket.send(Message::Binary(b"ls\n".to_vec())).await?;
    read_output_until(&mut socket, b"echo:ls\n").await?;

    let events = node.events();
    assert!(events.contains(&NodeEvent::CertificateAuth {
        user: "t-ok".to_string(),
        principals: vec!["t-ok".to_string()],
        signed_by: test_ca_key(1).public_key().key_data().clone(),
    }));

    let session: Vec<NodeEvent> = events
        .into_iter()
        .filter(|event| !matches!(event, NodeEvent::CertificateAuth { .. }))
        .collect();
    assert_eq!(
        session,
        vec![
            NodeEvent::Pty {
                term: "xterm-256color".to_string(),
                cols: 80,
                rows: 24,
                echo: Some(1),
            },
            NodeEvent::Shell,
            NodeEvent::WindowChange {
                cols: 120,
                rows: 40
            },
            NodeEvent::Data(b"ls\n".to_vec()),
        ]
    );

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_shell_eof_closes_socket_normally(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_tenant_on_local_node(&pool).await?;
    let node = TestSshNode::spawn(NodeBehavior::Interactive).await?;
    let server = spawn_server_for(pool, &node).await?;
    let mut socket = connect(&server, &api_key).await?;

    read_output_until(&mut socket, NODE_READY_BANNER).await?;
    socket.send(Message::Binary(NODE_EXIT_COMMAND.to_vec())).await?;

    let close = next_close_frame(&mut socket, Duration::from_secs(10)).await?;
    assert_eq!(u16::from(close.code), 1000);
    assert_eq!(close.reason, "session closed");
    assert!(node.stdin().ends_with(NODE_EXIT_COMMAND));

    Ok(())
}

#[tokio::test]
async fn test_open_shell_times_out_when_channel_open_stalls() -> Result<(), anyhow::Error> {
    let node = TestSshNode::spawn(NodeBehavior::StallChannelOpen).await?;
    let credential = CertificateAuthority::from_openssh(&test_ca_private_key_pem(1))?
        .sign("t-ok", Duration::from_secs(60))?;

    let started = Instant::now();
    let err = tokio::time::timeout(
        Duration::from_secs(25),
        open_shell(node.addr(), "t-ok", credential),
    )
    .await?
    .err()
    .expect("a stalled node cannot provide a shell");

    assert!(matches!(err, TransportError::ChannelTimeout));
    assert_eq!(failure_stage(&err), "channel");
    assert!(started.elapsed() >= PTY_TIMEOUT);
    assert!(node
        .events()
        .iter()
        .any(|event| matches!(event, NodeEvent::CertificateAuth { .. })));

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_stalled_channel_closes_socket_with_reason(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_tenant_on_local_node(&pool).await?;
    let node = TestSshNode::spawn(NodeBehavior::StallChannelOpen).await?;
    let server = spawn_server_for(pool, &node).await?;
    let mut socket = connect(&server, &api_key).await?;

    let close = next_close_frame(&mut socket, Duration::from_secs(25)).await?;
    assert_eq!(u16::from(close.code), 1011);
    assert_eq!(close.reason, "SSH connection failed: session channel timed out");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_shutdown_interrupts_session_setup(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_tenant_on_local_node(&pool).await?;
    let node = TestSshNode::spawn(NodeBehavior::StallChannelOpen).await?;
    let server = spawn_server_for(pool, &node).await?;
    let mut socket = connect(&server, &api_key).await?;

    // The session is now parked waiting on the channel open.
    wait_for_certificate_auth(&node).await?;
    server.shutdown_token().cancel();

    // Well inside the channel deadline.
    let close = next_close_frame(&mut socket, Duration::from_secs(5)).await?;
    assert_eq!(u16::from(close.code), 1001);
    assert_eq!(close.reason, "server shutting down");

    Ok(())
}
