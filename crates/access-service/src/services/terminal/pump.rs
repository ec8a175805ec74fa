//! Duplex pumps between a browser WebSocket and an interactive shell.
//!
//! Two loops share one `CancellationToken`. Each holds a drop guard of the
//! token, so whichever loop exits first (clean EOF, error, or panic) cancels
//! the other. Neither loop retries.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::fmt;
use tokio_util::sync::CancellationToken;

use super::TransportError;

/// Shell standard input and PTY control.
#[async_trait::async_trait]
pub trait ShellInput: Send + Sync {
    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    async fn resize(&self, cols: u32, rows: u32) -> Result<(), TransportError>;
}

/// Shell standard output (stderr is merged in).
#[async_trait::async_trait]
pub trait ShellOutput: Send {
    /// Next chunk of output. `Ok(None)` once the shell has closed.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The other pump (or process shutdown) cancelled this one.
    Cancelled,
    /// Browser closed the socket or sent a close frame.
    ClientClosed,
    /// Remote shell reached EOF.
    ShellClosed,
    /// Read or write failure on either side.
    Failed(String),
}

/// Control message carried in a text frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Resize { cols: u32, rows: u32 },
}

impl ControlMessage {
    /// Parse a text frame. Malformed, unknown, or non-positive resize
    /// requests yield `None` and are ignored by the caller.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<ControlMessage>(text).ok()? {
            ControlMessage::Resize { cols, rows } if cols > 0 && rows > 0 => {
                Some(ControlMessage::Resize { cols, rows })
            }
            ControlMessage::Resize { .. } => None,
        }
    }
}

/// Shell output to WebSocket binary frames. Returns the sink so the caller
/// can send the final close frame.
pub async fn pump_output<O, S>(mut output: O, mut sink: S, cancel: CancellationToken) -> (S, PumpExit)
where
    O: ShellOutput,
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let _guard = cancel.clone().drop_guard();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return (sink, PumpExit::Cancelled),
            chunk = output.next_chunk() => chunk,
        };

        let data = match chunk {
            Ok(Some(data)) => data,
            Ok(None) => return (sink, PumpExit::ShellClosed),
            Err(e) => return (sink, PumpExit::Failed(e.to_string())),
        };

        let sent = tokio::select! {
            _ = cancel.cancelled() => return (sink, PumpExit::Cancelled),
            sent = sink.send(Message::Binary(data)) => sent,
        };
        if let Err(e) = sent {
            return (sink, PumpExit::Failed(format!("WebSocket write failed: {}", e)));
        }
    }
}

/// WebSocket frames to shell input. Binary frames are keystrokes; text
/// frames are JSON control messages.
pub async fn pump_input<I, St, E>(input: &I, mut stream: St, cancel: CancellationToken) -> PumpExit
where
    I: ShellInput + ?Sized,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let _guard = cancel.clone().drop_guard();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            frame = stream.next() => frame,
        };

        match frame {
            None | Some(Ok(Message::Close(_))) => return PumpExit::ClientClosed,
            Some(Err(e)) => return PumpExit::Failed(format!("WebSocket read failed: {}", e)),
            Some(Ok(Message::Binary(data))) => {
                // A full SSH window can park the write indefinitely.
                let written = tokio::select! {
                    _ = cancel.cancelled() => return PumpExit::Cancelled,
                    written = input.write(&data) => written,
                };
                if let Err(e) = written {
                    return PumpExit::Failed(e.to_string());
                }
            }
            Some(Ok(Message::Text(text))) => match ControlMessage::parse(&text) {
                Some(ControlMessage::Resize { cols, rows }) => {
                    let resized = tokio::select! {
                        _ = cancel.cancelled() => return PumpExit::Cancelled,
                        resized = input.resize(cols, rows) => resized,
                    };
                    if let Err(e) = resized {
                        return PumpExit::Failed(e.to_string());
                    }
                }
                None => {
                    tracing::trace!(target: "access.terminal", "Ignoring unrecognized text frame");
                }
            },
            // Ping/pong are answered by the WebSocket layer.
            Some(Ok(_)) => {}
        }
    }
}

/// Run both pumps to completion. The output pump is spawned; the input pump
/// runs on the calling task. Returns the sink (if the output task did not
/// panic) and both exit reasons.
pub async fn run_pumps<I, O, St, Si, E>(
    input: I,
    output: O,
    stream: St,
    sink: Si,
    cancel: CancellationToken,
) -> (Option<Si>, PumpExit, PumpExit)
where
    I: ShellInput,
    O: ShellOutput + 'static,
    St: Stream<Item = Result<Message, E>> + Unpin,
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: fmt::Display + Send,
    E: fmt::Display,
{
    let output_task = tokio::spawn(pump_output(output, sink, cancel.clone()));
    let input_exit = pump_input(&input, stream, cancel.clone()).await;
    cancel.cancel();

    match output_task.await {
        Ok((sink, output_exit)) => (Some(sink), input_exit, output_exit),
        Err(e) => (
            None,
            input_exit,
            PumpExit::Failed(format!("output pump aborted: {}", e)),
        ),
    }
}
