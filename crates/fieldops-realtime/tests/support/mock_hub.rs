#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

const RS: char = '\u{1e}';

enum ConnectionCommand {
    SendFrame(Value),
    SendRaw(String),
    ForceClose,
}

/// What the server saw in the WebSocket upgrade request.
#[derive(Debug, Clone, Default)]
pub struct UpgradeInfo {
    pub path_and_query: String,
    pub authorization: Option<String>,
}

pub struct MockHubConnection {
    index: usize,
    upgrade: UpgradeInfo,
    handshake: Value,
    frame_rx: mpsc::Receiver<Value>,
    command_tx: mpsc::Sender<ConnectionCommand>,
}

impl MockHubConnection {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn upgrade(&self) -> &UpgradeInfo {
        &self.upgrade
    }

    pub fn handshake(&self) -> &Value {
        &self.handshake
    }

    /// Next client frame, skipping pings.
    pub async fn recv_frame(&mut self) -> Value {
        loop {
            let frame = timeout(STEP_TIMEOUT, self.frame_rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("mock connection frame channel closed");
            if frame["type"] != 6 {
                return frame;
            }
        }
    }

    /// Next invocation frame; asserts its target.
    pub async fn recv_invocation(&mut self, target: &str) -> Value {
        let frame = self.recv_frame().await;
        assert_eq!(frame["type"], 1, "expected invocation frame: {frame}");
        assert_eq!(frame["target"], target, "unexpected invocation target");
        frame
    }

    /// Any frame including pings, or `None` if nothing arrives in `wait`.
    pub async fn try_recv_any(&mut self, wait: Duration) -> Option<Value> {
        timeout(wait, self.frame_rx.recv()).await.ok().flatten()
    }

    pub async fn send_frame(&self, frame: Value) {
        self.command_tx
            .send(ConnectionCommand::SendFrame(frame))
            .await
            .expect("failed to send command to mock connection");
    }

    pub async fn send_raw(&self, payload: String) {
        self.command_tx
            .send(ConnectionCommand::SendRaw(payload))
            .await
            .expect("failed to send command to mock connection");
    }

    pub async fn complete(&self, invocation_id: &str, result: Value) {
        self.send_frame(json!({"type": 3, "invocationId": invocation_id, "result": result}))
            .await;
    }

    pub async fn complete_with_error(&self, invocation_id: &str, error: &str) {
        self.send_frame(json!({"type": 3, "invocationId": invocation_id, "error": error}))
            .await;
    }

    pub async fn push(&self, target: &str, arguments: Value) {
        self.send_frame(json!({"type": 1, "target": target, "arguments": arguments}))
            .await;
    }

    pub async fn send_close(&self, error: Option<&str>) {
        let frame = match error {
            Some(error) => json!({"type": 7, "error": error}),
            None => json!({"type": 7}),
        };
        self.send_frame(frame).await;
    }

    pub async fn force_close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::ForceClose).await;
    }
}

/// In-process SignalR JSON hub server.
pub struct MockHubServer {
    addr: SocketAddr,
    connection_rx: mpsc::Receiver<MockHubConnection>,
    server_task: JoinHandle<()>,
}

impl MockHubServer {
    /// Server that accepts every handshake.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(None).await
    }

    /// Server that answers every handshake with `error`.
    pub async fn start_rejecting(error: &str) -> std::io::Result<Self> {
        Self::start_with(Some(error.to_string())).await
    }

    async fn start_with(handshake_error: Option<String>) -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let (connection_tx, connection_rx) = mpsc::channel(16);
        let next_connection_index = Arc::new(AtomicUsize::new(0));

        let server_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let connection_tx = connection_tx.clone();
                let connection_index = next_connection_index.fetch_add(1, Ordering::SeqCst);
                let handshake_error = handshake_error.clone();

                tokio::spawn(async move {
                    let (upgrade_tx, upgrade_rx) = oneshot::channel();
                    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        let _ = upgrade_tx.send(UpgradeInfo {
                            path_and_query: request
                                .uri()
                                .path_and_query()
                                .map(ToString::to_string)
                                .unwrap_or_default(),
                            authorization: request
                                .headers()
                                .get("authorization")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string),
                        });
                        Ok(response)
                    };
                    let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    let upgrade = upgrade_rx.await.unwrap_or_default();

                    let (mut ws_sink, mut ws_source) = ws_stream.split();

                    // Protocol handshake
                    let handshake = loop {
                        match ws_source.next().await {
                            Some(Ok(Message::Text(text))) => {
                                let Some(frame) = text.as_str().split(RS).next() else {
                                    return;
                                };
                                let Ok(value) = serde_json::from_str::<Value>(frame) else {
                                    return;
                                };
                                break value;
                            }
                            Some(Ok(_)) => {}
                            _ => return,
                        }
                    };
                    let reply = match &handshake_error {
                        Some(error) => json!({"error": error}),
                        None => json!({}),
                    };
                    if ws_sink
                        .send(Message::Text(format!("{reply}{RS}").into()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    if handshake_error.is_some() {
                        let _ = ws_sink.close().await;
                        return;
                    }

                    let (frame_tx, frame_rx) = mpsc::channel(64);
                    let (command_tx, mut command_rx) = mpsc::channel(64);

                    let connection = MockHubConnection {
                        index: connection_index,
                        upgrade,
                        handshake,
                        frame_rx,
                        command_tx,
                    };

                    if connection_tx.send(connection).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            maybe_command = command_rx.recv() => {
                                let payload = match maybe_command {
                                    Some(ConnectionCommand::SendFrame(value)) => format!("{value}{RS}"),
                                    Some(ConnectionCommand::SendRaw(payload)) => payload,
                                    Some(ConnectionCommand::ForceClose) | None => break,
                                };
                                if ws_sink.send(Message::Text(payload.into())).await.is_err() {
                                    break;
                                }
                            }
                            maybe_message = ws_source.next() => {
                                match maybe_message {
                                    Some(Ok(Message::Text(text))) => {
                                        for frame in text.as_str().split(RS).filter(|f| !f.is_empty()) {
                                            if let Ok(value) = serde_json::from_str::<Value>(frame) {
                                                let _ = frame_tx.send(value).await;
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                        }
                    }
                });
            }
        });

        Ok(Self {
            addr,
            connection_rx,
            server_task,
        })
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn accept_connection(&mut self) -> MockHubConnection {
        timeout(STEP_TIMEOUT, self.connection_rx.recv())
            .await
            .expect("timed out waiting for client connection")
            .expect("mock server connection channel closed")
    }

    pub async fn try_accept_connection(&mut self, wait: Duration) -> Option<MockHubConnection> {
        match timeout(wait, self.connection_rx.recv()).await {
            Ok(Some(connection)) => Some(connection),
            _ => None,
        }
    }
}

impl Drop for MockHubServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}
