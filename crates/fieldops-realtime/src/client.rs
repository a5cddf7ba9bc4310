//! # SignalR WebSocket Transport
//!
//! Production [`SessionConnector`] speaking the SignalR JSON hub protocol
//! over `tokio-tungstenite`. Negotiation is skipped: the hub URL is turned
//! into a `ws`/`wss` URL and the socket is opened directly.
//!
//! ## Architecture
//!
//! The WebSocket connection is split into reader/writer halves so that
//! invocations, keep-alive pings, and inbound pushes share one socket:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  SignalRSession                   │
//! │                                                   │
//! │  writer: Arc<Mutex<SplitSink>>  ◄── invoke()      │
//! │                                  ◄── ping task    │
//! │                                                   │
//! │  reader_loop (spawned task):                      │
//! │    SplitStream ─┬─► Completion → oneshot tx       │
//! │                 ├─► Invocation → SessionHandlers  │
//! │                 └─► Close/EOF  → on_close         │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Liveness
//!
//! A ping frame is sent every `ping_interval`. If nothing at all arrives
//! from the server for `server_timeout`, the session is treated as lost.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::{KeepAliveConfig, TimeoutConfig};
use crate::endpoint::sanitize_url;
use crate::error::{HubError, HubResult};
use crate::protocol::{
    HandshakeRequest, HandshakeResponse, HubMessage, InvocationMessage, encode_frame, split_frames,
};
use crate::session::{HubSession, SessionConnector, SessionHandlers, SessionRequest};

/// Type alias for the write half of the WebSocket connection.
type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Type alias for the read half of the WebSocket connection.
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A pending invocation awaiting its completion frame.
type PendingResponse = oneshot::Sender<HubResult<Value>>;

type PendingMap = Arc<Mutex<HashMap<String, PendingResponse>>>;

/// Builds [`SignalRSession`]s.
#[derive(Debug, Clone, Default)]
pub struct SignalRConnector {
    timeouts: TimeoutConfig,
    keep_alive: KeepAliveConfig,
}

impl SignalRConnector {
    pub fn new(timeouts: TimeoutConfig, keep_alive: KeepAliveConfig) -> Self {
        Self {
            timeouts,
            keep_alive,
        }
    }
}

#[async_trait]
impl SessionConnector for SignalRConnector {
    async fn connect(
        &self,
        request: SessionRequest,
        handlers: SessionHandlers,
    ) -> HubResult<Arc<dyn HubSession>> {
        let session = SignalRSession::connect(&request, handlers, &self.timeouts, &self.keep_alive)
            .await?;
        Ok(Arc::new(session))
    }
}

/// One live SignalR hub connection.
pub struct SignalRSession {
    hub: String,

    /// Shared write half of the WebSocket.
    writer: Arc<Mutex<WsWriter>>,

    /// Invocations awaiting a completion, keyed by invocation id.
    pending: PendingMap,

    next_id: AtomicU64,

    /// Cleared by the reader loop when the socket ends.
    connected: Arc<AtomicBool>,

    /// Set by [`stop`](HubSession::stop) so the reader loop does not report
    /// a locally requested close.
    stopping: Arc<AtomicBool>,

    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    ping_handle: std::sync::Mutex<Option<JoinHandle<()>>>,

    invoke_timeout: Duration,
}

impl std::fmt::Debug for SignalRSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRSession")
            .field("hub", &self.hub)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SignalRSession {
    /// Open the socket, complete the protocol handshake, and start the
    /// reader and keep-alive tasks.
    ///
    /// # Errors
    /// - [`HubError::InvalidEndpoint`] for a URL that is not http(s)/ws(s)
    /// - [`HubError::Timeout`] when the socket or handshake takes too long
    /// - [`HubError::ConnectFailed`] when the upgrade fails
    /// - [`HubError::HandshakeRejected`] when the server refuses the protocol
    pub async fn connect(
        request: &SessionRequest,
        handlers: SessionHandlers,
        timeouts: &TimeoutConfig,
        keep_alive: &KeepAliveConfig,
    ) -> HubResult<Self> {
        let hub = request.hub.clone();
        let url = websocket_url(&request.target.url)?;
        let safe_url = sanitize_url(&url);

        let mut ws_request =
            url.as_str()
                .into_client_request()
                .map_err(|e| HubError::InvalidEndpoint {
                    url: safe_url.clone(),
                    reason: e.to_string(),
                })?;
        if let Some(token) = &request.target.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                HubError::ConnectFailed {
                    hub: hub.clone(),
                    reason: format!("invalid bearer token: {e}"),
                }
            })?;
            ws_request.headers_mut().insert(AUTHORIZATION, value);
        }

        let connect_timeout = timeouts.connect_timeout();
        let (ws, response) =
            tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(ws_request))
                .await
                .map_err(|_| HubError::Timeout {
                    seconds: connect_timeout.as_secs(),
                })?
                .map_err(|e| HubError::ConnectFailed {
                    hub: hub.clone(),
                    reason: format!("WebSocket connection failed: {e}"),
                })?;

        tracing::debug!(hub = %hub, url = %safe_url, status = %response.status(), "Hub socket open");

        let (mut writer, mut reader) = ws.split();

        let handshake = encode_frame(&serde_json::to_string(&HandshakeRequest::default())?);
        writer.send(Message::Text(handshake.into())).await?;

        let handshake_timeout = timeouts.handshake_timeout();
        let leftover = tokio::time::timeout(handshake_timeout, read_handshake(&hub, &mut reader))
            .await
            .map_err(|_| HubError::Timeout {
                seconds: handshake_timeout.as_secs(),
            })??;

        tracing::info!(hub = %hub, url = %safe_url, "Hub handshake complete");

        let writer = Arc::new(Mutex::new(writer));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let stopping = Arc::new(AtomicBool::new(false));

        let reader_handle = spawn_reader_loop(ReaderContext {
            hub: hub.clone(),
            reader,
            leftover,
            pending: Arc::clone(&pending),
            connected: Arc::clone(&connected),
            stopping: Arc::clone(&stopping),
            handlers,
            server_timeout: keep_alive.server_timeout(),
        });
        let ping_handle = spawn_ping_loop(
            hub.clone(),
            Arc::clone(&writer),
            Arc::clone(&connected),
            keep_alive.ping_interval(),
        );

        Ok(Self {
            hub,
            writer,
            pending,
            next_id: AtomicU64::new(0),
            connected,
            stopping,
            reader_handle: std::sync::Mutex::new(Some(reader_handle)),
            ping_handle: std::sync::Mutex::new(Some(ping_handle)),
            invoke_timeout: timeouts.invoke_timeout(),
        })
    }

    fn abort_tasks(&self) {
        for slot in [&self.reader_handle, &self.ping_handle] {
            if let Some(handle) = slot.lock().ok().and_then(|mut guard| guard.take()) {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl HubSession for SignalRSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> HubResult<Value> {
        if !self.is_connected() {
            return Err(HubError::ConnectionLost {
                reason: "session is closed".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let frame = HubMessage::Invocation(InvocationMessage {
            invocation_id: Some(id.clone()),
            target: method.to_string(),
            arguments,
        })
        .encode()?;

        tracing::debug!(hub = %self.hub, method, id = %id, "Sending hub invocation");

        // Register the pending response before sending
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let sent = {
            let mut writer = self.writer.lock().await;
            writer.send(Message::Text(frame.into())).await
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(HubError::WebSocket(format!("Send error: {e}")));
        }

        let Ok(completion) = tokio::time::timeout(self.invoke_timeout, rx).await else {
            self.pending.lock().await.remove(&id);
            return Err(HubError::Timeout {
                seconds: self.invoke_timeout.as_secs(),
            });
        };

        completion.map_err(|_| HubError::ConnectionLost {
            reason: "Response channel dropped (reader loop died)".into(),
        })?
    }

    async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.close().await {
                tracing::debug!(hub = %self.hub, error = %e, "Close frame not sent");
            }
        }

        self.abort_tasks();
        fail_pending(&self.pending, "session stopped").await;
        tracing::info!(hub = %self.hub, "Hub session stopped");
    }
}

impl Drop for SignalRSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Map an http(s) hub URL onto the matching ws(s) URL.
///
/// # Errors
/// [`HubError::InvalidEndpoint`] for any other scheme.
pub fn websocket_url(url: &str) -> HubResult<String> {
    let mapped = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        return Err(HubError::InvalidEndpoint {
            url: sanitize_url(url),
            reason: "expected an http, https, ws or wss URL".into(),
        });
    };
    Ok(mapped)
}

/// Wait for the handshake response and return any frames that arrived
/// in the same payload.
async fn read_handshake(hub: &str, reader: &mut WsReader) -> HubResult<Vec<String>> {
    loop {
        let msg = reader.next().await.ok_or_else(|| HubError::HandshakeRejected {
            hub: hub.to_string(),
            reason: "connection closed during handshake".into(),
        })??;

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(frame) => {
                return Err(HubError::HandshakeRejected {
                    hub: hub.to_string(),
                    reason: frame.map_or_else(
                        || "connection closed during handshake".into(),
                        |f| f.reason.to_string(),
                    ),
                });
            }
            _ => continue,
        };

        let mut frames = split_frames(text.as_str());
        let Some(first) = frames.next() else {
            continue;
        };
        let response: HandshakeResponse = serde_json::from_str(first)?;
        if let Some(error) = response.error {
            return Err(HubError::HandshakeRejected {
                hub: hub.to_string(),
                reason: error,
            });
        }
        return Ok(frames.map(str::to_string).collect());
    }
}

struct ReaderContext {
    hub: String,
    reader: WsReader,
    leftover: Vec<String>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    handlers: SessionHandlers,
    server_timeout: Duration,
}

enum FrameOutcome {
    Continue,
    Closed(Option<HubError>),
}

/// Spawn the background reader loop that dispatches inbound frames.
fn spawn_reader_loop(ctx: ReaderContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ReaderContext {
            hub: hub_name,
            mut reader,
            leftover,
            pending,
            connected,
            stopping,
            handlers,
            server_timeout,
        } = ctx;
        let hub = hub_name.as_str();

        let mut close_reason = None;
        let mut closed = false;
        for frame in &leftover {
            if let FrameOutcome::Closed(reason) = handle_frame(hub, frame, &pending, &handlers).await
            {
                close_reason = reason;
                closed = true;
                break;
            }
        }

        while !closed {
            let Ok(msg) = tokio::time::timeout(server_timeout, reader.next()).await else {
                tracing::warn!(hub, "No message from server within timeout");
                close_reason = Some(HubError::ConnectionLost {
                    reason: format!(
                        "server timeout elapsed ({}s) without receiving a message",
                        server_timeout.as_secs()
                    ),
                });
                break;
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    for frame in split_frames(text.as_str()) {
                        if let FrameOutcome::Closed(reason) =
                            handle_frame(hub, frame, &pending, &handlers).await
                        {
                            close_reason = reason;
                            closed = true;
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(hub, ?frame, "Hub WebSocket closed by server");
                    close_reason = Some(HubError::ConnectionLost {
                        reason: "WebSocket closed by server".into(),
                    });
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(hub, error = %e, "WebSocket read error");
                    close_reason = Some(e.into());
                    break;
                }
                None => {
                    tracing::info!(hub, "Hub WebSocket stream ended");
                    close_reason = Some(HubError::ConnectionLost {
                        reason: "WebSocket stream ended".into(),
                    });
                    break;
                }
                // Binary messages, pings, pongs
                Some(Ok(_)) => {}
            }
        }

        connected.store(false, Ordering::SeqCst);
        fail_pending(&pending, "connection closed").await;

        if stopping.load(Ordering::SeqCst) {
            tracing::debug!(hub, "Reader loop exiting after local stop");
        } else {
            tracing::debug!(hub, "Reader loop exiting");
            handlers.closed(close_reason);
        }
    })
}

async fn handle_frame(
    hub: &str,
    frame: &str,
    pending: &PendingMap,
    handlers: &SessionHandlers,
) -> FrameOutcome {
    let message = match HubMessage::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(hub, error = %e, "Failed to decode hub frame");
            return FrameOutcome::Continue;
        }
    };

    match message {
        HubMessage::Invocation(invocation) => {
            if invocation.invocation_id.is_some() {
                tracing::debug!(
                    hub,
                    target = %invocation.target,
                    "Server expects a client result; not supported, delivering as a push"
                );
            }
            handlers.deliver(&invocation.target, invocation.arguments);
        }
        HubMessage::Completion(completion) => {
            let id = completion.invocation_id.clone();
            match pending.lock().await.remove(&id) {
                Some(tx) => {
                    let result = completion
                        .into_result()
                        .map_err(|reason| HubError::Protocol { reason });
                    let _ = tx.send(result);
                }
                None => tracing::debug!(hub, id = %id, "Completion for unknown invocation id"),
            }
        }
        HubMessage::Ping => tracing::trace!(hub, "Ping"),
        HubMessage::Close(close) => {
            tracing::info!(hub, error = ?close.error, "Hub sent close");
            return FrameOutcome::Closed(Some(HubError::ConnectionLost {
                reason: close
                    .error
                    .unwrap_or_else(|| "server closed the hub connection".into()),
            }));
        }
        HubMessage::Other(code) => tracing::debug!(hub, code, "Ignoring hub frame"),
    }
    FrameOutcome::Continue
}

fn spawn_ping_loop(
    hub_name: String,
    writer: Arc<Mutex<WsWriter>>,
    connected: Arc<AtomicBool>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let hub = hub_name.as_str();
        let Ok(ping) = HubMessage::Ping.encode() else {
            return;
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !connected.load(Ordering::SeqCst) {
                break;
            }
            let sent = writer
                .lock()
                .await
                .send(Message::Text(ping.clone().into()))
                .await;
            if let Err(e) = sent {
                tracing::debug!(hub, error = %e, "Keep-alive ping failed");
                break;
            }
        }
    })
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(HubError::ConnectionLost {
            reason: reason.to_string(),
        }));
    }
}
