// Connection management for the chat WebSocket
// One reconnecting transport per client; observers see state changes and events

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use std::fmt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::OutboundFrame;

/// Path of the chat socket on the server
pub const CHAT_WS_PATH: &str = "/chat_ws";

/// Lifecycle of the shared connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Open => "Connected",
            ConnectionState::Closing => "Disconnecting...",
            ConnectionState::Closed => "Disconnected",
        };
        f.write_str(label)
    }
}

/// What the transport reports to the client
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed(String),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection is not open ({0})")]
    NotOpen(ConnectionState),

    #[error("Outbound queue is full")]
    QueueFull,

    #[error("Connection task has stopped")]
    Closed,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Where to connect and how to authenticate
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub session_id: Option<String>,
}

impl Endpoint {
    /// `ws://host/chat_ws`, or `wss://` for a secure server
    pub fn new(host: &str, secure: bool) -> Self {
        let scheme = if secure { "wss" } else { "ws" };
        Endpoint {
            url: format!("{}://{}{}", scheme, host.trim_end_matches('/'), CHAT_WS_PATH),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Build the handshake request, carrying the session cookie when set
    pub fn request(&self) -> Result<Request, ConnectionError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidEndpoint(format!("{}: {}", self.url, e)))?;
        if let Some(session_id) = &self.session_id {
            let cookie = HeaderValue::from_str(&format!("sessionid={}", session_id))
                .map_err(|e| ConnectionError::InvalidEndpoint(format!("bad session id: {}", e)))?;
            request.headers_mut().insert(COOKIE, cookie);
        }
        Ok(request)
    }
}

/// Reconnect timing, matching the browser reconnecting-socket defaults
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub min_delay: Duration,
    pub delay_jitter: Duration,
    pub max_delay: Duration,
    pub grow_factor: f64,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            min_delay: Duration::from_millis(1000),
            delay_jitter: Duration::from_millis(4000),
            max_delay: Duration::from_millis(10000),
            grow_factor: 1.3,
            connect_timeout: Duration::from_millis(4000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `retry` (0 is the first attempt).
    /// `jitter` is in `[0, 1)` and scales the random part of the base delay.
    pub fn delay_for(&self, retry: u32, jitter: f64) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let base = self.min_delay.as_secs_f64() + self.delay_jitter.as_secs_f64() * jitter.clamp(0.0, 1.0);
        let grown = base * self.grow_factor.powi(retry as i32 - 1);
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()))
    }

    pub fn next_delay(&self, retry: u32) -> Duration {
        self.delay_for(retry, rand::thread_rng().gen::<f64>())
    }
}

/// The task side of a connection: what the transport reads from and writes to
pub struct TransportEnd {
    pub outbound_rx: mpsc::Receiver<String>,
    pub events_tx: mpsc::Sender<TransportEvent>,
    pub state_tx: watch::Sender<ConnectionState>,
}

impl TransportEnd {
    pub fn set_state(&self, state: ConnectionState) {
        debug!("Connection state -> {:?}", state);
        self.state_tx.send_replace(state);
    }
}

/// The client side of a connection
pub struct ConnectionHandle {
    outbound_tx: mpsc::Sender<String>,
    events_rx: mpsc::Receiver<TransportEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Create a handle and its matching transport end, with no task attached
    pub fn channel() -> (Self, TransportEnd) {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        let (events_tx, events_rx) = mpsc::channel(100);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        (ConnectionHandle {
            outbound_tx,
            events_rx,
            state_rx,
            task: None,
        }, TransportEnd {
            outbound_rx,
            events_tx,
            state_tx,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Transmit one frame. Fails unless the connection is open; nothing is queued for later.
    pub fn send(&self, frame: &OutboundFrame) -> Result<(), ConnectionError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(ConnectionError::NotOpen(state));
        }
        self.outbound_tx.try_send(frame.encode()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.recv().await
    }

    /// Close the socket and wait for the connection task to finish
    pub async fn shutdown(self) {
        let ConnectionHandle { outbound_tx, events_rx, task, .. } = self;
        drop(outbound_tx);
        drop(events_rx);
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Connection task failed: {}", e);
            }
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Owns the reconnect loop for one endpoint
pub struct ConnectionManager {
    endpoint: Endpoint,
    policy: ReconnectPolicy,
}

impl ConnectionManager {
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_policy(endpoint, ReconnectPolicy::default())
    }

    pub fn with_policy(endpoint: Endpoint, policy: ReconnectPolicy) -> Self {
        ConnectionManager { endpoint, policy }
    }

    /// Start the connection task and return the client handle
    pub fn spawn(self) -> ConnectionHandle {
        let (mut handle, end) = ConnectionHandle::channel();
        handle.task = Some(tokio::spawn(self.run(end)));
        handle
    }

    async fn run(self, mut end: TransportEnd) {
        let mut retry: u32 = 0;
        loop {
            let delay = self.policy.next_delay(retry);
            if !delay.is_zero() {
                info!("Reconnecting to {} in {:?}", self.endpoint.url, delay);
                if !Self::idle(&mut end, delay).await {
                    break;
                }
            }

            end.set_state(ConnectionState::Connecting);
            let request = match self.endpoint.request() {
                Ok(request) => request,
                Err(e) => {
                    error!("Cannot connect: {}", e);
                    break;
                }
            };

            match tokio::time::timeout(self.policy.connect_timeout, tokio_tungstenite::connect_async(request)).await {
                Ok(Ok((ws_stream, _response))) => {
                    info!("Connected to {}", self.endpoint.url);
                    retry = 0;
                    end.set_state(ConnectionState::Open);
                    if end.events_tx.send(TransportEvent::Opened).await.is_err() {
                        break;
                    }
                    match Self::session(ws_stream, &mut end).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            warn!("Connection lost: {}", reason);
                            end.set_state(ConnectionState::Closed);
                            if end.events_tx.send(TransportEvent::Closed(reason)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("Connection attempt {} failed: {}", retry + 1, e);
                    end.set_state(ConnectionState::Closed);
                }
                Err(_) => {
                    warn!("Connection attempt {} timed out after {:?}", retry + 1, self.policy.connect_timeout);
                    end.set_state(ConnectionState::Closed);
                }
            }
            retry = retry.saturating_add(1);
        }
        end.set_state(ConnectionState::Closed);
        debug!("Connection task finished");
    }

    /// Wait out a reconnect delay, discarding frames sent meanwhile.
    /// Returns false if the client went away.
    async fn idle(end: &mut TransportEnd, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                frame = end.outbound_rx.recv() => match frame {
                    Some(frame) => warn!("Not connected, dropping frame {}", frame),
                    None => return false,
                },
            }
        }
    }

    async fn session(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>, end: &mut TransportEnd) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();
        loop {
            tokio::select! {
                frame = end.outbound_rx.recv() => match frame {
                    Some(text) => {
                        debug!("Sending frame {}", text);
                        if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                            return SessionEnd::Lost(format!("send failed: {}", e));
                        }
                    }
                    None => {
                        end.set_state(ConnectionState::Closing);
                        if let Err(e) = write.send(WsMessage::Close(None)).await {
                            debug!("Close frame not sent: {}", e);
                        }
                        return SessionEnd::Shutdown;
                    }
                },
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(WsMessage::Text(text))) => text.as_str().to_string(),
                        Some(Ok(WsMessage::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                        Some(Ok(WsMessage::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("closed by server ({}): {}", f.code, f.reason.as_str()))
                                .unwrap_or_else(|| "closed by server".to_string());
                            return SessionEnd::Lost(reason);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                        None => return SessionEnd::Lost("stream ended".to_string()),
                    };
                    if end.events_tx.send(TransportEvent::Frame(text)).await.is_err() {
                        end.set_state(ConnectionState::Closing);
                        let _ = write.send(WsMessage::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }
            }
        }
    }
}
