//! Connection manager for the persistent push socket.
//!
//! Owns at most one live transport. Handles the authenticated handshake,
//! bounded-backoff reconnection on transport loss, and teardown. Every
//! decoded push frame is forwarded verbatim on one channel; the runtime
//! fans it out to the cache and the unread tracker. The manager never
//! mutates the cache and never refreshes credentials itself: an auth
//! rejection parks it in `AuthFailed` until it is restarted with a fresh
//! token.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::BackoffConfig;
use crate::error::SocketError;
use crate::socket::PushEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Handshake rejected the credential; waiting for a restart with a
    /// fresh one.
    AuthFailed,
}

/// One live push stream. `None` from `next_event` means the transport
/// closed cleanly; errors mean it broke.
#[async_trait]
pub trait PushStream: Send {
    async fn next_event(&mut self) -> Result<Option<PushEvent>, SocketError>;
}

/// Opens transports. Split from the manager so tests can script
/// connection outcomes without a server.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn PushStream>, SocketError>;
}

/// Production transport over tokio-tungstenite.
pub struct WsTransport;

#[async_trait]
impl SocketTransport for WsTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn PushStream>, SocketError> {
        let url = format!("{url}?token={token}");
        let (ws, _resp) = connect_async(url)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))?;
        Ok(Box::new(WsPushStream { ws }))
    }
}

struct WsPushStream {
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl PushStream for WsPushStream {
    async fn next_event(&mut self) -> Result<Option<PushEvent>, SocketError> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<PushEvent>(&text) {
                    Ok(event) => return Ok(Some(event)),
                    Err(err) => {
                        // Unknown frames are skipped, not fatal
                        warn!("undecodable push frame: {err}");
                    }
                },
                Ok(WsMessage::Ping(payload)) => {
                    let _ = self.ws.send(WsMessage::Pong(payload)).await;
                }
                Ok(WsMessage::Close(_)) => return Ok(None),
                Ok(_) => {}
                Err(err) => return Err(SocketError::Transport(err.to_string())),
            }
        }
        Ok(None)
    }
}

pub struct ConnectionManager {
    socket_url: String,
    backoff: BackoffConfig,
    transport: Arc<dyn SocketTransport>,
    events_tx: mpsc::UnboundedSender<PushEvent>,
    state_tx: watch::Sender<ConnectionState>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        socket_url: impl Into<String>,
        backoff: BackoffConfig,
        transport: Arc<dyn SocketTransport>,
        events_tx: mpsc::UnboundedSender<PushEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            socket_url: socket_url.into(),
            backoff,
            transport,
            events_tx,
            state_tx,
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Connectivity signal for the UI collaborator.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Start (or restart) the connection with the given access token.
    ///
    /// A no-op while a healthy connected task is running. Otherwise the
    /// old task is torn down before the new one spawns, so there is never
    /// more than one live transport.
    pub fn start(&self, token: impl Into<String>) {
        let mut task = self.task.lock();

        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() && self.state() == ConnectionState::Connected {
                debug!("socket already connected, ignoring start");
                return;
            }
            debug!("restarting socket connection task");
            handle.abort();
        }

        let token = token.into();
        let url = self.socket_url.clone();
        let backoff = self.backoff.clone();
        let transport = self.transport.clone();
        let events_tx = self.events_tx.clone();
        let state_tx = self.state_tx.clone();

        *task = Some(tokio::spawn(async move {
            run_connection(url, token, backoff, transport, events_tx, state_tx).await;
        }));
    }

    /// Tear down the transport. The next `start()` performs a fresh
    /// handshake.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("push socket stopped");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

async fn run_connection(
    url: String,
    token: String,
    backoff: BackoffConfig,
    transport: Arc<dyn SocketTransport>,
    events_tx: mpsc::UnboundedSender<PushEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut attempt: u32 = 0;
    let mut delay = backoff.initial_delay;

    loop {
        state_tx.send_replace(ConnectionState::Connecting);

        match transport.connect(&url, &token).await {
            Ok(mut stream) => match stream.next_event().await {
                // Handshake accepted
                Ok(Some(PushEvent::Connect)) => {
                    info!("push socket connected");
                    state_tx.send_replace(ConnectionState::Connected);
                    let _ = events_tx.send(PushEvent::Connect);
                    attempt = 0;
                    delay = backoff.initial_delay;

                    if !read_until_lost(&mut stream, &events_tx).await {
                        // Auth rejection mid-stream: park and wait for a
                        // restart with a fresh credential
                        state_tx.send_replace(ConnectionState::AuthFailed);
                        return;
                    }
                    let _ = events_tx.send(PushEvent::Disconnect {
                        reason: "transport lost".to_string(),
                    });
                }
                // Handshake rejected
                Ok(Some(PushEvent::ConnectError { message })) => {
                    warn!("push handshake rejected: {message}");
                    state_tx.send_replace(ConnectionState::AuthFailed);
                    let _ = events_tx.send(PushEvent::ConnectError { message });
                    return;
                }
                Ok(Some(other)) => {
                    warn!("unexpected first frame: {other:?}");
                }
                Ok(None) => debug!("transport closed before handshake"),
                Err(err) => debug!("handshake transport error: {err}"),
            },
            Err(SocketError::AuthRejected(message)) => {
                warn!("push handshake rejected: {message}");
                state_tx.send_replace(ConnectionState::AuthFailed);
                let _ = events_tx.send(PushEvent::ConnectError { message });
                return;
            }
            Err(err) => debug!("socket connect failed: {err}"),
        }

        attempt += 1;
        if attempt >= backoff.max_attempts {
            warn!("push socket gave up after {attempt} attempts");
            state_tx.send_replace(ConnectionState::Disconnected);
            let _ = events_tx.send(PushEvent::Disconnect {
                reason: format!("gave up after {attempt} attempts"),
            });
            return;
        }

        debug!("reconnecting in {delay:?} (attempt {attempt})");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(backoff.max_delay);
    }
}

/// Forward events until the transport drops. Returns false if the server
/// revoked authentication mid-stream.
async fn read_until_lost(
    stream: &mut Box<dyn PushStream>,
    events_tx: &mpsc::UnboundedSender<PushEvent>,
) -> bool {
    loop {
        match stream.next_event().await {
            Ok(Some(PushEvent::ConnectError { message })) => {
                warn!("server revoked authentication: {message}");
                let _ = events_tx.send(PushEvent::ConnectError { message });
                return false;
            }
            Ok(Some(event)) => {
                if events_tx.send(event).is_err() {
                    debug!("push event receiver dropped");
                    return true;
                }
            }
            Ok(None) => {
                info!("push socket disconnected");
                return true;
            }
            Err(err) => {
                warn!("push stream error: {err}");
                return true;
            }
        }
    }
}
