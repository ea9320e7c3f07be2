//! Reconnecting session channel.
//!
//! A single supervised task owns the physical socket. Consumers only ever see
//! one logical stream of [`ChannelEvent`]s and one outbound queue; the socket
//! underneath may be replaced any number of times. Each replacement is
//! announced with [`ChannelEvent::Reconnected`] because ordering and room
//! membership do not survive the gap.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientRequest, ServerEvent};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{backoff::Backoff, error::ChannelError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub server_url: String,
    pub token: String,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive failed attempts before the channel gives up. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub outbound_capacity: usize,
    pub event_capacity: usize,
}

impl ChannelConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            max_attempts: Some(12),
            outbound_capacity: 64,
            event_capacity: 256,
        }
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// `http(s)://host/base` becomes `ws(s)://host/base/ws?token=...`.
    pub fn ws_url(&self) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.server_url)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ChannelError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| ChannelError::UnsupportedScheme(scheme.to_string()))?;
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut().clear().append_pair("token", &self.token);
        Ok(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Event(ServerEvent),
    /// A new physical connection replaced a lost one.
    Reconnected,
    /// The gateway refused the credentials. Terminal.
    AuthRejected,
}

/// Outbound half of the channel, as seen by the client orchestrator.
#[async_trait]
pub trait RequestSink: Send + Sync {
    async fn send(&self, request: ClientRequest) -> Result<(), ChannelError>;
}

pub struct SessionChannel;

impl SessionChannel {
    pub fn connect(config: ChannelConfig) -> Result<ChannelHandle, ChannelError> {
        let url = config.ws_url()?;
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backoff = Backoff::new(config.backoff_base, config.backoff_max, config.max_attempts);

        let task = tokio::spawn(supervise(
            url,
            backoff,
            outbound_rx,
            events_tx,
            state_tx,
            shutdown_rx,
        ));
        Ok(ChannelHandle {
            outbound: outbound_tx,
            events: Some(events_rx),
            state: state_rx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

pub struct ChannelHandle {
    outbound: mpsc::Sender<ClientRequest>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Inbound event stream. Can be taken once.
    pub fn events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.events.take()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Requests queue while the socket is being replaced and flush once it is open.
    pub async fn send(&self, request: ClientRequest) -> Result<(), ChannelError> {
        if self.current_state() == ConnectionState::Closed {
            return Err(ChannelError::Closed);
        }
        self.outbound
            .send(request)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    pub fn disconnect(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once the channel reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        while *state.borrow_and_update() != ConnectionState::Closed {
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if self.current_state() != ConnectionState::Closed {
            self.task.abort();
        }
    }
}

#[async_trait]
impl RequestSink for ChannelHandle {
    async fn send(&self, request: ClientRequest) -> Result<(), ChannelError> {
        ChannelHandle::send(self, request).await
    }
}

enum ConnectionEnd {
    Lost,
    Shutdown,
}

async fn supervise(
    url: Url,
    mut backoff: Backoff,
    mut outbound_rx: mpsc::Receiver<ClientRequest>,
    events_tx: mpsc::Sender<ChannelEvent>,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connected_before = false;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        state_tx.send_replace(ConnectionState::Connecting);

        let attempt = tokio::select! {
            attempt = connect_async(url.as_str()) => attempt,
            _ = shutdown_rx.changed() => break,
        };
        match attempt {
            Ok((socket, _)) => {
                backoff.reset();
                state_tx.send_replace(ConnectionState::Open);
                info!(reconnect = connected_before, "channel open");
                if connected_before && events_tx.send(ChannelEvent::Reconnected).await.is_err() {
                    break;
                }
                connected_before = true;
                match run_connection(socket, &mut outbound_rx, &events_tx, &mut shutdown_rx).await {
                    ConnectionEnd::Shutdown => break,
                    ConnectionEnd::Lost => info!("channel connection lost"),
                }
            }
            Err(tungstenite::Error::Http(response))
                if response.status() == tungstenite::http::StatusCode::UNAUTHORIZED =>
            {
                warn!("gateway rejected session credentials");
                let _ = events_tx.send(ChannelEvent::AuthRejected).await;
                break;
            }
            Err(error) => {
                debug!(%error, attempt = backoff.attempts() + 1, "channel connect failed");
            }
        }

        let Some(delay) = backoff.next_delay() else {
            warn!(attempts = backoff.attempts(), "channel giving up after repeated failures");
            break;
        };
        state_tx.send_replace(ConnectionState::Connecting);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
    state_tx.send_replace(ConnectionState::Closed);
}

async fn run_connection(
    socket: Socket,
    outbound_rx: &mut mpsc::Receiver<ClientRequest>,
    events_tx: &mpsc::Sender<ChannelEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (mut writer, mut reader) = socket.split();
    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if events_tx.send(ChannelEvent::Event(event)).await.is_err() {
                            let _ = writer.send(Message::Close(None)).await;
                            return ConnectionEnd::Shutdown;
                        }
                    }
                    Err(error) => warn!(%error, "ignoring undecodable server frame"),
                },
                Some(Ok(Message::Close(_))) | None => return ConnectionEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(%error, "channel read failed");
                    return ConnectionEnd::Lost;
                }
            },
            request = outbound_rx.recv() => {
                let Some(request) = request else {
                    let _ = writer.send(Message::Close(None)).await;
                    return ConnectionEnd::Shutdown;
                };
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(%error, request = request.name(), "failed to encode client request");
                        continue;
                    }
                };
                if let Err(error) = writer.send(Message::Text(text)).await {
                    debug!(%error, request = request.name(), "channel write failed");
                    return ConnectionEnd::Lost;
                }
            },
            _ = shutdown_rx.changed() => {
                let _ = writer.send(Message::Close(None)).await;
                return ConnectionEnd::Shutdown;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
