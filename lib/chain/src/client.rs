//! Solana pubsub websocket client.
//!
//! One background task owns the socket. Callers talk to it over a command
//! channel and receive [`ChainEvent`]s on the channel returned by
//! [`SolanaPubsubClient::connect`]. When the socket drops the task reconnects
//! with backoff, forgets every subscription and emits
//! [`ChainEvent::Reconnected`]; re-subscribing is the consumer's job.

use crate::error::ChainError;
use crate::reconnect::{ReconnectConfig, next_delay};
use crate::rpc::{Incoming, parse_frame, request_frame};
use crate::subscriber::{
    ChainEvent, ChainNotification, ChainSubscriber, SubscriptionHandle, SubscriptionRequest,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rootcause::Report;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the command and event channels.
const CHANNEL_CAPACITY: usize = 1024;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct PubsubConfig {
    /// Websocket endpoint, e.g. `wss://api.mainnet-beta.solana.com`.
    pub ws_url: String,
    /// Commitment level for every subscription.
    pub commitment: String,
    /// How long a subscribe waits for the node's reply.
    pub request_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl PubsubConfig {
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            commitment: "confirmed".to_string(),
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

type Reply = oneshot::Sender<Result<(), Report<ChainError>>>;

enum Command {
    Subscribe {
        handle: SubscriptionHandle,
        request: SubscriptionRequest,
        reply: Reply,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
    },
}

/// Handle to the pubsub connection task.
pub struct SolanaPubsubClient {
    commands: mpsc::Sender<Command>,
    next_handle: AtomicU64,
    request_timeout: Duration,
}

impl SolanaPubsubClient {
    /// Opens the websocket and spawns the connection task.
    ///
    /// The task stops when `cancel` fires or the client is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection attempt fails.
    pub async fn connect(
        config: PubsubConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<ChainEvent>), Report<ChainError>> {
        let ws = open(&config.ws_url).await?;
        info!(url = %config.ws_url, "connected to solana pubsub");

        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let client = Self {
            commands: command_tx,
            next_handle: AtomicU64::new(1),
            request_timeout: config.request_timeout,
        };

        let connection = Connection {
            config,
            events: event_tx,
            next_request_id: 1,
            pending: HashMap::new(),
            active: HashMap::new(),
            by_handle: HashMap::new(),
        };
        tokio::spawn(connection.run(ws, command_rx, cancel));

        Ok((client, event_rx))
    }
}

#[async_trait]
impl ChainSubscriber for SolanaPubsubClient {
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<SubscriptionHandle, Report<ChainError>> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                handle,
                request,
                reply,
            })
            .await
            .map_err(|_| ChainError::Closed)?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Err(_) => Err(ChainError::Timeout.into()),
            Ok(Err(_)) => Err(ChainError::Disconnected.into()),
            Ok(Ok(result)) => result.map(|()| handle),
        }
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), Report<ChainError>> {
        self.commands
            .send(Command::Unsubscribe { handle })
            .await
            .map_err(|_| ChainError::Closed)?;
        Ok(())
    }
}

async fn open(url: &str) -> Result<WsStream, Report<ChainError>> {
    let (ws, _response) = connect_async(url)
        .await
        .map_err(|e| ChainError::ConnectionFailed {
            reason: e.to_string(),
        })?;
    Ok(ws)
}

struct PendingSubscribe {
    handle: SubscriptionHandle,
    request: SubscriptionRequest,
    reply: Reply,
}

enum Served {
    Stopped,
    Lost(String),
}

/// State owned by the connection task.
struct Connection {
    config: PubsubConfig,
    events: mpsc::Sender<ChainEvent>,
    next_request_id: u64,
    /// Subscribe requests awaiting the node's reply, by request id.
    pending: HashMap<u64, PendingSubscribe>,
    /// Server subscription id to local handle.
    active: HashMap<u64, SubscriptionHandle>,
    /// Local handle to server subscription id and unsubscribe method.
    by_handle: HashMap<SubscriptionHandle, (u64, &'static str)>,
}

impl Connection {
    async fn run(
        mut self,
        mut ws: WsStream,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) {
        loop {
            match self.serve(&mut ws, &mut commands, &cancel).await {
                Served::Stopped => break,
                Served::Lost(reason) => {
                    warn!(reason = %reason, "solana pubsub connection lost");
                    self.forget_all();
                    match self.reconnect(&cancel).await {
                        Some(fresh) => ws = fresh,
                        None => break,
                    }
                    if self.events.send(ChainEvent::Reconnected).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!("solana pubsub connection stopped");
    }

    async fn serve(
        &mut self,
        ws: &mut WsStream,
        commands: &mut mpsc::Receiver<Command>,
        cancel: &CancellationToken,
    ) -> Served {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Served::Stopped;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        let _ = ws.close(None).await;
                        return Served::Stopped;
                    };
                    if let Err(reason) = self.handle_command(ws, command).await {
                        return Served::Lost(reason);
                    }
                }
                frame = ws.next() => match frame {
                    None => return Served::Lost("stream ended".to_string()),
                    Some(Err(e)) => return Served::Lost(e.to_string()),
                    Some(Ok(Message::Text(text))) => {
                        if let Err(reason) = self.handle_text(ws, &text).await {
                            return Served::Lost(reason);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Served::Lost("closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    async fn handle_command(&mut self, ws: &mut WsStream, command: Command) -> Result<(), String> {
        match command {
            Command::Subscribe {
                handle,
                request,
                reply,
            } => {
                let id = self.request_id();
                let frame = request_frame(
                    id,
                    request.subscribe_method(),
                    &request.params(&self.config.commitment),
                );
                if let Err(e) = ws.send(Message::Text(frame)).await {
                    let _ = reply.send(Err(ChainError::Disconnected.into()));
                    return Err(e.to_string());
                }
                self.pending.insert(
                    id,
                    PendingSubscribe {
                        handle,
                        request,
                        reply,
                    },
                );
            }
            Command::Unsubscribe { handle } => {
                if let Some((server_id, method)) = self.by_handle.remove(&handle) {
                    self.active.remove(&server_id);
                    self.send_unsubscribe(ws, server_id, method).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_text(&mut self, ws: &mut WsStream, text: &str) -> Result<(), String> {
        let incoming = match parse_frame(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                debug!(error = %e, "ignoring frame");
                return Ok(());
            }
        };

        match incoming {
            Incoming::Response { id, result } => {
                let Some(pending) = self.pending.remove(&id) else {
                    return Ok(());
                };
                let Some(server_id) = result.as_u64() else {
                    let _ = pending.reply.send(Err(ChainError::Protocol {
                        reason: format!("subscription id is not a number: {result}"),
                    }
                    .into()));
                    return Ok(());
                };
                let method = pending.request.unsubscribe_method();
                if pending.reply.send(Ok(())).is_err() {
                    // The caller timed out; nobody holds this handle.
                    return self.send_unsubscribe(ws, server_id, method).await;
                }
                self.active.insert(server_id, pending.handle);
                self.by_handle.insert(pending.handle, (server_id, method));
                debug!(handle = %pending.handle, server_id, "subscription confirmed");
            }
            Incoming::Error { id, code, message } => {
                if let Some(pending) = self.pending.remove(&id) {
                    let _ = pending.reply.send(Err(ChainError::Rpc { code, message }.into()));
                }
            }
            Incoming::Notification {
                subscription,
                slot,
                value,
            } => {
                let Some(&handle) = self.active.get(&subscription) else {
                    return Ok(());
                };
                let event = ChainEvent::Notification(ChainNotification {
                    handle,
                    slot,
                    payload: value,
                });
                if self.events.send(event).await.is_err() {
                    debug!("event receiver dropped");
                }
            }
        }
        Ok(())
    }

    async fn send_unsubscribe(
        &mut self,
        ws: &mut WsStream,
        server_id: u64,
        method: &str,
    ) -> Result<(), String> {
        let id = self.request_id();
        ws.send(Message::Text(request_frame(id, method, &json!([server_id]))))
            .await
            .map_err(|e| e.to_string())
    }

    fn request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn forget_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(ChainError::Disconnected.into()));
        }
        self.active.clear();
        self.by_handle.clear();
    }

    async fn reconnect(&self, cancel: &CancellationToken) -> Option<WsStream> {
        let mut delay = self.config.reconnect.initial_delay;
        let mut attempt = 0u32;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
            match open(&self.config.ws_url).await {
                Ok(ws) => {
                    info!(attempt, "reconnected to solana pubsub");
                    return Some(ws);
                }
                Err(e) => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e.current_context(), "reconnect attempt failed");
                }
            }
            delay = next_delay(delay, &self.config.reconnect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = PubsubConfig::new("wss://api.devnet.solana.com");
        assert_eq!(config.commitment, "confirmed");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_fast() {
        let result = SolanaPubsubClient::connect(
            PubsubConfig::new("ws://127.0.0.1:1"),
            CancellationToken::new(),
        )
        .await;

        let err = result.err().expect("nothing listens on port 1");
        assert!(matches!(
            err.current_context(),
            ChainError::ConnectionFailed { .. }
        ));
    }
}
