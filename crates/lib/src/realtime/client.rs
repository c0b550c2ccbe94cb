//! Realtime connection client: one websocket per bot identity.
//!
//! A background task owns the socket and all protocol state (pending calls,
//! subscriptions, call-id counter). The public handle talks to it over a command
//! channel, so frames from one connection are always processed in arrival order.
//! On an unexpected close the task rejects every pending call, snapshots the
//! subscribed rooms, and reconnects with exponential backoff: handshake, login,
//! then re-subscribe the snapshot.

use crate::channels::InboundEvent;
use crate::config::{BotCredential, ConnectionConfig};
use crate::realtime::protocol::{error_text, room_messages, websocket_url, ClientFrame, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for connect + handshake + login + re-subscribe.
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of one connection. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Handshaking,
    Open,
    ReconnectWait,
    Disposed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Open => "open",
            ConnectionState::ReconnectWait => "reconnectWait",
            ConnectionState::Disposed => "disposed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("connection disposed")]
    Disposed,
    #[error("server rejected connection: {0}")]
    Rejected(String),
    #[error("login failed: {0}")]
    Auth(String),
    #[error("method error: {0}")]
    Method(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectionError::Auth(_))
    }
}

/// How the connection logs in after every handshake.
#[derive(Clone)]
pub enum Login {
    Password { username: String, password: String },
    Resume { token: String },
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Login::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Login::Resume { .. } => f.write_str("Resume(..)"),
        }
    }
}

impl Login {
    pub fn from_credential(username: &str, credential: &BotCredential) -> Self {
        match credential {
            BotCredential::Password(password) => Login::Password {
                username: username.to_string(),
                password: password.clone(),
            },
            BotCredential::Token { token, .. } => Login::Resume {
                token: token.clone(),
            },
        }
    }

    fn params(&self) -> Vec<Value> {
        match self {
            Login::Password { username, password } => {
                let digest = format!("{:x}", Sha256::digest(password.as_bytes()));
                vec![json!({
                    "user": { "username": username },
                    "password": { "digest": digest, "algorithm": "sha-256" }
                })]
            }
            Login::Resume { token } => vec![json!({ "resume": token })],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Interval between client pings while open. Zero disables keepalive.
    pub keepalive: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    /// Stop reconnecting after this many consecutive login failures. None = retry forever.
    pub max_auth_failures: Option<u32>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ConnectionOptions {
    fn from(c: &ConnectionConfig) -> Self {
        Self {
            keepalive: c.keepalive(),
            reconnect_min: c.reconnect_min(),
            reconnect_max: c.reconnect_max(),
            max_auth_failures: c.max_auth_failures,
        }
    }
}

/// Delay before reconnect attempt `attempt` (0-based): min * 2^attempt, capped at max.
pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    min.saturating_mul(factor).min(max)
}

enum Command {
    Call {
        method: String,
        params: Vec<Value>,
        reply: oneshot::Sender<Result<Value, ConnectionError>>,
    },
    Subscribe {
        room_id: String,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Unsubscribe {
        room_id: String,
    },
    Rooms {
        reply: oneshot::Sender<Vec<String>>,
    },
}

enum Pending {
    Call(oneshot::Sender<Result<Value, ConnectionError>>),
    Subscribe {
        room_id: String,
        reply: Option<oneshot::Sender<Result<(), ConnectionError>>>,
    },
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Handle to one bot's realtime connection. Dropping it shuts the connection down.
pub struct ConnectionClient {
    cmd_tx: mpsc::Sender<Command>,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionClient {
    /// Open the socket, handshake, and log in. Errors from this first attempt are returned
    /// and no reconnect is scheduled; after success, drops are recovered automatically.
    pub async fn connect(
        server_url: &str,
        label: impl Into<String>,
        login: Login,
        options: ConnectionOptions,
        events: mpsc::Sender<InboundEvent>,
    ) -> Result<Self, ConnectionError> {
        let label = label.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker = Worker {
            label,
            url: websocket_url(server_url),
            login,
            options,
            events,
            state: state_tx,
            next_id: 0,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
        };
        tokio::spawn(worker.run(cmd_rx, stop_rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                cmd_tx,
                stop_tx,
                state_rx,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Closed),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver for lifecycle changes (connectivity observers).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Invoke a server method and wait for its result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Call {
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|_| ConnectionError::Disposed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Subscribe to new messages in a room. Resolves once the server reports the subscription ready.
    pub async fn subscribe_room(&self, room_id: &str) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe {
                room_id: room_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| ConnectionError::Disposed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    pub async fn unsubscribe_room(&self, room_id: &str) -> Result<(), ConnectionError> {
        self.cmd_tx
            .send(Command::Unsubscribe {
                room_id: room_id.to_string(),
            })
            .await
            .map_err(|_| ConnectionError::Disposed)
    }

    /// Rooms with an active subscription (or awaiting restore while reconnecting).
    pub async fn subscribed_rooms(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Rooms { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop for good: pending calls are rejected, timers cancelled, socket closed, no reconnect.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        let mut state = self.state_rx.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Disposed).await;
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Resolves once shutdown is requested (or the handle is gone).
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

async fn send_frame(socket: &mut Socket, frame: &ClientFrame) -> Result<(), ConnectionError> {
    socket
        .send(Message::Text(frame.to_text()))
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))
}

struct Worker {
    label: String,
    url: String,
    login: Login,
    options: ConnectionOptions,
    events: mpsc::Sender<InboundEvent>,
    state: watch::Sender<ConnectionState>,
    next_id: u64,
    pending: HashMap<String, Pending>,
    /// subscription id -> room id
    subscriptions: HashMap<String, String>,
}

impl Worker {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut stop_rx: watch::Receiver<bool>,
        ready_tx: oneshot::Sender<Result<(), ConnectionError>>,
    ) {
        let first = tokio::select! {
            r = self.establish(&[]) => r,
            _ = stopped(&mut stop_rx) => Err(ConnectionError::Disposed),
        };
        let mut socket = match first {
            Ok(socket) => {
                log::info!("ddp[{}]: connected", self.label);
                let _ = ready_tx.send(Ok(()));
                socket
            }
            Err(e) => {
                self.finish(&mut cmd_rx);
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let mut attempt: u32 = 0;
        let mut auth_failures: u32 = 0;
        loop {
            match self.serve(&mut socket, &mut cmd_rx, &mut stop_rx).await {
                SessionEnd::Shutdown => {
                    let _ = socket.close(None).await;
                    break;
                }
                SessionEnd::Lost(reason) => {
                    log::warn!("ddp[{}]: connection lost: {}", self.label, reason);
                    let mut rooms = self.teardown();
                    loop {
                        let delay = backoff_delay(
                            attempt,
                            self.options.reconnect_min,
                            self.options.reconnect_max,
                        );
                        attempt = attempt.saturating_add(1);
                        self.set_state(ConnectionState::ReconnectWait);
                        log::info!(
                            "ddp[{}]: reconnecting in {:?} (attempt {})",
                            self.label,
                            delay,
                            attempt
                        );
                        if !self
                            .wait_backoff(delay, &mut rooms, &mut cmd_rx, &mut stop_rx)
                            .await
                        {
                            self.finish(&mut cmd_rx);
                            return;
                        }
                        let result = tokio::select! {
                            r = self.establish(&rooms) => r,
                            _ = stopped(&mut stop_rx) => {
                                self.finish(&mut cmd_rx);
                                return;
                            }
                        };
                        match result {
                            Ok(s) => {
                                log::info!(
                                    "ddp[{}]: reconnected, restored {} subscription(s)",
                                    self.label,
                                    self.subscriptions.len()
                                );
                                socket = s;
                                attempt = 0;
                                auth_failures = 0;
                                break;
                            }
                            Err(e) => {
                                self.reject_pending(ConnectionError::Closed);
                                self.subscriptions.clear();
                                if e.is_auth() {
                                    auth_failures += 1;
                                    if let Some(max) = self.options.max_auth_failures {
                                        if auth_failures >= max {
                                            log::error!(
                                                "ddp[{}]: giving up after {} consecutive login failures: {}",
                                                self.label,
                                                auth_failures,
                                                e
                                            );
                                            self.finish(&mut cmd_rx);
                                            return;
                                        }
                                    }
                                } else {
                                    auth_failures = 0;
                                }
                                log::warn!("ddp[{}]: reconnect failed: {}", self.label, e);
                            }
                        }
                    }
                }
            }
        }
        self.finish(&mut cmd_rx);
        log::info!("ddp[{}]: disposed", self.label);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn reject_pending(&mut self, error: ConnectionError) {
        for (_, pending) in self.pending.drain() {
            match pending {
                Pending::Call(reply) => {
                    let _ = reply.send(Err(error.clone()));
                }
                Pending::Subscribe {
                    reply: Some(reply), ..
                } => {
                    let _ = reply.send(Err(error.clone()));
                }
                Pending::Subscribe { reply: None, .. } => {}
            }
        }
    }

    /// Reject in-flight calls and return the rooms that were subscribed before the drop.
    fn teardown(&mut self) -> Vec<String> {
        self.reject_pending(ConnectionError::Closed);
        let rooms: BTreeSet<String> = self.subscriptions.drain().map(|(_, room)| room).collect();
        rooms.into_iter().collect()
    }

    /// Stop accepting commands, reject the queued ones, then dispose.
    fn finish(&mut self, cmd_rx: &mut mpsc::Receiver<Command>) {
        cmd_rx.close();
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Command::Call { reply, .. } => {
                    let _ = reply.send(Err(ConnectionError::Disposed));
                }
                Command::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(ConnectionError::Disposed));
                }
                Command::Rooms { reply } => {
                    let _ = reply.send(Vec::new());
                }
                Command::Unsubscribe { .. } => {}
            }
        }
        self.dispose();
    }

    fn dispose(&mut self) {
        self.reject_pending(ConnectionError::Disposed);
        self.subscriptions.clear();
        self.set_state(ConnectionState::Disposed);
    }

    fn active_rooms(&self) -> Vec<String> {
        let rooms: BTreeSet<&String> = self.subscriptions.values().collect();
        rooms.into_iter().cloned().collect()
    }

    fn is_subscribed(&self, room_id: &str) -> bool {
        self.subscriptions.values().any(|r| r == room_id)
            || self.pending.values().any(
                |p| matches!(p, Pending::Subscribe { room_id: r, .. } if r == room_id),
            )
    }

    /// Sleep out the backoff delay while answering commands. Returns false on shutdown.
    async fn wait_backoff(
        &mut self,
        delay: Duration,
        rooms: &mut Vec<String>,
        cmd_rx: &mut mpsc::Receiver<Command>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = stopped(stop_rx) => return false,
                _ = &mut sleep => return true,
                cmd = cmd_rx.recv() => match cmd {
                    None => return false,
                    Some(Command::Call { reply, .. }) => {
                        let _ = reply.send(Err(ConnectionError::NotConnected));
                    }
                    Some(Command::Subscribe { reply, .. }) => {
                        let _ = reply.send(Err(ConnectionError::NotConnected));
                    }
                    Some(Command::Unsubscribe { room_id }) => {
                        rooms.retain(|r| r != &room_id);
                    }
                    Some(Command::Rooms { reply }) => {
                        let _ = reply.send(rooms.clone());
                    }
                },
            }
        }
    }

    async fn establish(&mut self, rooms: &[String]) -> Result<Socket, ConnectionError> {
        match tokio::time::timeout(ESTABLISH_TIMEOUT, self.establish_inner(rooms)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Transport(format!(
                "no handshake within {:?}",
                ESTABLISH_TIMEOUT
            ))),
        }
    }

    async fn establish_inner(&mut self, rooms: &[String]) -> Result<Socket, ConnectionError> {
        self.set_state(ConnectionState::Connecting);
        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        self.set_state(ConnectionState::Handshaking);
        send_frame(&mut socket, &ClientFrame::connect()).await?;
        loop {
            match self.next_frame(&mut socket).await? {
                ServerFrame::Connected { .. } => break,
                ServerFrame::Failed { version } => {
                    return Err(ConnectionError::Rejected(format!(
                        "protocol negotiation failed (server version {})",
                        version.as_deref().unwrap_or("unknown")
                    )));
                }
                other => self.handle_frame(&mut socket, other).await?,
            }
        }

        let login_id = self.next_id();
        send_frame(
            &mut socket,
            &ClientFrame::Method {
                id: login_id.clone(),
                method: "login".to_string(),
                params: self.login.params(),
            },
        )
        .await?;
        loop {
            match self.next_frame(&mut socket).await? {
                ServerFrame::Result { id, error, .. } if id == login_id => {
                    if let Some(error) = error {
                        return Err(ConnectionError::Auth(error_text(&error)));
                    }
                    break;
                }
                other => self.handle_frame(&mut socket, other).await?,
            }
        }

        for room_id in rooms {
            let id = self.next_id();
            self.pending.insert(
                id.clone(),
                Pending::Subscribe {
                    room_id: room_id.clone(),
                    reply: None,
                },
            );
            send_frame(&mut socket, &ClientFrame::subscribe_room(id, room_id)).await?;
        }
        while self
            .pending
            .values()
            .any(|p| matches!(p, Pending::Subscribe { .. }))
        {
            let frame = self.next_frame(&mut socket).await?;
            self.handle_frame(&mut socket, frame).await?;
        }
        Ok(socket)
    }

    /// Read until the next parseable protocol frame, answering transport pings on the way.
    async fn next_frame(&mut self, socket: &mut Socket) -> Result<ServerFrame, ConnectionError> {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => match ServerFrame::parse(&text) {
                    Ok(frame) => return Ok(frame),
                    Err(e) => log::debug!("ddp[{}]: dropping malformed frame: {}", self.label, e),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = socket.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
            }
        }
    }

    /// Serve an open connection until shutdown or until the socket is lost.
    async fn serve(
        &mut self,
        socket: &mut Socket,
        cmd_rx: &mut mpsc::Receiver<Command>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        self.set_state(ConnectionState::Open);
        let keepalive_enabled = !self.options.keepalive.is_zero();
        let period = if keepalive_enabled {
            self.options.keepalive
        } else {
            Duration::from_secs(3600)
        };
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = stopped(stop_rx) => return SessionEnd::Shutdown,
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return SessionEnd::Shutdown };
                    if let Err(e) = self.handle_command(socket, cmd).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                _ = keepalive.tick(), if keepalive_enabled => {
                    if let Err(e) = send_frame(socket, &ClientFrame::Ping { id: None }).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                msg = socket.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match ServerFrame::parse(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::debug!("ddp[{}]: dropping malformed frame: {}", self.label, e);
                                continue;
                            }
                        };
                        if let Err(e) = self.handle_frame(socket, frame).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Lost("closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                },
            }
        }
    }

    async fn handle_command(&mut self, socket: &mut Socket, cmd: Command) -> Result<(), ConnectionError> {
        match cmd {
            Command::Call {
                method,
                params,
                reply,
            } => {
                let id = self.next_id();
                self.pending.insert(id.clone(), Pending::Call(reply));
                send_frame(socket, &ClientFrame::Method { id, method, params }).await
            }
            Command::Subscribe { room_id, reply } => {
                if self.is_subscribed(&room_id) {
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }
                let id = self.next_id();
                let frame = ClientFrame::subscribe_room(id.clone(), &room_id);
                self.pending.insert(
                    id,
                    Pending::Subscribe {
                        room_id,
                        reply: Some(reply),
                    },
                );
                send_frame(socket, &frame).await
            }
            Command::Unsubscribe { room_id } => {
                let ids: Vec<String> = self
                    .subscriptions
                    .iter()
                    .filter(|(_, r)| **r == room_id)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in ids {
                    self.subscriptions.remove(&id);
                    send_frame(socket, &ClientFrame::Unsub { id }).await?;
                }
                Ok(())
            }
            Command::Rooms { reply } => {
                let _ = reply.send(self.active_rooms());
                Ok(())
            }
        }
    }

    async fn handle_frame(&mut self, socket: &mut Socket, frame: ServerFrame) -> Result<(), ConnectionError> {
        match frame {
            ServerFrame::Ping { id } => {
                send_frame(socket, &ClientFrame::Pong { id }).await?;
            }
            ServerFrame::Pong { .. } => {}
            ServerFrame::Result { id, result, error } => match self.pending.remove(&id) {
                Some(Pending::Call(reply)) => {
                    let outcome = match error {
                        Some(error) => Err(ConnectionError::Method(error_text(&error))),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    let _ = reply.send(outcome);
                }
                Some(other) => {
                    self.pending.insert(id, other);
                }
                None => log::debug!("ddp[{}]: result for unknown call {}", self.label, id),
            },
            ServerFrame::Ready { subs } => {
                for id in subs {
                    match self.pending.remove(&id) {
                        Some(Pending::Subscribe { room_id, reply }) => {
                            log::debug!("ddp[{}]: subscribed to {}", self.label, room_id);
                            self.subscriptions.insert(id, room_id);
                            if let Some(reply) = reply {
                                let _ = reply.send(Ok(()));
                            }
                        }
                        Some(other) => {
                            self.pending.insert(id, other);
                        }
                        None => {}
                    }
                }
            }
            ServerFrame::Nosub { id, error } => {
                let reason = error
                    .as_ref()
                    .map(error_text)
                    .unwrap_or_else(|| "subscription ended".to_string());
                match self.pending.remove(&id) {
                    Some(Pending::Subscribe { room_id, reply }) => {
                        log::warn!("ddp[{}]: subscribe to {} failed: {}", self.label, room_id, reason);
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(ConnectionError::Subscription(reason)));
                        }
                    }
                    Some(other) => {
                        self.pending.insert(id, other);
                    }
                    None => {
                        if let Some(room_id) = self.subscriptions.remove(&id) {
                            log::warn!("ddp[{}]: server ended subscription to {}: {}", self.label, room_id, reason);
                        }
                    }
                }
            }
            ServerFrame::Changed { collection, fields } => {
                for event in room_messages(&collection, &fields) {
                    if self.events.send(event).await.is_err() {
                        log::debug!("ddp[{}]: event receiver closed, dropping message", self.label);
                    }
                }
            }
            ServerFrame::Connected { .. } | ServerFrame::Failed { .. } | ServerFrame::Other => {}
        }
        Ok(())
    }
}
