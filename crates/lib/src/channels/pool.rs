//! Bot connection pool: one realtime connection per bot identity, inbound events fanned into one sink.

use crate::channels::inbound::BotEvent;
use crate::channels::rest::{ApiError, ChatApi, Session};
use crate::config::{BotConfig, BotCredential};
use crate::realtime::{ConnectionClient, ConnectionError, ConnectionOptions, ConnectionState, Login};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Buffer between one connection's reader and the pool's forwarder.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("unknown bot: {0}")]
    UnknownBot(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("no credential configured for bot {0}")]
    MissingCredential(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub username: String,
    pub display_name: Option<String>,
    pub agent_id: String,
}

impl From<&BotConfig> for BotIdentity {
    fn from(c: &BotConfig) -> Self {
        Self {
            username: c.username.clone(),
            display_name: c.display_name.clone(),
            agent_id: c.agent_id(),
        }
    }
}

/// Outbound operations the router needs, scoped by bot identity.
#[async_trait]
pub trait BotOutbound: Send + Sync {
    async fn send_text(
        &self,
        bot: &str,
        room_id: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<(), PoolError>;

    /// Best effort; never fails.
    async fn send_typing(&self, bot: &str, room_id: &str, typing: bool);

    /// Usernames of bots whose connection is currently open, in registration order.
    async fn connected_bots(&self) -> Vec<String>;

    /// Whether `username` is one of the registered bot identities.
    async fn is_bot(&self, username: &str) -> bool;
}

/// Per-identity record: who the bot is, its connection, and its REST session.
struct BotContext {
    identity: BotIdentity,
    client: ConnectionClient,
    session: Session,
}

pub struct BotConnectionPool {
    server_url: String,
    api: Arc<dyn ChatApi>,
    options: ConnectionOptions,
    bots: RwLock<Vec<Arc<BotContext>>>,
    /// Serializes registration so one identity never gets two sockets.
    add_lock: Mutex<()>,
    inbound_tx: mpsc::Sender<BotEvent>,
}

impl BotConnectionPool {
    pub fn new(
        server_url: impl Into<String>,
        api: Arc<dyn ChatApi>,
        options: ConnectionOptions,
        inbound_tx: mpsc::Sender<BotEvent>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            api,
            options,
            bots: RwLock::new(Vec::new()),
            add_lock: Mutex::new(()),
            inbound_tx,
        }
    }

    async fn get(&self, bot: &str) -> Option<Arc<BotContext>> {
        let g = self.bots.read().await;
        g.iter().find(|c| c.identity.username == bot).cloned()
    }

    /// Connect, authenticate and register a bot. Adding a known identity is a no-op.
    pub async fn add_bot(&self, identity: BotIdentity, credential: BotCredential) -> Result<(), PoolError> {
        let _guard = self.add_lock.lock().await;
        if self.get(&identity.username).await.is_some() {
            log::info!("pool: bot {} already registered", identity.username);
            return Ok(());
        }

        let session = match &credential {
            BotCredential::Password(password) => {
                self.api.authenticate(&identity.username, password).await?
            }
            BotCredential::Token { user_id, token } => Session {
                user_id: user_id.clone(),
                token: token.clone(),
            },
        };

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = ConnectionClient::connect(
            &self.server_url,
            identity.username.clone(),
            Login::from_credential(&identity.username, &credential),
            self.options.clone(),
            events_tx,
        )
        .await?;

        let inbound_tx = self.inbound_tx.clone();
        let bot = identity.username.clone();
        let agent_id = identity.agent_id.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let tagged = BotEvent {
                    bot: bot.clone(),
                    agent_id: agent_id.clone(),
                    event,
                };
                if inbound_tx.send(tagged).await.is_err() {
                    log::debug!("pool: router gone, stopping forwarder for {}", bot);
                    break;
                }
            }
        });

        let mut state_rx = client.watch_state();
        let bot = identity.username.clone();
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                log::info!("pool: {} is {}", bot, state.as_str());
                if state == ConnectionState::Disposed {
                    break;
                }
            }
        });

        log::info!("pool: bot {} connected (agent {})", identity.username, identity.agent_id);
        self.bots.write().await.push(Arc::new(BotContext {
            identity,
            client,
            session,
        }));
        Ok(())
    }

    /// Subscribe a bot to a room. Failures are logged, not raised.
    pub async fn subscribe_room(&self, bot: &str, room_id: &str) {
        let Some(ctx) = self.get(bot).await else {
            log::warn!("pool: cannot subscribe unknown bot {} to {}", bot, room_id);
            return;
        };
        match ctx.client.subscribe_room(room_id).await {
            Ok(()) => log::debug!("pool: {} subscribed to {}", bot, room_id),
            Err(e) => log::warn!("pool: {} failed to subscribe to {}: {}", bot, room_id, e),
        }
    }

    pub async fn subscribed_rooms(&self, bot: &str) -> Vec<String> {
        match self.get(bot).await {
            Some(ctx) => ctx.client.subscribed_rooms().await,
            None => Vec::new(),
        }
    }

    /// Send a message as `bot`. Returns the new message id.
    pub async fn send(
        &self,
        bot: &str,
        room_id: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<String, PoolError> {
        let ctx = self
            .get(bot)
            .await
            .ok_or_else(|| PoolError::UnknownBot(bot.to_string()))?;
        Ok(self
            .api
            .send_message(&ctx.session, room_id, text, thread_id)
            .await?)
    }

    /// Typing indicator over the bot's realtime connection. Errors are swallowed.
    pub async fn send_typing(&self, bot: &str, room_id: &str, typing: bool) {
        let Some(ctx) = self.get(bot).await else {
            return;
        };
        let params = vec![
            json!(format!("{}/typing", room_id)),
            json!(ctx.identity.username),
            json!(typing),
        ];
        if let Err(e) = ctx.client.call("stream-notify-room", params).await {
            log::debug!("pool: typing indicator for {} in {} failed: {}", bot, room_id, e);
        }
    }

    pub async fn list_connected_identities(&self) -> Vec<BotIdentity> {
        let g = self.bots.read().await;
        g.iter()
            .filter(|c| c.client.state() == ConnectionState::Open)
            .map(|c| c.identity.clone())
            .collect()
    }

    pub async fn identities(&self) -> Vec<BotIdentity> {
        let g = self.bots.read().await;
        g.iter().map(|c| c.identity.clone()).collect()
    }

    /// Lifecycle state of every registered bot, for status reporting.
    pub async fn bot_states(&self) -> Vec<(String, ConnectionState)> {
        let g = self.bots.read().await;
        g.iter()
            .map(|c| (c.identity.username.clone(), c.client.state()))
            .collect()
    }

    pub async fn list_existing_rooms(&self, bot: &str) -> Result<Vec<String>, PoolError> {
        let ctx = self
            .get(bot)
            .await
            .ok_or_else(|| PoolError::UnknownBot(bot.to_string()))?;
        Ok(self.api.list_existing_rooms(&ctx.session).await?)
    }

    pub async fn lookup_group(&self, bot: &str, name: &str) -> Result<String, PoolError> {
        let ctx = self
            .get(bot)
            .await
            .ok_or_else(|| PoolError::UnknownBot(bot.to_string()))?;
        Ok(self.api.lookup_group(&ctx.session, name).await?)
    }

    /// Shut down every connection and forget all bots.
    pub async fn shutdown_all(&self) {
        let bots: Vec<Arc<BotContext>> = self.bots.write().await.drain(..).collect();
        let shutdowns = bots.iter().map(|c| c.client.shutdown());
        futures_util::future::join_all(shutdowns).await;
        log::info!("pool: shut down {} bot connection(s)", bots.len());
    }
}

#[async_trait]
impl BotOutbound for BotConnectionPool {
    async fn send_text(
        &self,
        bot: &str,
        room_id: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<(), PoolError> {
        self.send(bot, room_id, text, thread_id).await.map(|_| ())
    }

    async fn send_typing(&self, bot: &str, room_id: &str, typing: bool) {
        BotConnectionPool::send_typing(self, bot, room_id, typing).await
    }

    async fn connected_bots(&self) -> Vec<String> {
        self.list_connected_identities()
            .await
            .into_iter()
            .map(|i| i.username)
            .collect()
    }

    async fn is_bot(&self, username: &str) -> bool {
        self.get(username).await.is_some()
    }
}
