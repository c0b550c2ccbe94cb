//! Message router: decides per inbound event whether and how it reaches the agent,
//! and delivers the agent's replies back to the room.
//!
//! Pipeline per event: self/peer filter, dedup, visibility policy (with history
//! buffering for messages that are not forwarded), command interception, history
//! flush, dispatch. Replies are chunked and sent in order through the same bot.

mod chunk;
mod commands;
mod dedup;
mod history;
mod policy;
mod target;

pub use chunk::chunk_text;
pub use commands::{CommandOutcome, CommandTable};
pub use dedup::{dedup_key, DedupSet};
pub use history::{HistoryEntry, RoomHistory};
pub use policy::{decide, PolicyTable, RoomPolicy, Visibility};
pub use target::{parse_target, OutboundTarget};

use crate::channels::{BotEvent, BotOutbound, PoolError};
use crate::config::RouterConfig;
use crate::dispatch::{session_key, ChatType, DispatchAdapter, DispatchError, NormalizedRequest, ReplySink};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

const DELIVERY_CHANNEL_CAPACITY: usize = 32;

const NOTICE_UNAVAILABLE: &str = "Sorry, no agent is available to answer right now.";
const NOTICE_FAILED: &str = "Sorry, something went wrong while processing your message.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Sent by the receiving bot itself.
    OwnMessage,
    /// Sent by another registered bot.
    PeerBot,
    System,
    Empty,
    Duplicate,
    /// Receiving bot is not a member of the group room.
    NotMember,
}

#[derive(Debug)]
pub enum RouteOutcome {
    Dropped(DropReason),
    /// Not forwarded; kept as room history.
    Buffered,
    /// Answered by the router without the agent; the task finishes once the reply is sent.
    LocalReply(JoinHandle<()>),
    /// Submitted to the agent; the task finishes after the last reply chunk is sent.
    Dispatched(JoinHandle<()>),
}

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("no connected bot to send as")]
    NoBot,
    #[error("no room given for bot {0}")]
    NoRoom(String),
    #[error(transparent)]
    Send(#[from] PoolError),
}

struct Inner {
    max_message_length: usize,
    commands: CommandTable,
    outbound: Arc<dyn BotOutbound>,
    dispatcher: Arc<dyn DispatchAdapter>,
    dedup: Mutex<DedupSet>,
    history: Mutex<RoomHistory>,
    policies: RwLock<PolicyTable>,
}

#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

impl Router {
    pub fn new(
        config: &RouterConfig,
        outbound: Arc<dyn BotOutbound>,
        dispatcher: Arc<dyn DispatchAdapter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_message_length: config.max_message_length,
                commands: CommandTable::new(config.command_prefix, &config.aliases),
                outbound,
                dispatcher,
                dedup: Mutex::new(DedupSet::new(
                    Duration::from_secs(config.dedup_ttl_secs),
                    config.dedup_capacity,
                )),
                history: Mutex::new(RoomHistory::new(config.history_limit)),
                policies: RwLock::new(PolicyTable::default()),
            }),
        }
    }

    /// Mark a room as multi-party with the given policy.
    pub async fn register_group_room(&self, room_id: impl Into<String>, policy: RoomPolicy) {
        let room_id = room_id.into();
        log::info!(
            "router: group {} -> room {} (requireMention={})",
            policy.name,
            room_id,
            policy.require_mention
        );
        self.inner.policies.write().await.insert(room_id, policy);
    }

    pub async fn history_len(&self, room_id: &str) -> usize {
        self.inner.history.lock().await.len(room_id)
    }

    /// Consume events until every sender is gone.
    pub fn start(&self, mut inbound_rx: mpsc::Receiver<BotEvent>) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            while let Some(event) = inbound_rx.recv().await {
                let outcome = router.handle_inbound(event).await;
                log::trace!("router: {:?}", outcome);
            }
            log::info!("router: inbound channel closed");
        })
    }

    /// Run one event through the pipeline.
    pub async fn handle_inbound(&self, tagged: BotEvent) -> RouteOutcome {
        let BotEvent {
            bot,
            agent_id,
            event,
        } = tagged;
        let inner = &self.inner;

        if event.sender_username == bot {
            return RouteOutcome::Dropped(DropReason::OwnMessage);
        }
        if inner.outbound.is_bot(&event.sender_username).await {
            return RouteOutcome::Dropped(DropReason::PeerBot);
        }
        if event.is_system() {
            return RouteOutcome::Dropped(DropReason::System);
        }
        let text = event.text_with_attachments();
        if text.trim().is_empty() {
            return RouteOutcome::Dropped(DropReason::Empty);
        }

        let key = dedup_key(&event.room_id, &event.message_id);
        if !inner.dedup.lock().await.claim(&key, Instant::now()) {
            log::debug!("router: duplicate {} via {}", key, bot);
            return RouteOutcome::Dropped(DropReason::Duplicate);
        }

        let policy = inner.policies.read().await.get(&event.room_id).cloned();
        let label = event.sender_label();
        let was_mentioned = match decide(policy.as_ref(), &event, &bot) {
            Visibility::Respond { was_mentioned } => was_mentioned,
            Visibility::NotMember => {
                inner.dedup.lock().await.release(&key);
                log::debug!("router: {} is not a member of {}, ignoring {}", bot, event.room_id, key);
                return RouteOutcome::Dropped(DropReason::NotMember);
            }
            visibility => {
                // another bot in the room may still be addressed by this message
                inner.dedup.lock().await.release(&key);
                let buffered = inner.history.lock().await.push(
                    &event.room_id,
                    HistoryEntry {
                        message_id: event.message_id.clone(),
                        sender: label,
                        body: text,
                        timestamp: Utc::now(),
                    },
                );
                log::debug!(
                    "router: {} not forwarded to {} ({:?}, buffered={})",
                    key,
                    bot,
                    visibility,
                    buffered
                );
                return RouteOutcome::Buffered;
            }
        };

        let (body, command) = match inner.commands.resolve(&text) {
            CommandOutcome::LocalReply(reply) => {
                let inner = self.inner.clone();
                let room_id = event.room_id;
                let thread_id = event.thread_id;
                return RouteOutcome::LocalReply(tokio::spawn(async move {
                    if let Err(e) = inner
                        .send_chunked(&bot, &room_id, thread_id.as_deref(), &reply)
                        .await
                    {
                        log::warn!("router: local reply in {} failed: {}", room_id, e);
                    }
                }));
            }
            CommandOutcome::Transform { command, body } => (body, Some(command)),
            CommandOutcome::Passthrough => (text, None),
        };

        let history = match policy {
            Some(_) => inner
                .history
                .lock()
                .await
                .take_for(&event.room_id, &event.message_id),
            None => Vec::new(),
        };

        let chat_type = if policy.is_some() {
            ChatType::Group
        } else {
            ChatType::Direct
        };
        let (body_with_sender, conversation_label) = match &policy {
            Some(p) => (format!("{}: {}", label, body), p.name.clone()),
            None => (body.clone(), label),
        };
        let request = NormalizedRequest {
            session_key: session_key(&agent_id, chat_type, &bot, &event.room_id),
            agent_id,
            bot: bot.clone(),
            room_id: event.room_id.clone(),
            message_id: event.message_id,
            chat_type,
            body,
            body_with_sender,
            sender_id: event.sender_id,
            sender_username: event.sender_username,
            sender_name: event.sender_name,
            conversation_label,
            group_subject: policy.map(|p| p.name),
            was_mentioned,
            reply_to_id: event.thread_id.clone(),
            history,
            command,
        };
        log::debug!("router: dispatching {} for {}", key, request.session_key);

        let inner = self.inner.clone();
        let room_id = event.room_id;
        let thread_id = event.thread_id;
        RouteOutcome::Dispatched(tokio::spawn(async move {
            inner.dispatch(bot, room_id, thread_id, request).await;
        }))
    }

    /// Agent-initiated send. `to` is a target string; `bot` overrides the bot it names.
    /// Returns the number of messages sent. Failures are returned, never reported in the room.
    pub async fn send_outbound(
        &self,
        bot: Option<&str>,
        to: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<usize, OutboundError> {
        if text.trim().is_empty() {
            return Ok(0);
        }
        let target = parse_target(to);
        let bot = match bot.map(str::to_string).or(target.bot) {
            Some(bot) => bot,
            None => self
                .inner
                .outbound
                .connected_bots()
                .await
                .into_iter()
                .next()
                .ok_or(OutboundError::NoBot)?,
        };
        let room_id = target.room_id.ok_or_else(|| OutboundError::NoRoom(bot.clone()))?;
        Ok(self
            .inner
            .send_chunked(&bot, &room_id, thread_id, text.trim())
            .await?)
    }
}

impl Inner {
    async fn send_chunked(
        &self,
        bot: &str,
        room_id: &str,
        thread_id: Option<&str>,
        text: &str,
    ) -> Result<usize, PoolError> {
        let mut sent = 0;
        for piece in chunk_text(text, self.max_message_length) {
            if piece.trim().is_empty() {
                continue;
            }
            self.outbound.send_text(bot, room_id, &piece, thread_id).await?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn dispatch(
        self: Arc<Self>,
        bot: String,
        room_id: String,
        thread_id: Option<String>,
        request: NormalizedRequest,
    ) {
        let session = request.session_key.clone();
        self.outbound.send_typing(&bot, &room_id, true).await;

        let (sink, mut deliveries) = ReplySink::channel(DELIVERY_CHANNEL_CAPACITY);
        let sender = {
            let inner = self.clone();
            let bot = bot.clone();
            let room_id = room_id.clone();
            let thread_id = thread_id.clone();
            tokio::spawn(async move {
                let mut sent = 0usize;
                while let Some(delivery) = deliveries.recv().await {
                    let text = delivery.text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match inner
                        .send_chunked(&bot, &room_id, thread_id.as_deref(), text)
                        .await
                    {
                        Ok(n) => sent += n,
                        Err(e) => log::warn!("router: reply to {} in {} failed: {}", bot, room_id, e),
                    }
                }
                sent
            })
        };

        let result = self.dispatcher.submit(request, sink).await;
        let sent = sender.await.unwrap_or(0);
        self.outbound.send_typing(&bot, &room_id, false).await;

        match result {
            Ok(()) if sent == 0 => log::info!("router: no reply produced for {}", session),
            Ok(()) => log::debug!("router: sent {} message(s) for {}", sent, session),
            Err(e) => {
                log::warn!("router: dispatch for {} failed: {}", session, e);
                let notice = match e {
                    DispatchError::Unavailable(_) => NOTICE_UNAVAILABLE,
                    DispatchError::Failed(_) => NOTICE_FAILED,
                };
                if let Err(e) = self
                    .outbound
                    .send_text(&bot, &room_id, notice, thread_id.as_deref())
                    .await
                {
                    log::warn!("router: failed to send error notice to {}: {}", room_id, e);
                }
            }
        }
    }
}
