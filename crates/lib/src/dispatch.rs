//! Dispatch boundary: the normalized request handed to the agent stage and the reply stream back.
//!
//! The router submits a `NormalizedRequest` together with a `ReplySink`. The adapter pushes
//! zero or more deliveries into the sink while it works; the router forwards each one to
//! the chat room as it arrives.

use crate::routing::HistoryEntry;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No agent can take the request (not configured, unknown binding).
    #[error("agent unavailable: {0}")]
    Unavailable(String),
    #[error("dispatch failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Direct => "dm",
            ChatType::Group => "group",
        }
    }
}

/// Session key, stable per agent + bot + room.
pub fn session_key(agent_id: &str, chat_type: ChatType, bot: &str, room_id: &str) -> String {
    format!("agent:{}:chat:{}:{}:{}", agent_id, chat_type.as_str(), bot, room_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRequest {
    pub session_key: String,
    pub agent_id: String,
    pub bot: String,
    pub room_id: String,
    pub message_id: String,
    pub chat_type: ChatType,
    pub body: String,
    /// Body prefixed with the sender label in group rooms.
    pub body_with_sender: String,
    pub sender_id: String,
    pub sender_username: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub conversation_label: String,
    #[serde(default)]
    pub group_subject: Option<String>,
    pub was_mentioned: bool,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Canonical command name when the body was rewritten into command form.
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Block,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub text: String,
    pub kind: DeliveryKind,
}

/// Where an adapter pushes reply text. Cheap to clone.
#[derive(Clone)]
pub struct ReplySink {
    tx: mpsc::Sender<Delivery>,
}

impl ReplySink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Returns false when the router is no longer listening.
    pub async fn deliver(&self, text: impl Into<String>, kind: DeliveryKind) -> bool {
        self.tx
            .send(Delivery {
                text: text.into(),
                kind,
            })
            .await
            .is_ok()
    }
}

#[async_trait]
pub trait DispatchAdapter: Send + Sync {
    /// Process one request, delivering reply text through `sink`. Returns when processing ends.
    async fn submit(&self, request: NormalizedRequest, sink: ReplySink) -> Result<(), DispatchError>;
}

/// Used when no dispatch stage is configured: every request is unavailable.
pub struct UnavailableDispatcher;

#[async_trait]
impl DispatchAdapter for UnavailableDispatcher {
    async fn submit(&self, request: NormalizedRequest, _sink: ReplySink) -> Result<(), DispatchError> {
        Err(DispatchError::Unavailable(format!(
            "no dispatch endpoint configured for agent {}",
            request.agent_id
        )))
    }
}

/// One NDJSON line of an HTTP dispatch response.
#[derive(Debug, Deserialize)]
struct DispatchLine {
    #[serde(default)]
    kind: Option<DeliveryKind>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// POSTs the request as JSON and streams an NDJSON reply.
pub struct HttpDispatcher {
    url: String,
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn handle_line(line: &str, sink: &ReplySink) -> Result<(), DispatchError> {
        let line: DispatchLine = match serde_json::from_str(line) {
            Ok(l) => l,
            Err(e) => {
                log::debug!("dispatch: skipping malformed line: {}", e);
                return Ok(());
            }
        };
        if let Some(error) = line.error {
            return Err(classify(&error));
        }
        if let Some(text) = line.text {
            sink.deliver(text, line.kind.unwrap_or(DeliveryKind::Block)).await;
        }
        Ok(())
    }
}

fn classify(message: &str) -> DispatchError {
    let lower = message.to_lowercase();
    if lower.contains("agent not found") || lower.contains("unknown agent") {
        DispatchError::Unavailable(message.to_string())
    } else {
        DispatchError::Failed(message.to_string())
    }
}

#[async_trait]
impl DispatchAdapter for HttpDispatcher {
    async fn submit(&self, request: NormalizedRequest, sink: ReplySink) -> Result<(), DispatchError> {
        let res = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DispatchError::Failed(e.to_string()))?;
        let status = res.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DispatchError::Unavailable(format!(
                "no agent for {}",
                request.agent_id
            )));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify(&format!("{} {}", status, body)));
        }

        let mut stream = res.bytes_stream();
        let mut buffer = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DispatchError::Failed(e.to_string()))?;
            buffer.extend_from_slice(&chunk);
            while let Some(i) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..i).collect();
                buffer.drain(..1);
                let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                Self::handle_line(&line, &sink).await?;
            }
        }
        let tail = String::from_utf8_lossy(&buffer).trim().to_string();
        if !tail.is_empty() {
            Self::handle_line(&tail, &sink).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_shape() {
        assert_eq!(
            session_key("main", ChatType::Group, "alice-bot", "g1"),
            "agent:main:chat:group:alice-bot:g1"
        );
        assert_eq!(
            session_key("main", ChatType::Direct, "alice-bot", "d1"),
            "agent:main:chat:dm:alice-bot:d1"
        );
    }

    #[test]
    fn classify_errors() {
        assert!(matches!(classify("Agent not found: x"), DispatchError::Unavailable(_)));
        assert!(matches!(classify("model crashed"), DispatchError::Failed(_)));
    }

    #[tokio::test]
    async fn lines_are_delivered_in_order() {
        let (sink, mut rx) = ReplySink::channel(8);
        HttpDispatcher::handle_line(r#"{"kind":"block","text":"one"}"#, &sink)
            .await
            .unwrap();
        HttpDispatcher::handle_line(r#"{"text":"two"}"#, &sink).await.unwrap();
        HttpDispatcher::handle_line("garbage", &sink).await.unwrap();
        HttpDispatcher::handle_line(r#"{"kind":"final","text":"three"}"#, &sink)
            .await
            .unwrap();
        let err = HttpDispatcher::handle_line(r#"{"error":"boom"}"#, &sink).await;
        assert!(matches!(err, Err(DispatchError::Failed(_))));
        drop(sink);
        let mut got = Vec::new();
        while let Some(d) = rx.recv().await {
            got.push((d.text, d.kind));
        }
        assert_eq!(
            got,
            vec![
                ("one".to_string(), DeliveryKind::Block),
                ("two".to_string(), DeliveryKind::Block),
                ("three".to_string(), DeliveryKind::Final),
            ]
        );
    }
}
