//! Realtime wire protocol: JSON frames exchanged over the chat server's websocket.
//!
//! Every frame carries a `msg` discriminator. Client frames negotiate the session,
//! call methods, and manage subscriptions; server frames answer them and push changes.

use crate::channels::{Attachment, InboundEvent, Mention};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version offered in the connect frame.
pub const PROTOCOL_VERSION: &str = "1";

/// Subscription (and change collection) carrying new room messages.
pub const ROOM_MESSAGES_STREAM: &str = "stream-room-messages";

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientFrame {
    Connect {
        version: String,
        support: Vec<String>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Method {
        id: String,
        method: String,
        params: Vec<Value>,
    },
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },
    Unsub {
        id: String,
    },
}

impl ClientFrame {
    pub fn connect() -> Self {
        ClientFrame::Connect {
            version: PROTOCOL_VERSION.to_string(),
            support: vec![PROTOCOL_VERSION.to_string()],
        }
    }

    pub fn subscribe_room(id: impl Into<String>, room_id: &str) -> Self {
        ClientFrame::Sub {
            id: id.into(),
            name: ROOM_MESSAGES_STREAM.to_string(),
            params: vec![Value::String(room_id.to_string()), Value::Bool(false)],
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames sent by the server. Unknown kinds parse as `Other` and are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerFrame {
    Connected {
        #[serde(default)]
        session: Option<String>,
    },
    Failed {
        #[serde(default)]
        version: Option<String>,
    },
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
    Pong {
        #[serde(default)]
        id: Option<String>,
    },
    Result {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
    Ready {
        #[serde(default)]
        subs: Vec<String>,
    },
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<Value>,
    },
    Changed {
        #[serde(default)]
        collection: String,
        #[serde(default)]
        fields: ChangedFields,
    },
    #[serde(other)]
    Other,
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedFields {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Render an error payload (string or object) as a message.
pub fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("reason")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Room message payload as pushed in `changed` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub rid: String,
    #[serde(default)]
    pub msg: String,
    pub u: WireUser,
    #[serde(default)]
    pub mentions: Vec<WireUser>,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
    #[serde(default)]
    pub tmid: Option<String>,
    /// Message type; present on system messages (joins, renames, ...).
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireUser {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireAttachment {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_link: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

impl From<WireAttachment> for Attachment {
    fn from(a: WireAttachment) -> Self {
        if let Some(url) = a.image_url {
            Attachment::Image { url }
        } else if let Some(url) = a.audio_url {
            Attachment::Audio { url }
        } else if let Some(url) = a.title_link.or(a.video_url) {
            Attachment::File {
                url,
                title: a.title,
            }
        } else {
            Attachment::Other { title: a.title }
        }
    }
}

impl From<WireMessage> for InboundEvent {
    fn from(m: WireMessage) -> Self {
        InboundEvent {
            room_id: m.rid,
            message_id: m.id,
            sender_id: m.u.id,
            sender_username: m.u.username,
            sender_name: m.u.name.filter(|n| !n.trim().is_empty()),
            body: m.msg,
            attachments: m.attachments.into_iter().map(Attachment::from).collect(),
            mentions: m
                .mentions
                .into_iter()
                .map(|u| Mention {
                    id: u.id,
                    username: u.username,
                })
                .collect(),
            thread_id: m.tmid.filter(|t| !t.is_empty()),
            system_kind: m.t.filter(|t| !t.is_empty()),
        }
    }
}

/// Extract room messages from a `changed` frame. Elements that are not messages are skipped.
pub fn room_messages(collection: &str, fields: &ChangedFields) -> Vec<InboundEvent> {
    if collection != ROOM_MESSAGES_STREAM {
        return Vec::new();
    }
    fields
        .args
        .iter()
        .filter_map(|arg| match serde_json::from_value::<WireMessage>(arg.clone()) {
            Ok(m) if !m.id.is_empty() && !m.rid.is_empty() => Some(InboundEvent::from(m)),
            Ok(_) => None,
            Err(e) => {
                log::debug!("ddp: skipping malformed room message: {}", e);
                None
            }
        })
        .collect()
}

/// Convert the configured http(s) server URL into the websocket endpoint.
pub fn websocket_url(server_url: &str) -> String {
    let base = server_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/websocket", base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connect_frame_shape() {
        let v: Value = serde_json::from_str(&ClientFrame::connect().to_text()).unwrap();
        assert_eq!(v, json!({ "msg": "connect", "version": "1", "support": ["1"] }));
    }

    #[test]
    fn pong_without_id_omits_field() {
        let v: Value = serde_json::from_str(&ClientFrame::Pong { id: None }.to_text()).unwrap();
        assert_eq!(v, json!({ "msg": "pong" }));
    }

    #[test]
    fn subscribe_room_frame_shape() {
        let v: Value =
            serde_json::from_str(&ClientFrame::subscribe_room("7", "GENERAL").to_text()).unwrap();
        assert_eq!(
            v,
            json!({ "msg": "sub", "id": "7", "name": "stream-room-messages", "params": ["GENERAL", false] })
        );
    }

    #[test]
    fn parses_server_frames() {
        assert_eq!(
            ServerFrame::parse(r#"{"msg":"connected","session":"abc"}"#).unwrap(),
            ServerFrame::Connected {
                session: Some("abc".to_string())
            }
        );
        assert_eq!(
            ServerFrame::parse(r#"{"msg":"ready","subs":["1","2"]}"#).unwrap(),
            ServerFrame::Ready {
                subs: vec!["1".to_string(), "2".to_string()]
            }
        );
        assert_eq!(
            ServerFrame::parse(r#"{"msg":"added","collection":"users","id":"x"}"#).unwrap(),
            ServerFrame::Other
        );
        assert!(ServerFrame::parse("not json").is_err());
        assert!(ServerFrame::parse(r#"{"msg":"result"}"#).is_err());
    }

    #[test]
    fn error_text_prefers_reason() {
        assert_eq!(error_text(&json!({ "error": 403, "reason": "User not found" })), "User not found");
        assert_eq!(error_text(&json!("boom")), "boom");
    }

    #[test]
    fn extracts_room_messages_from_changed() {
        let frame = ServerFrame::parse(
            &json!({
                "msg": "changed",
                "collection": "stream-room-messages",
                "id": "id",
                "fields": {
                    "eventName": "r1",
                    "args": [
                        {
                            "_id": "m1", "rid": "r1", "msg": "hello @alice-bot",
                            "u": { "_id": "u1", "username": "bob", "name": "Bob" },
                            "mentions": [{ "_id": "b1", "username": "alice-bot" }],
                            "attachments": [{ "image_url": "/img.png" }],
                            "tmid": "parent"
                        },
                        { "unrelated": true }
                    ]
                }
            })
            .to_string(),
        )
        .unwrap();
        let ServerFrame::Changed { collection, fields } = frame else {
            panic!("expected changed frame");
        };
        let events = room_messages(&collection, &fields);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.room_id, "r1");
        assert_eq!(e.message_id, "m1");
        assert_eq!(e.sender_username, "bob");
        assert_eq!(e.sender_name.as_deref(), Some("Bob"));
        assert_eq!(e.mentions[0].username, "alice-bot");
        assert_eq!(e.thread_id.as_deref(), Some("parent"));
        assert_eq!(
            e.attachments,
            vec![Attachment::Image {
                url: "/img.png".to_string()
            }]
        );
        assert!(e.system_kind.is_none());
    }

    #[test]
    fn other_collections_are_ignored() {
        let fields = ChangedFields {
            event_name: None,
            args: vec![json!({ "_id": "m1", "rid": "r1", "u": { "username": "x" } })],
        };
        assert!(room_messages("stream-notify-user", &fields).is_empty());
    }

    #[test]
    fn websocket_url_from_http() {
        assert_eq!(websocket_url("https://chat.example.com/"), "wss://chat.example.com/websocket");
        assert_eq!(websocket_url("http://127.0.0.1:3000"), "ws://127.0.0.1:3000/websocket");
    }
}
