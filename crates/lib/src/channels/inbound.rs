//! Inbound room message: parsed from the wire, tagged with the receiving bot, handed to the router.

use serde::{Deserialize, Serialize};

/// A user mentioned in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub username: String,
}

/// Media or file reference attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Attachment {
    Image { url: String },
    Audio { url: String },
    File { url: String, title: Option<String> },
    Other { title: Option<String> },
}

impl Attachment {
    /// Text marker appended to the body for the agent; None when there is nothing to point at.
    pub fn marker(&self) -> Option<String> {
        match self {
            Attachment::Image { url } => Some(format!("[image: {}]", url)),
            Attachment::Audio { url } => Some(format!("[audio: {}]", url)),
            Attachment::File { url, .. } => Some(format!("[file: {}]", url)),
            Attachment::Other { .. } => None,
        }
    }
}

/// A new message in a room, as delivered by one realtime connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub room_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub sender_username: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    /// Parent message when posted in a thread.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Set for system/non-content events (joins, topic changes, ...).
    #[serde(default)]
    pub system_kind: Option<String>,
}

impl InboundEvent {
    pub fn is_system(&self) -> bool {
        self.system_kind.is_some()
    }

    /// "Display (@user)" when the display name differs from the username, else "@user".
    pub fn sender_label(&self) -> String {
        match self.sender_name.as_deref() {
            Some(name) if name != self.sender_username => {
                format!("{} (@{})", name, self.sender_username)
            }
            _ => format!("@{}", self.sender_username),
        }
    }

    pub fn mentions_user(&self, username: &str) -> bool {
        self.mentions.iter().any(|m| m.username == username)
    }

    /// Body with one attachment marker per line appended.
    pub fn text_with_attachments(&self) -> String {
        let mut text = self.body.clone();
        for marker in self.attachments.iter().filter_map(Attachment::marker) {
            text.push('\n');
            text.push_str(&marker);
        }
        text
    }
}

/// An inbound event together with the bot identity whose connection received it.
#[derive(Debug, Clone)]
pub struct BotEvent {
    pub bot: String,
    pub agent_id: String,
    pub event: InboundEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> InboundEvent {
        InboundEvent {
            room_id: "r1".to_string(),
            message_id: "m1".to_string(),
            sender_id: "u1".to_string(),
            sender_username: "bob".to_string(),
            sender_name: None,
            body: "look".to_string(),
            attachments: Vec::new(),
            mentions: Vec::new(),
            thread_id: None,
            system_kind: None,
        }
    }

    #[test]
    fn sender_label_variants() {
        let mut e = event();
        assert_eq!(e.sender_label(), "@bob");
        e.sender_name = Some("bob".to_string());
        assert_eq!(e.sender_label(), "@bob");
        e.sender_name = Some("Bob Smith".to_string());
        assert_eq!(e.sender_label(), "Bob Smith (@bob)");
    }

    #[test]
    fn attachments_become_markers() {
        let mut e = event();
        e.attachments = vec![
            Attachment::Image {
                url: "/a.png".to_string(),
            },
            Attachment::Other { title: None },
            Attachment::File {
                url: "/doc.pdf".to_string(),
                title: Some("doc".to_string()),
            },
        ];
        assert_eq!(e.text_with_attachments(), "look\n[image: /a.png]\n[file: /doc.pdf]");
    }
}
