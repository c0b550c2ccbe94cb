//! Multi-party room policies and the respond/ignore decision.

use crate::channels::InboundEvent;
use std::collections::HashMap;

/// Mention usernames that address the whole room.
pub const BROADCAST_MENTIONS: &[&str] = &["here", "all", "everyone"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPolicy {
    /// Group name, used as subject and conversation label.
    pub name: String,
    pub require_mention: bool,
    /// Member bots. Empty means every bot in the room is a member.
    pub bots: Vec<String>,
}

impl RoomPolicy {
    pub fn has_member(&self, bot: &str) -> bool {
        self.bots.is_empty() || self.bots.iter().any(|b| b == bot)
    }
}

/// Room id -> policy. Rooms without an entry are direct messages.
#[derive(Debug, Default)]
pub struct PolicyTable {
    rooms: HashMap<String, RoomPolicy>,
}

impl PolicyTable {
    pub fn insert(&mut self, room_id: impl Into<String>, policy: RoomPolicy) {
        self.rooms.insert(room_id.into(), policy);
    }

    pub fn get(&self, room_id: &str) -> Option<&RoomPolicy> {
        self.rooms.get(room_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Respond { was_mentioned: bool },
    /// Broadcast mention without the bot being addressed.
    IgnoreBroadcast,
    IgnoreNotMentioned,
    /// The receiving bot is not configured for this room.
    NotMember,
}

pub fn is_broadcast(event: &InboundEvent) -> bool {
    event
        .mentions
        .iter()
        .any(|m| BROADCAST_MENTIONS.contains(&m.username.as_str()))
}

/// Decide whether `bot` should respond to `event`. Direct messages always pass.
pub fn decide(policy: Option<&RoomPolicy>, event: &InboundEvent, bot: &str) -> Visibility {
    let Some(policy) = policy else {
        return Visibility::Respond {
            was_mentioned: false,
        };
    };
    if !policy.has_member(bot) {
        return Visibility::NotMember;
    }
    let mentioned = event.mentions_user(bot);
    if is_broadcast(event) && !mentioned {
        Visibility::IgnoreBroadcast
    } else if policy.require_mention && !mentioned {
        Visibility::IgnoreNotMentioned
    } else {
        Visibility::Respond {
            was_mentioned: mentioned,
        }
    }
}
