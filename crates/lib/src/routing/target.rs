//! Target strings for agent-initiated sends.
//!
//! Accepted forms: `chat:group:<roomId>`, `chat:dm:<bot>`, `<bot>:<roomId>` (room id of
//! 17-24 hex chars), or a bare room id.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundTarget {
    pub bot: Option<String>,
    pub room_id: Option<String>,
}

fn is_room_id(s: &str) -> bool {
    (17..=24).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

pub fn parse_target(to: &str) -> OutboundTarget {
    let to = to.trim();
    if let Some(room) = to.strip_prefix("chat:group:") {
        return OutboundTarget {
            bot: None,
            room_id: non_empty(room),
        };
    }
    if let Some(bot) = to.strip_prefix("chat:dm:") {
        return OutboundTarget {
            bot: non_empty(bot),
            room_id: None,
        };
    }
    if let Some((bot, room)) = to.split_once(':') {
        if !bot.is_empty() && is_room_id(room) {
            return OutboundTarget {
                bot: Some(bot.to_string()),
                room_id: Some(room.to_string()),
            };
        }
    }
    OutboundTarget {
        bot: None,
        room_id: non_empty(to),
    }
}
