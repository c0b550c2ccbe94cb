//! Per-room ring buffers of messages that were seen but not forwarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub message_id: String,
    pub sender: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Message ids remembered per room after they were buffered or forwarded.
const SEEN_IDS_PER_ROOM: usize = 256;

pub struct RoomHistory {
    limit: usize,
    rooms: HashMap<String, VecDeque<HistoryEntry>>,
    /// Ids that must not be buffered again: already buffered, consumed, or forwarded.
    seen: HashMap<String, VecDeque<String>>,
}

impl RoomHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            rooms: HashMap::new(),
            seen: HashMap::new(),
        }
    }

    fn remember(&mut self, room_id: &str, message_id: &str) {
        let seen = self.seen.entry(room_id.to_string()).or_default();
        if seen.iter().any(|id| id == message_id) {
            return;
        }
        seen.push_back(message_id.to_string());
        while seen.len() > SEEN_IDS_PER_ROOM.max(self.limit) {
            seen.pop_front();
        }
    }

    fn was_seen(&self, room_id: &str, message_id: &str) -> bool {
        self.seen
            .get(room_id)
            .is_some_and(|seen| seen.iter().any(|id| id == message_id))
    }

    /// Append to the room's buffer, dropping the oldest past the limit.
    /// Returns false when the message was buffered or forwarded before, or buffering is off.
    pub fn push(&mut self, room_id: &str, entry: HistoryEntry) -> bool {
        if self.limit == 0 || self.was_seen(room_id, &entry.message_id) {
            return false;
        }
        self.remember(room_id, &entry.message_id);
        let buf = self.rooms.entry(room_id.to_string()).or_default();
        buf.push_back(entry);
        while buf.len() > self.limit {
            buf.pop_front();
        }
        true
    }

    /// Take everything buffered for the room, oldest first, leaving it empty.
    /// `forwarded_id` is the message being forwarded; it is left out and never buffered later.
    pub fn take_for(&mut self, room_id: &str, forwarded_id: &str) -> Vec<HistoryEntry> {
        self.remember(room_id, forwarded_id);
        self.rooms
            .remove(room_id)
            .map(|buf| {
                buf.into_iter()
                    .filter(|e| e.message_id != forwarded_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> HistoryEntry {
        HistoryEntry {
            message_id: id.to_string(),
            sender: "@bob".to_string(),
            body: format!("body {}", id),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn bounded_and_drops_oldest() {
        let mut h = RoomHistory::new(2);
        h.push("g1", entry("1"));
        h.push("g1", entry("2"));
        h.push("g1", entry("3"));
        let ids: Vec<String> = h.take_for("g1", "4").into_iter().map(|e| e.message_id).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(h.len("g1"), 0);
    }

    #[test]
    fn same_message_buffered_once() {
        let mut h = RoomHistory::new(10);
        assert!(h.push("g1", entry("1")));
        assert!(!h.push("g1", entry("1")));
        assert_eq!(h.len("g1"), 1);
    }

    #[test]
    fn zero_limit_disables() {
        let mut h = RoomHistory::new(0);
        assert!(!h.push("g1", entry("1")));
        assert!(h.take_for("g1", "2").is_empty());
    }

    #[test]
    fn forwarded_message_left_out_of_its_own_history() {
        let mut h = RoomHistory::new(10);
        h.push("g1", entry("1"));
        h.push("g1", entry("2"));
        let ids: Vec<String> = h.take_for("g1", "2").into_iter().map(|e| e.message_id).collect();
        assert_eq!(ids, vec!["1"]);
        assert!(!h.push("g1", entry("2")));
        assert_eq!(h.len("g1"), 0);
    }

    #[test]
    fn consumed_message_not_buffered_again() {
        let mut h = RoomHistory::new(10);
        assert!(h.push("g1", entry("1")));
        assert_eq!(h.take_for("g1", "5").len(), 1);
        assert!(!h.push("g1", entry("1")));
        assert!(h.push("g1", entry("6")));
    }
}
