//! Bounded set of recently seen room+message keys.
//!
//! Entries expire after a fixed TTL; when the set grows past its capacity the oldest
//! entries are evicted. The two bounds are independent: whichever triggers first wins.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub fn dedup_key(room_id: &str, message_id: &str) -> String {
    format!("{}:{}", room_id, message_id)
}

pub struct DedupSet {
    ttl: Duration,
    capacity: usize,
    seq: u64,
    /// key -> (inserted at, insertion sequence)
    entries: HashMap<String, (Instant, u64)>,
    /// Insertion order; entries whose sequence no longer matches were released and are skipped.
    order: VecDeque<(String, u64)>,
}

impl DedupSet {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            seq: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `key`. Returns false when it is already present (a duplicate).
    pub fn claim(&mut self, key: &str, now: Instant) -> bool {
        self.expire(now);
        if self.entries.contains_key(key) {
            return false;
        }
        self.seq += 1;
        self.entries.insert(key.to_string(), (now, self.seq));
        self.order.push_back((key.to_string(), self.seq));
        while self.entries.len() > self.capacity {
            self.pop_oldest();
        }
        true
    }

    /// Forget `key` so another receiver may claim it.
    pub fn release(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }


    fn is_live(&self, key: &str, seq: u64) -> bool {
        matches!(self.entries.get(key), Some((_, s)) if *s == seq)
    }

    fn pop_oldest(&mut self) {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.is_live(&key, seq) {
                self.entries.remove(&key);
                return;
            }
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some((key, seq)) = self.order.front() {
            match self.entries.get(key) {
                Some((at, s)) if s == seq => {
                    if now.saturating_duration_since(*at) < self.ttl {
                        break;
                    }
                    let key = key.clone();
                    self.entries.remove(&key);
                }
                _ => {}
            }
            self.order.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_ttl_is_rejected() {
        let now = Instant::now();
        let mut d = DedupSet::new(Duration::from_secs(60), 100);
        assert!(d.claim("r1:m1", now));
        assert!(!d.claim("r1:m1", now + Duration::from_secs(59)));
        assert!(d.claim("r1:m2", now));
    }

    #[test]
    fn expired_key_can_be_claimed_again() {
        let now = Instant::now();
        let mut d = DedupSet::new(Duration::from_secs(60), 100);
        assert!(d.claim("k", now));
        assert!(d.claim("k", now + Duration::from_secs(60)));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let now = Instant::now();
        let mut d = DedupSet::new(Duration::from_secs(60), 2);
        assert!(d.claim("a", now));
        assert!(d.claim("b", now));
        assert!(d.claim("c", now));
        assert!(!d.contains("a"));
        assert!(d.contains("b"));
        assert!(d.contains("c"));
    }

    #[test]
    fn released_key_is_claimable_and_not_double_evicted() {
        let now = Instant::now();
        let mut d = DedupSet::new(Duration::from_secs(60), 2);
        assert!(d.claim("a", now));
        d.release("a");
        assert!(d.claim("a", now));
        assert!(d.claim("b", now));
        assert_eq!(d.len(), 2);
        assert!(d.claim("c", now));
        assert!(!d.contains("a"));
        assert!(d.contains("b"));
    }

    #[test]
    fn key_format() {
        assert_eq!(dedup_key("r1", "m1"), "r1:m1");
    }
}
