//! Unread counters, independent of the cache merge: a pushed message
//! counts (or not) even when its cache merge degrades to a no-op.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::models::Message;

#[derive(Default)]
struct UnreadInner {
    counts: HashMap<String, u64>,
    total: u64,
}

/// Per-conversation and global unread counters.
///
/// Holds conversation ids only, never message or conversation bodies.
/// Invariant: `total` always equals the sum of the per-conversation
/// counts.
#[derive(Default)]
pub struct UnreadTracker {
    inner: RwLock<UnreadInner>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a pushed message, unless the local user sent it or is
    /// currently viewing its conversation. Returns true if the counters
    /// changed.
    pub fn on_message_pushed(
        &self,
        msg: &Message,
        local_user_id: Option<&str>,
        active_conversation_id: Option<&str>,
    ) -> bool {
        if Some(msg.sender_id.as_str()) == local_user_id {
            return false;
        }
        if Some(msg.conversation_id.as_str()) == active_conversation_id {
            return false;
        }
        let mut inner = self.inner.write();
        *inner.counts.entry(msg.conversation_id.clone()).or_insert(0) += 1;
        inner.total += 1;
        true
    }

    /// Zero a conversation's counter and remove it from the unread set.
    /// Returns true if the counters changed.
    pub fn mark_read(&self, conversation_id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.counts.remove(conversation_id) {
            Some(count) => {
                inner.total -= count;
                count > 0
            }
            None => false,
        }
    }

    pub fn is_unread(&self, conversation_id: &str) -> bool {
        self.inner
            .read()
            .counts
            .get(conversation_id)
            .map(|c| *c > 0)
            .unwrap_or(false)
    }

    pub fn count(&self, conversation_id: &str) -> u64 {
        self.inner
            .read()
            .counts
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.inner.read().total
    }

    /// Drop all counters, e.g. on logout.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.counts.clear();
        inner.total = 0;
    }

    #[cfg(test)]
    fn sum_of_counts(&self) -> u64 {
        self.inner.read().counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, conversation: &str, sender: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation.to_string(),
            sender_id: sender.to_string(),
            body: String::new(),
            created_at: Utc.timestamp_opt(1_760_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_counts_messages_from_others_in_inactive_conversations() {
        let tracker = UnreadTracker::new();
        assert!(tracker.on_message_pushed(&msg("m1", "c1", "u2"), Some("u1"), None));
        assert!(tracker.on_message_pushed(&msg("m2", "c1", "u2"), Some("u1"), Some("c2")));
        assert_eq!(tracker.count("c1"), 2);
        assert_eq!(tracker.total(), 2);
        assert!(tracker.is_unread("c1"));
    }

    #[test]
    fn test_own_messages_never_count() {
        let tracker = UnreadTracker::new();
        assert!(!tracker.on_message_pushed(&msg("m1", "c1", "u1"), Some("u1"), None));
        assert_eq!(tracker.total(), 0);
    }

    #[test]
    fn test_active_conversation_never_counts() {
        // Viewing C1: a push into C1 from someone else stays at zero
        let tracker = UnreadTracker::new();
        let changed = tracker.on_message_pushed(&msg("m1", "c1", "u2"), Some("u1"), Some("c1"));
        assert!(!changed);
        assert_eq!(tracker.total(), 0);
        assert!(!tracker.is_unread("c1"));
    }

    #[test]
    fn test_mark_read_zeroes_only_that_conversation() {
        let tracker = UnreadTracker::new();
        tracker.on_message_pushed(&msg("m1", "c1", "u2"), Some("u1"), None);
        tracker.on_message_pushed(&msg("m2", "c1", "u2"), Some("u1"), None);
        tracker.on_message_pushed(&msg("m3", "c2", "u3"), Some("u1"), None);

        assert!(tracker.mark_read("c1"));
        assert_eq!(tracker.count("c1"), 0);
        assert!(!tracker.is_unread("c1"));
        assert_eq!(tracker.total(), 1);

        assert!(tracker.mark_read("c2"));
        assert_eq!(tracker.total(), 0);
        // Already-read conversations are a no-op
        assert!(!tracker.mark_read("c2"));
    }

    #[test]
    fn test_global_equals_sum_across_mixed_sequences() {
        let tracker = UnreadTracker::new();
        let conversations = ["c1", "c2", "c3", "c4"];
        let senders = ["u1", "u2", "u3"];

        // Deterministic mixed sequence of pushes and reads; check the
        // invariant after every step
        let mut seed: u64 = 0x5eed;
        for i in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let conversation = conversations[(seed >> 8) as usize % conversations.len()];
            let sender = senders[(seed >> 16) as usize % senders.len()];
            let active = if seed & 1 == 0 { Some("c1") } else { None };

            if seed % 5 == 0 {
                tracker.mark_read(conversation);
            } else {
                let m = msg(&format!("m{i}"), conversation, sender);
                tracker.on_message_pushed(&m, Some("u1"), active);
            }

            assert_eq!(tracker.total(), tracker.sum_of_counts());
        }
    }

    #[test]
    fn test_reset_clears_everything() {
        let tracker = UnreadTracker::new();
        tracker.on_message_pushed(&msg("m1", "c1", "u2"), Some("u1"), None);
        tracker.reset();
        assert_eq!(tracker.total(), 0);
        assert!(!tracker.is_unread("c1"));
    }
}
