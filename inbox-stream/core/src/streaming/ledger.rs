//! Reasoning Duration Ledger
//!
//! Remembers how long the assistant reasoned on the last turn of a few
//! recently touched conversations, so the "thought for N seconds" label
//! survives `clear_inbox`. Bounded with LRU eviction.

use std::collections::HashMap;

use crate::messages::ConversationId;

/// Default number of conversations remembered
pub const DEFAULT_LEDGER_CAPACITY: usize = 5;

#[derive(Clone, Copy, Debug)]
struct LedgerEntry {
    seconds: u64,
    /// Monotonic touch counter; lowest is least recently used
    touched: u64,
}

/// LRU-capped map of conversation id to last reasoning duration
#[derive(Clone, Debug)]
pub struct ReasoningDurationLedger {
    entries: HashMap<ConversationId, LedgerEntry>,
    capacity: usize,
    clock: u64,
}

impl Default for ReasoningDurationLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

impl ReasoningDurationLedger {
    /// Create a ledger holding at most `capacity` conversations
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity + 1),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    /// Record (or refresh) a duration, evicting the least recently touched
    /// entries beyond capacity
    pub fn save(&mut self, conversation: &ConversationId, seconds: u64) {
        self.clock += 1;
        self.entries.insert(
            conversation.clone(),
            LedgerEntry {
                seconds,
                touched: self.clock,
            },
        );

        while self.entries.len() > self.capacity {
            if self.evict_lru().is_none() {
                break;
            }
        }
    }

    /// Last recorded duration for a conversation
    #[must_use]
    pub fn get(&self, conversation: &ConversationId) -> Option<u64> {
        self.entries.get(conversation).map(|entry| entry.seconds)
    }

    /// Forget a conversation (a fresh turn invalidates the old duration)
    pub fn remove(&mut self, conversation: &ConversationId) -> Option<u64> {
        self.entries.remove(conversation).map(|entry| entry.seconds)
    }

    /// Evict the least recently touched entry
    pub fn evict_lru(&mut self) -> Option<ConversationId> {
        let key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.touched)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&key);
        Some(key)
    }

    /// Number of remembered conversations
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str) -> ConversationId {
        ConversationId::new(id)
    }

    #[test]
    fn test_save_and_get() {
        let mut ledger = ReasoningDurationLedger::default();
        ledger.save(&conv("a"), 7);
        assert_eq!(ledger.get(&conv("a")), Some(7));
        assert_eq!(ledger.get(&conv("b")), None);
    }

    #[test]
    fn test_evicts_least_recently_touched() {
        let mut ledger = ReasoningDurationLedger::new(3);
        ledger.save(&conv("a"), 1);
        ledger.save(&conv("b"), 2);
        ledger.save(&conv("c"), 3);

        // Touch "a" so "b" becomes the oldest
        ledger.save(&conv("a"), 10);
        ledger.save(&conv("d"), 4);

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.get(&conv("b")), None);
        assert_eq!(ledger.get(&conv("a")), Some(10));
        assert_eq!(ledger.get(&conv("c")), Some(3));
        assert_eq!(ledger.get(&conv("d")), Some(4));
    }

    #[test]
    fn test_remove() {
        let mut ledger = ReasoningDurationLedger::default();
        ledger.save(&conv("a"), 5);
        assert_eq!(ledger.remove(&conv("a")), Some(5));
        assert!(ledger.is_empty());
    }
}
