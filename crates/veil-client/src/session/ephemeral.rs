//! Ordered message log with local self-destruct.
//!
//! Eviction is local to this peer. The sender's copy and the receiver's copy
//! expire on independent timers and nothing is confirmed over the network.
//! Evicted text is dropped from the log; it is not securely erased.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::types::ChatMessage;

/// Default delay before a self-destruct message leaves the log.
pub const DEFAULT_SELF_DESTRUCT: Duration = Duration::from_secs(10);

/// Identity of one log entry, assigned in arrival order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralEntry {
    pub id: EntryId,
    pub message: ChatMessage,
    pub inserted_at: Instant,
    pub destruct_at: Option<Instant>,
}

/// Append-only log of the conversation.
#[derive(Debug)]
pub struct EphemeralMessageStore {
    entries: VecDeque<EphemeralEntry>,
    next_id: u64,
    self_destruct_after: Duration,
}

impl Default for EphemeralMessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_SELF_DESTRUCT)
    }
}

impl EphemeralMessageStore {
    pub fn new(self_destruct_after: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 0,
            self_destruct_after,
        }
    }

    /// Append a message. For self-destruct messages the returned deadline is
    /// when this exact entry must be evicted.
    pub fn append(
        &mut self,
        message: ChatMessage,
        self_destruct: bool,
        now: Instant,
    ) -> (EntryId, Option<Instant>) {
        self.next_id += 1;
        let id = EntryId(self.next_id);
        let destruct_at = self_destruct.then(|| now + self.self_destruct_after);
        self.entries.push_back(EphemeralEntry {
            id,
            message,
            inserted_at: now,
            destruct_at,
        });
        (id, destruct_at)
    }

    /// Remove one entry. Later appends never shift which entry an id names.
    pub fn evict(&mut self, id: EntryId) -> Option<EphemeralEntry> {
        // Ids are increasing along the log.
        let pos = self
            .entries
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()?;
        self.entries.remove(pos)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, id: EntryId) -> Option<&EphemeralEntry> {
        self.entries
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()
            .and_then(|pos| self.entries.get(pos))
    }

    pub fn entries(&self) -> impl Iterator<Item = &EphemeralEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn self_destruct_after(&self) -> Duration {
        self.self_destruct_after
    }
}
