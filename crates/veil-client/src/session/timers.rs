//! Timer service owned by a session's control loop.
//!
//! The protocol core never sleeps. It schedules deadlines here, the runner
//! sleeps until [`TimerService::next_deadline`] and then hands back whatever
//! [`TimerService::pop_due`] returns.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use super::ephemeral::EntryId;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// One-second room countdown step.
    CountdownTick,
    /// Remove a self-destructing entry from the message log.
    SelfDestruct(EntryId),
}

/// A timer that has come due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTimer {
    pub id: TimerId,
    pub deadline: Instant,
    pub kind: TimerKind,
}

/// Deadline-ordered set of pending timers.
#[derive(Debug, Default)]
pub struct TimerService {
    next_id: u64,
    queue: BTreeMap<(Instant, TimerId), TimerKind>,
    deadlines: HashMap<TimerId, Instant>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TimerKind, at: Instant) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.queue.insert((at, id), kind);
        self.deadlines.insert(id, at);
        id
    }

    /// Cancel a pending timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(at) => self.queue.remove(&(at, id)).is_some(),
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        self.queue.clear();
        self.deadlines.clear();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return every timer with a deadline at or before `now`,
    /// earliest first. Timers sharing a deadline come out in scheduling order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<DueTimer> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            let (deadline, id) = *entry.key();
            if deadline > now {
                break;
            }
            let kind = entry.remove();
            self.deadlines.remove(&id);
            due.push(DueTimer { id, deadline, kind });
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
