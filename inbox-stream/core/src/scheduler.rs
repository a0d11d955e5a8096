//! Clocks and Deferred Actions
//!
//! The pipeline never sleeps and never spawns timers of its own. Every
//! deferred effect (token flush, delayed `clear_inbox`, delayed cache
//! refetch, stall timeout) is an entry in a [`TimerQueue`] with a deadline
//! taken from an injected [`Clock`]. The event loop fires due entries by
//! calling [`crate::InboxStream::fire_due`]; tests advance a [`ManualClock`]
//! instead of waiting.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::messages::ConversationId;

// ============================================================================
// Clocks
// ============================================================================

/// Time source for the pipeline
pub trait Clock: Send + Sync {
    /// Monotonic time, used for deadlines and durations
    fn now(&self) -> Instant;

    /// Wall-clock time, used for message timestamps
    fn wall_time(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests and replays
///
/// Clones share the same underlying time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualTime>>,
}

#[derive(Debug)]
struct ManualTime {
    instant: Instant,
    wall: DateTime<Utc>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Start at the current system time
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start at a fixed wall-clock time
    #[must_use]
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualTime {
                instant: Instant::now(),
                wall,
            })),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut time = self.inner.lock();
        time.instant += by;
        time.wall += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    /// Move time forward in milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().instant
    }

    fn wall_time(&self) -> DateTime<Utc> {
        self.inner.lock().wall
    }
}

// ============================================================================
// Timer Queue
// ============================================================================

/// Handle to a scheduled action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A deferred pipeline effect
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerAction {
    /// Apply buffered tokens for a conversation
    Flush(ConversationId),
    /// Drop the ephemeral session after the durable write propagated
    ClearInbox(ConversationId),
    /// Ask the cache to refetch the conversation
    Invalidate(ConversationId),
    /// Check whether a running turn went silent
    StallCheck(ConversationId),
}

impl TimerAction {
    /// The conversation this action belongs to
    #[must_use]
    pub fn conversation(&self) -> &ConversationId {
        match self {
            Self::Flush(id) | Self::ClearInbox(id) | Self::Invalidate(id) | Self::StallCheck(id) => {
                id
            }
        }
    }
}

/// Deadline-ordered queue of deferred actions
///
/// Entries with equal deadlines fire in scheduling order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    by_deadline: BTreeMap<(Instant, TimerId), TimerAction>,
    deadlines: HashMap<TimerId, Instant>,
}

impl TimerQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to fire at `deadline`
    pub fn schedule_at(&mut self, deadline: Instant, action: TimerAction) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.by_deadline.insert((deadline, id), action);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancel a pending action; returns `false` if it already fired
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.by_deadline.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    /// Cancel every pending action for a conversation matching `filter`
    pub fn cancel_where(
        &mut self,
        conversation: &ConversationId,
        filter: impl Fn(&TimerAction) -> bool,
    ) -> usize {
        let doomed: Vec<(Instant, TimerId)> = self
            .by_deadline
            .iter()
            .filter(|(_, action)| action.conversation() == conversation && filter(action))
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            self.by_deadline.remove(key);
            self.deadlines.remove(&key.1);
        }
        doomed.len()
    }

    /// Whether a timer is still pending
    #[must_use]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Earliest pending deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest action due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, TimerAction)> {
        let key = *self.by_deadline.keys().next()?;
        if key.0 > now {
            return None;
        }
        let action = self.by_deadline.remove(&key)?;
        self.deadlines.remove(&key.1);
        Some((key.1, action))
    }

    /// Number of pending actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }

    /// Pending actions in firing order
    pub fn pending(&self) -> impl Iterator<Item = &TimerAction> {
        self.by_deadline.values()
    }
}
