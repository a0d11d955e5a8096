//! Token Buffer
//!
//! Tokens arrive from the node much faster than a UI should repaint. The
//! buffer coalesces them per conversation and is drained on a fixed cadence,
//! never dropping a fragment. At most one flush is pending at a time: the
//! buffer owns a single-slot timer handle and the pipeline only schedules a
//! new flush when that slot is empty.

use std::time::{Duration, Instant};

use crate::messages::ConversationId;
use crate::scheduler::TimerId;

use super::session::StreamSessionStore;

/// Default flush cadence (~20 Hz)
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Which stream a token belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Assistant answer text
    Content,
    /// Reasoning trace text
    Reasoning,
}

/// Per-conversation token accumulator with a single pending-flush slot
#[derive(Debug, Default)]
pub struct TokenBuffer {
    content: String,
    reasoning: String,
    pending_flush: Option<TimerId>,
}

impl TokenBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a fragment
    ///
    /// Returns `true` when no flush is pending, meaning the caller should
    /// schedule one and record it with [`Self::set_pending_flush`].
    pub fn push(&mut self, kind: TokenKind, text: &str) -> bool {
        match kind {
            TokenKind::Content => self.content.push_str(text),
            TokenKind::Reasoning => self.reasoning.push_str(text),
        }
        self.pending_flush.is_none()
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty()
    }

    /// The pending flush, if one is scheduled
    #[must_use]
    pub fn pending_flush(&self) -> Option<TimerId> {
        self.pending_flush
    }

    /// Record the flush scheduled for this buffer
    pub fn set_pending_flush(&mut self, id: TimerId) {
        self.pending_flush = Some(id);
    }

    /// Clear the pending slot, returning the handle so it can be cancelled
    pub fn take_pending_flush(&mut self) -> Option<TimerId> {
        self.pending_flush.take()
    }

    /// Move buffered text into the session: reasoning first, then content
    ///
    /// Returns `false` when there was nothing to apply.
    pub fn apply_to(
        &mut self,
        store: &mut StreamSessionStore,
        conversation: &ConversationId,
        now: Instant,
    ) -> bool {
        if self.is_empty() {
            return false;
        }
        if !self.reasoning.is_empty() {
            let reasoning = std::mem::take(&mut self.reasoning);
            store.append_reasoning(conversation, &reasoning, now);
        }
        if !self.content.is_empty() {
            let content = std::mem::take(&mut self.content);
            store.append_content(conversation, &content, now);
        }
        true
    }

    /// Drop buffered text and forget the pending handle
    ///
    /// Returns the handle that was pending, for cancellation.
    pub fn reset(&mut self) -> Option<TimerId> {
        self.content.clear();
        self.reasoning.clear();
        self.pending_flush.take()
    }
}
