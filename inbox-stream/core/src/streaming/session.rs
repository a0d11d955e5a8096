//! Stream Session Store
//!
//! Holds the ephemeral state of the one in-flight assistant turn per
//! conversation. The UI reads from here while the assistant is streaming and
//! falls back to the durable cache once the turn has been reconciled.
//!
//! Every mutator is a silent no-op when the session is missing or already
//! finalised: network delivery order relative to navigation is not
//! guaranteed, so late or foreign events are expected, not errors.

use std::collections::HashMap;
use std::time::Instant;

use crate::messages::{ConversationId, Reasoning, ReasoningStatus, ToolCallPatch, ToolCallRecord};

use super::ledger::ReasoningDurationLedger;

/// Ephemeral accumulator for one assistant turn
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSession {
    /// Conversation this session belongs to
    pub conversation_id: ConversationId,
    /// Assistant text so far
    pub content: String,
    /// Reasoning trace, created on the first reasoning token
    pub reasoning: Option<Reasoning>,
    /// Tool calls, addressed by index
    pub tool_calls: Vec<ToolCallRecord>,
    /// Whether tokens are still expected
    pub is_streaming: bool,
    /// When the first reasoning token arrived
    pub reasoning_started_at: Option<Instant>,
    /// Frozen reasoning duration in whole seconds (0 until computed)
    pub reasoning_duration_secs: u64,
}

impl StreamSession {
    fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            content: String::new(),
            reasoning: None,
            tool_calls: Vec::new(),
            is_streaming: true,
            reasoning_started_at: None,
            reasoning_duration_secs: 0,
        }
    }

    /// Whether anything worth rendering has accumulated
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
            || self.reasoning.as_ref().is_some_and(|r| !r.text.is_empty())
            || !self.tool_calls.is_empty()
    }

    /// Whether reasoning tokens are still arriving
    #[must_use]
    pub fn is_reasoning(&self) -> bool {
        self.reasoning
            .as_ref()
            .is_some_and(|r| r.status == ReasoningStatus::Running)
    }

    /// Reasoning duration as of `now`: live while running, frozen afterwards
    #[must_use]
    pub fn reasoning_elapsed_secs(&self, now: Instant) -> u64 {
        if self.is_reasoning() {
            self.reasoning_started_at
                .map_or(0, |started| rounded_secs(now.saturating_duration_since(started)))
        } else {
            self.reasoning_duration_secs
        }
    }

    /// Mark reasoning complete and freeze its duration; no-op unless running
    fn freeze_reasoning(&mut self, now: Instant) {
        if !self.is_reasoning() {
            return;
        }
        self.reasoning_duration_secs = self.reasoning_elapsed_secs(now);
        if let Some(reasoning) = self.reasoning.as_mut() {
            reasoning.status = ReasoningStatus::Complete;
        }
    }
}

fn rounded_secs(elapsed: std::time::Duration) -> u64 {
    (elapsed.as_millis() + 500) as u64 / 1000
}

/// Per-conversation session map plus the reasoning duration ledger
#[derive(Debug, Default)]
pub struct StreamSessionStore {
    sessions: HashMap<ConversationId, StreamSession>,
    durations: ReasoningDurationLedger,
}

impl StreamSessionStore {
    /// Create a store with the given ledger capacity
    #[must_use]
    pub fn new(ledger_capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            durations: ReasoningDurationLedger::new(ledger_capacity),
        }
    }

    /// Session for a conversation, if any
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&StreamSession> {
        self.sessions.get(id)
    }

    /// Whether a conversation has an actively streaming session
    #[must_use]
    pub fn is_streaming(&self, id: &ConversationId) -> bool {
        self.sessions.get(id).is_some_and(|s| s.is_streaming)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create or reset the session for a new turn
    ///
    /// Also forgets the previous turn's reasoning duration.
    pub fn start_streaming(&mut self, id: &ConversationId) {
        self.durations.remove(id);
        self.sessions
            .insert(id.clone(), StreamSession::new(id.clone()));
        tracing::debug!(inbox = %id, "Stream session started");
    }

    /// Append assistant text; ends a running reasoning phase
    pub fn append_content(&mut self, id: &ConversationId, text: &str, now: Instant) {
        let Some(session) = self.streaming_session_mut(id) else {
            return;
        };
        session.content.push_str(text);
        session.freeze_reasoning(now);
    }

    /// Append reasoning text
    ///
    /// The start time is recorded on the very first reasoning token only.
    /// Text arriving after reasoning was completed is kept, but the status
    /// and duration stay frozen.
    pub fn append_reasoning(&mut self, id: &ConversationId, text: &str, now: Instant) {
        let Some(session) = self.streaming_session_mut(id) else {
            return;
        };
        let reasoning = session.reasoning.get_or_insert_with(|| Reasoning {
            text: String::new(),
            status: ReasoningStatus::Running,
        });
        reasoning.text.push_str(text);
        if session.reasoning_started_at.is_none() {
            session.reasoning_started_at = Some(now);
        }
    }

    /// Mark reasoning complete; idempotent
    pub fn complete_reasoning(&mut self, id: &ConversationId, now: Instant) {
        if let Some(session) = self.streaming_session_mut(id) {
            session.freeze_reasoning(now);
        }
    }

    /// Patch the tool call at `index`, or append when `index` is past the end
    pub fn update_tool_call(&mut self, id: &ConversationId, patch: ToolCallPatch, index: usize) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        match session.tool_calls.get_mut(index) {
            Some(existing) => existing.apply(patch),
            None => session.tool_calls.push(patch.into_record()),
        }
    }

    /// Stop streaming but keep everything for readers until the durable
    /// write is visible
    pub fn end_streaming(&mut self, id: &ConversationId, now: Instant) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        session.freeze_reasoning(now);
        session.is_streaming = false;
        tracing::debug!(inbox = %id, "Stream session ended");
    }

    /// Delete the session; only call once the durable cache holds the turn
    pub fn clear_inbox(&mut self, id: &ConversationId) -> Option<StreamSession> {
        let removed = self.sessions.remove(id);
        if removed.is_some() {
            tracing::debug!(inbox = %id, "Stream session cleared");
        }
        removed
    }

    /// Drop every session and remembered duration (logout)
    pub fn clear_all(&mut self) {
        self.sessions.clear();
        self.durations.clear();
    }

    /// Remember the last reasoning duration for a conversation
    pub fn save_reasoning_duration(&mut self, id: &ConversationId, seconds: u64) {
        self.durations.save(id, seconds);
    }

    /// Last remembered reasoning duration, surviving `clear_inbox`
    #[must_use]
    pub fn reasoning_duration(&self, id: &ConversationId) -> Option<u64> {
        self.durations.get(id)
    }

    fn streaming_session_mut(&mut self, id: &ConversationId) -> Option<&mut StreamSession> {
        self.sessions.get_mut(id).filter(|s| s.is_streaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ToolStatus;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn conv(id: &str) -> ConversationId {
        ConversationId::new(id)
    }

    #[test]
    fn test_append_content_concatenates() {
        let mut store = StreamSessionStore::default();
        let now = Instant::now();
        store.start_streaming(&conv("c1"));
        store.append_content(&conv("c1"), "Hel", now);
        store.append_content(&conv("c1"), "lo", now);

        assert_eq!(store.get(&conv("c1")).unwrap().content, "Hello");
    }

    #[test]
    fn test_mutations_without_session_are_noops() {
        let mut store = StreamSessionStore::default();
        let now = Instant::now();
        store.append_content(&conv("ghost"), "x", now);
        store.append_reasoning(&conv("ghost"), "x", now);
        store.complete_reasoning(&conv("ghost"), now);
        store.update_tool_call(&conv("ghost"), ToolCallPatch::default(), 0);
        store.end_streaming(&conv("ghost"), now);

        assert!(store.is_empty());
    }

    #[test]
    fn test_appends_after_end_are_ignored() {
        let mut store = StreamSessionStore::default();
        let now = Instant::now();
        store.start_streaming(&conv("c1"));
        store.append_content(&conv("c1"), "done", now);
        store.end_streaming(&conv("c1"), now);
        store.append_content(&conv("c1"), " late", now);
        store.append_reasoning(&conv("c1"), "late", now);

        let session = store.get(&conv("c1")).unwrap();
        assert_eq!(session.content, "done");
        assert!(session.reasoning.is_none());
        assert!(!session.is_streaming);
    }

    #[test]
    fn test_content_completes_reasoning_and_freezes_duration() {
        let mut store = StreamSessionStore::default();
        let t0 = Instant::now();
        store.start_streaming(&conv("c1"));
        assert_eq!(store.get(&conv("c1")).unwrap().reasoning_elapsed_secs(t0), 0);

        store.append_reasoning(&conv("c1"), "thinking", t0);
        store.append_reasoning(&conv("c1"), " more", t0 + Duration::from_secs(2));
        let session = store.get(&conv("c1")).unwrap();
        assert_eq!(session.reasoning_started_at, Some(t0));
        assert_eq!(session.reasoning_elapsed_secs(t0 + Duration::from_millis(2600)), 3);

        store.append_content(&conv("c1"), "answer", t0 + Duration::from_secs(4));
        let session = store.get(&conv("c1")).unwrap();
        let reasoning = session.reasoning.as_ref().unwrap();
        assert_eq!(reasoning.text, "thinking more");
        assert_eq!(reasoning.status, ReasoningStatus::Complete);
        assert_eq!(session.reasoning_duration_secs, 4);

        // Frozen: later reads and later reasoning text do not move it
        store.append_reasoning(&conv("c1"), " after", t0 + Duration::from_secs(9));
        store.complete_reasoning(&conv("c1"), t0 + Duration::from_secs(10));
        store.end_streaming(&conv("c1"), t0 + Duration::from_secs(11));
        let session = store.get(&conv("c1")).unwrap();
        assert_eq!(session.reasoning_elapsed_secs(t0 + Duration::from_secs(60)), 4);
        assert_eq!(session.reasoning_duration_secs, 4);
        assert_eq!(
            session.reasoning.as_ref().unwrap().status,
            ReasoningStatus::Complete
        );
    }

    #[test]
    fn test_end_streaming_freezes_running_reasoning() {
        let mut store = StreamSessionStore::default();
        let t0 = Instant::now();
        store.start_streaming(&conv("c1"));
        store.append_reasoning(&conv("c1"), "hmm", t0);
        store.end_streaming(&conv("c1"), t0 + Duration::from_secs(3));

        let session = store.get(&conv("c1")).unwrap();
        assert_eq!(session.reasoning_duration_secs, 3);
        assert!(!session.is_reasoning());
    }

    #[test]
    fn test_update_tool_call_patches_by_index() {
        let mut store = StreamSessionStore::default();
        store.start_streaming(&conv("c1"));
        store.update_tool_call(
            &conv("c1"),
            ToolCallPatch::status(ToolStatus::Running).with_name("search"),
            0,
        );
        store.update_tool_call(
            &conv("c1"),
            ToolCallPatch::status(ToolStatus::Complete).with_result("42"),
            0,
        );

        let calls = &store.get(&conv("c1")).unwrap().tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].status, ToolStatus::Complete);
        assert_eq!(calls[0].result.as_deref(), Some("42"));

        store.update_tool_call(&conv("c1"), ToolCallPatch::default().with_name("fetch"), 1);
        assert_eq!(store.get(&conv("c1")).unwrap().tool_calls.len(), 2);
    }

    #[test]
    fn test_end_streaming_retains_content_until_clear() {
        let mut store = StreamSessionStore::default();
        let now = Instant::now();
        store.start_streaming(&conv("c1"));
        store.append_content(&conv("c1"), "kept", now);
        store.end_streaming(&conv("c1"), now);

        assert_eq!(store.get(&conv("c1")).unwrap().content, "kept");
        assert!(!store.is_streaming(&conv("c1")));

        assert!(store.clear_inbox(&conv("c1")).is_some());
        assert!(store.get(&conv("c1")).is_none());
        assert!(store.clear_inbox(&conv("c1")).is_none());
    }

    #[test]
    fn test_start_streaming_resets_duration_and_session() {
        let mut store = StreamSessionStore::default();
        let now = Instant::now();
        store.start_streaming(&conv("c1"));
        store.append_content(&conv("c1"), "old", now);
        store.save_reasoning_duration(&conv("c1"), 12);
        store.clear_inbox(&conv("c1"));
        assert_eq!(store.reasoning_duration(&conv("c1")), Some(12));

        store.start_streaming(&conv("c1"));
        assert_eq!(store.reasoning_duration(&conv("c1")), None);
        assert_eq!(store.get(&conv("c1")).unwrap().content, "");
    }

    #[test]
    fn test_clear_all() {
        let mut store = StreamSessionStore::default();
        store.start_streaming(&conv("a"));
        store.start_streaming(&conv("b"));
        store.save_reasoning_duration(&conv("a"), 1);
        store.clear_all();

        assert!(store.is_empty());
        assert_eq!(store.reasoning_duration(&conv("a")), None);
    }
}
