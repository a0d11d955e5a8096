//! Reconciler
//!
//! Merges a finished turn into the durable conversation cache exactly once.
//!
//! # Ordering
//!
//! ```text
//! durable write  ->  ledger save  ->  end_streaming  ->  (later) clear_inbox
//! ```
//!
//! The durable write always lands before the session stops streaming, and the
//! session is only cleared after `clear_delay`, so a reader never sees a turn
//! with neither source populated.
//!
//! # Conditional write
//!
//! The last message of the last page is replaced only while it is the
//! running optimistic placeholder. When it already carries this turn's final
//! id (the other completion signal got there first) its fields are amended
//! in place. Anything else means another path already wrote the turn and
//! the write is skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::cache::{ConversationCache, ConversationPages};
use crate::messages::{
    CompletionReason, ConversationId, Message, MessageId, MessageMetadata, MessageRole,
    MessageStatus, Reasoning, ToolCallPatch, ToolCallRecord,
};
use crate::scheduler::TimerAction;
use crate::streaming::StreamSessionStore;

/// Authoritative values for a turn; absent fields fall back to stream data
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinalizeRequest {
    /// Final message id (node message hash)
    pub message_id: Option<MessageId>,
    /// Final timestamp
    pub created_at: Option<DateTime<Utc>>,
    /// Final content
    pub content: Option<String>,
    /// Final reasoning text
    pub reasoning: Option<String>,
    /// Final tool calls
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    /// Performance metadata
    pub metadata: MessageMetadata,
    /// Completion reason
    pub reason: CompletionReason,
}

impl FinalizeRequest {
    /// Request that force-finalises a stalled turn
    #[must_use]
    pub fn timeout() -> Self {
        Self {
            reason: CompletionReason::Timeout,
            ..Self::default()
        }
    }
}

/// What the durable write did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The running placeholder was replaced
    Replaced,
    /// An already finalised message of this turn was patched
    Amended,
    /// Nothing matched (or nothing changed)
    Skipped,
}

/// A deferred effect the pipeline must schedule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Followup {
    /// Delay from now
    pub after: Duration,
    /// Action to run
    pub action: TimerAction,
}

/// Result of a reconciliation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Durable write result
    pub write: WriteOutcome,
    /// Deferred effects to schedule
    pub followups: Vec<Followup>,
}

/// Values written into the durable message
#[derive(Debug, Default)]
struct FinalFields {
    message_id: Option<MessageId>,
    created_at: Option<DateTime<Utc>>,
    content: Option<String>,
    reasoning: Option<Reasoning>,
    tool_calls: Option<Vec<ToolCallRecord>>,
    metadata: MessageMetadata,
    reason: CompletionReason,
}

impl FinalFields {
    fn from_request(request: FinalizeRequest) -> Self {
        Self {
            message_id: request.message_id,
            created_at: request.created_at,
            content: request.content,
            reasoning: request.reasoning.map(Reasoning::complete),
            tool_calls: request.tool_calls.filter(|calls| !calls.is_empty()),
            metadata: request.metadata,
            reason: request.reason,
        }
    }

    fn has_generated_files(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| calls.iter().any(ToolCallRecord::has_generated_files))
    }

    /// Replace the running placeholder
    fn replace(&self, last: &mut Message) {
        if let Some(id) = &self.message_id {
            last.message_id = id.clone();
        }
        if let Some(at) = self.created_at {
            last.created_at = at;
        }
        if let Some(content) = self.content.as_ref().filter(|c| !c.is_empty()) {
            last.content = content.clone();
        }
        last.status = MessageStatus::Complete {
            reason: self.reason,
        };
        if let Some(reasoning) = &self.reasoning {
            last.reasoning = Some(reasoning.clone());
        }
        if let Some(calls) = &self.tool_calls {
            last.tool_calls = calls.clone();
        }
        merge_metadata(&mut last.metadata, self.metadata);
    }

    /// Patch an already finalised message; returns whether anything changed
    fn amend(&self, last: &mut Message) -> bool {
        let before = last.clone();
        if let Some(id) = &self.message_id {
            last.message_id = id.clone();
        }
        if let Some(at) = self.created_at {
            last.created_at = at;
        }
        if let Some(content) = self.content.as_ref().filter(|c| !c.is_empty()) {
            last.content = content.clone();
        }
        if let Some(reasoning) = &self.reasoning {
            last.reasoning = Some(reasoning.clone());
        }
        if let Some(calls) = &self.tool_calls {
            last.tool_calls = calls.clone();
        }
        merge_metadata(&mut last.metadata, self.metadata);
        *last != before
    }
}

fn merge_metadata(target: &mut MessageMetadata, update: MessageMetadata) {
    if update.tps.is_some() {
        target.tps = update.tps;
    }
    if update.duration_ms.is_some() {
        target.duration_ms = update.duration_ms;
    }
}

/// Writes finished turns into the durable cache
pub struct Reconciler {
    cache: Arc<dyn ConversationCache>,
    clear_delay: Duration,
    refetch_delay: Duration,
}

impl Reconciler {
    /// Create a reconciler over `cache`
    pub fn new(cache: Arc<dyn ConversationCache>, clear_delay: Duration, refetch_delay: Duration) -> Self {
        Self {
            cache,
            clear_delay,
            refetch_delay,
        }
    }

    /// The cache this reconciler writes to
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ConversationCache> {
        &self.cache
    }

    /// Finalise a streamed turn
    ///
    /// Authoritative request values win; stream session values fill the
    /// gaps. Stops the session and returns the deferred clear (plus a
    /// deferred refetch when tools created files).
    pub fn finalize(
        &self,
        store: &mut StreamSessionStore,
        conversation: &ConversationId,
        request: FinalizeRequest,
        now: Instant,
    ) -> ReconcileOutcome {
        let session = store.get(conversation);
        let mut fields = FinalFields::from_request(request);

        if let Some(session) = session {
            if fields.content.as_ref().map_or(true, String::is_empty) && !session.content.is_empty()
            {
                fields.content = Some(session.content.clone());
            }
            if fields.reasoning.is_none() {
                fields.reasoning = session
                    .reasoning
                    .as_ref()
                    .map(|r| Reasoning::complete(r.text.clone()));
            }
            if fields.tool_calls.is_none() && !session.tool_calls.is_empty() {
                fields.tool_calls = Some(session.tool_calls.clone());
            }
        }
        let reasoning_secs = session
            .filter(|s| s.reasoning.is_some())
            .map(|s| s.reasoning_elapsed_secs(now));

        let write = self.write(conversation, &fields);

        if let Some(secs) = reasoning_secs {
            store.save_reasoning_duration(conversation, secs);
        }
        store.end_streaming(conversation, now);

        tracing::info!(
            inbox = %conversation,
            outcome = ?write,
            reason = ?fields.reason,
            "Turn finalised"
        );

        ReconcileOutcome {
            write,
            followups: self.followups(conversation, &fields),
        }
    }

    /// Finalise a turn from the final message alone (provider did not stream)
    ///
    /// Buffers are not consulted and the cache is invalidated immediately.
    pub fn finalize_direct(
        &self,
        store: &mut StreamSessionStore,
        conversation: &ConversationId,
        request: FinalizeRequest,
        now: Instant,
    ) -> ReconcileOutcome {
        let fields = FinalFields::from_request(request);
        let write = self.write(conversation, &fields);

        if let Some(secs) = store
            .get(conversation)
            .filter(|s| s.reasoning.is_some())
            .map(|s| s.reasoning_elapsed_secs(now))
        {
            store.save_reasoning_duration(conversation, secs);
        }
        store.end_streaming(conversation, now);
        self.cache.invalidate(conversation);

        tracing::info!(inbox = %conversation, outcome = ?write, "Turn finalised without streaming");

        ReconcileOutcome {
            write,
            followups: vec![Followup {
                after: self.clear_delay,
                action: TimerAction::ClearInbox(conversation.clone()),
            }],
        }
    }

    /// Apply the second completion signal of a turn that already finalised
    pub fn amend(&self, conversation: &ConversationId, request: FinalizeRequest) -> ReconcileOutcome {
        let fields = FinalFields::from_request(request);
        let write = self.write(conversation, &fields);
        tracing::debug!(inbox = %conversation, outcome = ?write, "Final message amended");

        let followups = if write == WriteOutcome::Skipped || !fields.has_generated_files() {
            Vec::new()
        } else {
            vec![Followup {
                after: self.refetch_delay,
                action: TimerAction::Invalidate(conversation.clone()),
            }]
        };
        ReconcileOutcome { write, followups }
    }

    /// Patch a tool call on the running placeholder when no session is live
    ///
    /// An existing call only takes the new status and result.
    pub fn patch_durable_tool_call(
        &self,
        conversation: &ConversationId,
        index: usize,
        patch: ToolCallPatch,
    ) -> bool {
        let mut patch = Some(patch);
        self.cache.write(conversation, &mut |pages: &mut ConversationPages| {
            let Some(last) = pages.last_message_mut() else {
                return false;
            };
            if !last.is_running_placeholder() {
                return false;
            }
            let Some(patch) = patch.take() else {
                return false;
            };
            match last.tool_calls.get_mut(index) {
                Some(existing) => existing.apply(ToolCallPatch {
                    status: patch.status,
                    result: patch.result,
                    ..ToolCallPatch::default()
                }),
                None => last.tool_calls.push(patch.into_record()),
            }
            true
        })
    }

    fn write(&self, conversation: &ConversationId, fields: &FinalFields) -> WriteOutcome {
        let mut outcome = WriteOutcome::Skipped;
        let stored = self.cache.write(conversation, &mut |pages: &mut ConversationPages| {
            let Some(last) = pages.last_message_mut() else {
                return false;
            };
            if last.is_running_placeholder() {
                fields.replace(last);
                outcome = WriteOutcome::Replaced;
                return true;
            }
            if last.role == MessageRole::Assistant && is_same_turn(last, fields) {
                if fields.amend(last) {
                    outcome = WriteOutcome::Amended;
                    return true;
                }
                return false;
            }
            false
        });

        if !stored {
            tracing::debug!(inbox = %conversation, "Durable write skipped, turn already reconciled");
            return WriteOutcome::Skipped;
        }
        outcome
    }

    fn followups(&self, conversation: &ConversationId, fields: &FinalFields) -> Vec<Followup> {
        let mut followups = vec![Followup {
            after: self.clear_delay,
            action: TimerAction::ClearInbox(conversation.clone()),
        }];
        if fields.has_generated_files() {
            followups.push(Followup {
                after: self.refetch_delay,
                action: TimerAction::Invalidate(conversation.clone()),
            });
        }
        followups
    }
}

/// Whether a finalised message belongs to the turn described by `fields`
///
/// A completed message still carrying the placeholder id was finalised by
/// this reconciler without a final id, so it is the same turn.
fn is_same_turn(last: &Message, fields: &FinalFields) -> bool {
    last.message_id.is_optimistic()
        || fields
            .message_id
            .as_ref()
            .is_some_and(|id| *id == last.message_id)
}
