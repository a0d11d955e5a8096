//! Inbox Stream Pipeline
//!
//! [`InboxStream`] owns every stateful component and wires the control flow:
//!
//! ```text
//! raw frame -> InboundFrame -> EventClassifier -> (per class)
//!     UserEcho       -> start_streaming
//!     StreamDelta    -> TokenBuffer -> (Flush timer) -> StreamSessionStore
//!                       is_done      -> flush + Reconciler::finalize
//!     AssistantFinal -> finalize | finalize_direct | amend
//!     ToolWidget     -> update_tool_call | durable patch
//!     PaymentWidget  -> WidgetStore
//! ```
//!
//! # Design Philosophy
//!
//! The pipeline is synchronous and single-owner. It never sleeps: deferred
//! work goes into a [`TimerQueue`] and runs when the owner calls
//! [`InboxStream::fire_due`]. Every public method degrades to "ignore and
//! continue"; a lost delta is recovered by the final message or the next
//! cache refetch, while an error would tear down a live chat view.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cache::{ConversationCache, InMemoryWidgetStore, WidgetStore};
use crate::classifier::{DoneSignal, EventClassifier, FrameClass, LocalActor};
use crate::config::{ConfigError, StreamConfig};
use crate::messages::{ConversationId, Message, ToolCallPatch};
use crate::reader::{read_tail, TailView};
use crate::reconciler::{FinalizeRequest, Followup, Reconciler};
use crate::scheduler::{Clock, SystemClock, TimerAction, TimerId, TimerQueue};
use crate::streaming::{StreamSessionStore, TokenBuffer, TokenKind};
use crate::subscription::SubscriptionManager;
use crate::transport::frame::InboundFrame;
use crate::transport::traits::FrameSink;

/// Errors building a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required collaborator was not provided
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The configuration is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Per-conversation turn state next to the session
#[derive(Debug, Default)]
struct Lane {
    buffer: TokenBuffer,
    /// A `Stream` frame was seen for the current turn
    stream_supported: bool,
    /// The current turn was already finalised
    stream_completed: bool,
    stall_timer: Option<TimerId>,
}

impl Lane {
    fn arm_stall(
        &mut self,
        timers: &mut TimerQueue,
        conversation: &ConversationId,
        timeout: Option<Duration>,
        now: Instant,
    ) {
        self.disarm_stall(timers);
        if let Some(timeout) = timeout {
            self.stall_timer = Some(
                timers.schedule_at(now + timeout, TimerAction::StallCheck(conversation.clone())),
            );
        }
    }

    fn disarm_stall(&mut self, timers: &mut TimerQueue) {
        if let Some(id) = self.stall_timer.take() {
            timers.cancel(id);
        }
    }

    fn cancel_flush(&mut self, timers: &mut TimerQueue) {
        if let Some(id) = self.buffer.take_pending_flush() {
            timers.cancel(id);
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`InboxStream`]
#[derive(Default)]
pub struct InboxStreamBuilder {
    config: Option<StreamConfig>,
    actor: Option<LocalActor>,
    bearer_auth: String,
    cache: Option<Arc<dyn ConversationCache>>,
    widgets: Option<Arc<dyn WidgetStore>>,
    sink: Option<Arc<dyn FrameSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl InboxStreamBuilder {
    /// Use this configuration (defaults otherwise)
    #[must_use]
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The local user (required)
    #[must_use]
    pub fn actor(mut self, actor: LocalActor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Bearer token for subscription frames
    #[must_use]
    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.bearer_auth = token.into();
        self
    }

    /// Durable conversation cache (required)
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ConversationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Widget store (an in-memory store otherwise)
    #[must_use]
    pub fn widgets(mut self, widgets: Arc<dyn WidgetStore>) -> Self {
        self.widgets = Some(widgets);
        self
    }

    /// Outbound control frame sink (required)
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Clock (the system clock otherwise)
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the pipeline
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::MissingCollaborator` when the actor, cache or
    /// sink is missing, and `PipelineError::Config` for invalid settings.
    pub fn build(self) -> Result<InboxStream, PipelineError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let actor = self.actor.ok_or(PipelineError::MissingCollaborator("actor"))?;
        let cache = self.cache.ok_or(PipelineError::MissingCollaborator("cache"))?;
        let sink = self.sink.ok_or(PipelineError::MissingCollaborator("sink"))?;
        let widgets = self
            .widgets
            .unwrap_or_else(|| Arc::new(InMemoryWidgetStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(InboxStream {
            store: StreamSessionStore::new(config.reasoning_ledger_capacity),
            lanes: HashMap::new(),
            timers: TimerQueue::new(),
            classifier: EventClassifier::new(actor),
            reconciler: Reconciler::new(cache, config.clear_delay, config.refetch_delay),
            widgets,
            subscriptions: SubscriptionManager::new(self.bearer_auth, sink),
            clock,
            config,
        })
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The streaming conciliation pipeline for one chat view
pub struct InboxStream {
    config: StreamConfig,
    clock: Arc<dyn Clock>,
    store: StreamSessionStore,
    lanes: HashMap<ConversationId, Lane>,
    timers: TimerQueue,
    classifier: EventClassifier,
    reconciler: Reconciler,
    widgets: Arc<dyn WidgetStore>,
    subscriptions: SubscriptionManager,
}

impl InboxStream {
    /// Start building a pipeline
    #[must_use]
    pub fn builder() -> InboxStreamBuilder {
        InboxStreamBuilder::default()
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Session store (read-only)
    #[must_use]
    pub fn store(&self) -> &StreamSessionStore {
        &self.store
    }

    /// The mounted conversation
    #[must_use]
    pub fn current(&self) -> Option<&ConversationId> {
        self.classifier.current()
    }

    /// Earliest pending timer deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Number of pending timers
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// What the UI should render in the assistant slot of `conversation`
    #[must_use]
    pub fn tail(&self, conversation: &ConversationId) -> Option<TailView> {
        read_tail(
            &self.store,
            self.reconciler.cache().as_ref(),
            conversation,
            self.clock.now(),
            self.clock.wall_time(),
        )
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    /// Show a conversation
    ///
    /// Switching away from another conversation detaches it first. An ended
    /// session found here gets its deferred clear re-armed.
    pub fn mount(&mut self, conversation: &ConversationId) {
        if self.classifier.current() == Some(conversation) {
            self.subscriptions.mount(conversation);
            return;
        }
        if let Some(previous) = self.classifier.current().cloned() {
            self.detach(&previous);
        }

        self.classifier.set_current(Some(conversation.clone()));
        self.subscriptions.switch_to(conversation);

        let now = self.clock.now();
        match self.store.get(conversation).map(|s| s.is_streaming) {
            Some(false) => {
                self.timers.schedule_at(
                    now + self.config.clear_delay,
                    TimerAction::ClearInbox(conversation.clone()),
                );
            }
            Some(true) => {
                let lane = self.lanes.entry(conversation.clone()).or_default();
                lane.arm_stall(&mut self.timers, conversation, self.config.stall_timeout, now);
            }
            None => {}
        }
        tracing::info!(inbox = %conversation, "Conversation mounted");
    }

    /// Stop showing the mounted conversation
    pub fn unmount(&mut self) {
        if let Some(previous) = self.classifier.current().cloned() {
            self.detach(&previous);
            tracing::info!(inbox = %previous, "Conversation unmounted");
        }
        self.classifier.set_current(None);
        self.subscriptions.teardown();
    }

    /// Forget every session, lane and timer (e.g. on logout)
    pub fn clear_all(&mut self) {
        self.store.clear_all();
        self.lanes.clear();
        self.timers = TimerQueue::new();
    }

    /// Flush buffered text into the session and drop the conversation's
    /// timers; the session itself survives for a later remount
    fn detach(&mut self, conversation: &ConversationId) {
        let now = self.clock.now();
        if let Some(lane) = self.lanes.get_mut(conversation) {
            lane.cancel_flush(&mut self.timers);
            lane.buffer.apply_to(&mut self.store, conversation, now);
            lane.stall_timer = None;
        }
        let cancelled = self.timers.cancel_where(conversation, |_| true);
        tracing::debug!(inbox = %conversation, cancelled, "Conversation detached");
    }

    // ------------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------------

    /// Handle one raw text frame; malformed frames are logged and dropped
    pub fn handle_raw(&mut self, raw: &str) {
        match InboundFrame::decode(raw) {
            Ok(frame) => self.handle_frame(&frame),
            Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
        }
    }

    /// Handle one decoded frame
    pub fn handle_frame(&mut self, frame: &InboundFrame) {
        let class = match self.classifier.classify(frame, self.clock.wall_time()) {
            Ok(Some(class)) => class,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(inbox = %frame.inbox(), error = %e, "Dropping malformed frame");
                return;
            }
        };

        let conversation = frame.inbox().clone();
        let now = self.clock.now();
        match class {
            FrameClass::UserEcho => self.on_user_echo(&conversation, now),
            FrameClass::StreamDelta { kind, text, done } => {
                self.on_stream_delta(&conversation, kind, &text, done, now);
            }
            FrameClass::AssistantFinal(request) => {
                self.on_assistant_final(&conversation, request, now);
            }
            FrameClass::ToolWidget { index, patch } => {
                self.on_tool_widget(&conversation, index, patch, now);
            }
            FrameClass::PaymentWidget(widget) => self.widgets.set_widget(widget),
            FrameClass::Unknown { message_type } => {
                tracing::trace!(inbox = %conversation, message_type = %message_type, "Ignoring frame");
            }
        }
    }

    fn on_user_echo(&mut self, conversation: &ConversationId, now: Instant) {
        self.begin_turn(conversation, now);
    }

    /// Reset the lane for a new turn and start its session
    fn begin_turn(&mut self, conversation: &ConversationId, now: Instant) {
        let lane = self.lanes.entry(conversation.clone()).or_default();
        lane.cancel_flush(&mut self.timers);
        lane.buffer.reset();
        lane.stream_supported = false;
        lane.stream_completed = false;

        // A deferred clear from the previous turn must not hit the new one
        self.timers
            .cancel_where(conversation, |a| matches!(a, TimerAction::ClearInbox(_)));
        self.store.start_streaming(conversation);
        lane.arm_stall(&mut self.timers, conversation, self.config.stall_timeout, now);
    }

    fn on_stream_delta(
        &mut self,
        conversation: &ConversationId,
        kind: TokenKind,
        text: &str,
        done: Option<DoneSignal>,
        now: Instant,
    ) {
        if self.lanes.get(conversation).is_some_and(|l| l.stream_completed) {
            if !self.opens_next_turn(conversation) {
                tracing::trace!(inbox = %conversation, "Ignoring delta after completion");
                return;
            }
            tracing::debug!(inbox = %conversation, "Stream opened a new turn without a user echo");
            self.begin_turn(conversation, now);
        }

        let lane = self.lanes.entry(conversation.clone()).or_default();
        lane.stream_supported = true;

        if !self.store.is_streaming(conversation) {
            self.timers
                .cancel_where(conversation, |a| matches!(a, TimerAction::ClearInbox(_)));
            self.store.start_streaming(conversation);
        }

        let needs_flush = lane.buffer.push(kind, text);
        lane.arm_stall(&mut self.timers, conversation, self.config.stall_timeout, now);

        if let Some(done) = done {
            lane.stream_completed = true;
            self.flush(conversation, Some(done.into()), now);
        } else if needs_flush {
            let id = self.timers.schedule_at(
                now + self.config.flush_interval,
                TimerAction::Flush(conversation.clone()),
            );
            lane.buffer.set_pending_flush(id);
        }
    }

    /// Whether a delta arriving after the turn completed belongs to the next
    /// turn: the ended session was already cleared, or the cache already
    /// holds the next running placeholder
    fn opens_next_turn(&self, conversation: &ConversationId) -> bool {
        if self.store.is_streaming(conversation) {
            return false;
        }
        self.store.get(conversation).is_none()
            || self
                .reconciler
                .cache()
                .read(conversation)
                .is_some_and(|pages| pages.last_message().is_some_and(Message::is_running_placeholder))
    }

    fn on_assistant_final(
        &mut self,
        conversation: &ConversationId,
        request: FinalizeRequest,
        now: Instant,
    ) {
        let lane = self.lanes.entry(conversation.clone()).or_default();
        let completed = lane.stream_completed;
        let streamed = lane.stream_supported;
        lane.stream_supported = false;
        lane.stream_completed = true;

        if completed {
            let outcome = self.reconciler.amend(conversation, request);
            self.schedule(outcome.followups, now);
        } else if streamed {
            self.flush(conversation, Some(request), now);
        } else {
            lane.cancel_flush(&mut self.timers);
            lane.buffer.reset();
            lane.disarm_stall(&mut self.timers);
            let outcome =
                self.reconciler
                    .finalize_direct(&mut self.store, conversation, request, now);
            self.schedule(outcome.followups, now);
        }
    }

    fn on_tool_widget(
        &mut self,
        conversation: &ConversationId,
        index: usize,
        patch: ToolCallPatch,
        now: Instant,
    ) {
        if self.store.is_streaming(conversation) {
            self.store.update_tool_call(conversation, patch, index);
            let lane = self.lanes.entry(conversation.clone()).or_default();
            lane.arm_stall(&mut self.timers, conversation, self.config.stall_timeout, now);
        } else if !self
            .reconciler
            .patch_durable_tool_call(conversation, index, patch)
        {
            tracing::debug!(inbox = %conversation, index, "Tool update had no running message to patch");
        }
    }

    /// Apply buffered tokens now; with a request, also finalise the turn
    fn flush(&mut self, conversation: &ConversationId, finalize: Option<FinalizeRequest>, now: Instant) {
        let lane = self.lanes.entry(conversation.clone()).or_default();
        lane.cancel_flush(&mut self.timers);
        let applied = lane.buffer.apply_to(&mut self.store, conversation, now);

        let Some(request) = finalize else {
            if applied {
                tracing::trace!(inbox = %conversation, "Tokens flushed");
            }
            return;
        };
        lane.disarm_stall(&mut self.timers);
        let outcome = self
            .reconciler
            .finalize(&mut self.store, conversation, request, now);
        self.schedule(outcome.followups, now);
    }

    fn schedule(&mut self, followups: Vec<Followup>, now: Instant) {
        for followup in followups {
            self.timers.schedule_at(now + followup.after, followup.action);
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Run every timer that is due; returns how many ran
    pub fn fire_due(&mut self) -> usize {
        let mut fired = 0;
        while let Some((id, action)) = self.timers.pop_due(self.clock.now()) {
            fired += 1;
            let now = self.clock.now();
            match action {
                TimerAction::Flush(conversation) => self.flush(&conversation, None, now),
                TimerAction::ClearInbox(conversation) => {
                    if !self.store.is_streaming(&conversation) {
                        self.store.clear_inbox(&conversation);
                        self.lanes.remove(&conversation);
                    }
                }
                TimerAction::Invalidate(conversation) => {
                    self.reconciler.cache().invalidate(&conversation);
                }
                TimerAction::StallCheck(conversation) => {
                    self.on_stall(&conversation, id, now);
                }
            }
        }
        fired
    }

    fn on_stall(&mut self, conversation: &ConversationId, id: TimerId, now: Instant) {
        let lane = self.lanes.entry(conversation.clone()).or_default();
        if lane.stall_timer == Some(id) {
            lane.stall_timer = None;
        }
        if !self.store.is_streaming(conversation) {
            return;
        }
        tracing::warn!(
            inbox = %conversation,
            timeout_secs = self.config.stall_timeout.map(|t| t.as_secs()),
            "Stream stalled, force-finalising turn"
        );
        lane.stream_completed = true;
        self.flush(conversation, Some(FinalizeRequest::timeout()), now);
        self.reconciler.cache().invalidate(conversation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryConversationCache;
    use crate::scheduler::ManualClock;
    use crate::transport::in_process::InProcessTransport;

    #[test]
    fn test_builder_requires_collaborators() {
        let result = InboxStream::builder()
            .actor(LocalActor::new("@@me", "main"))
            .build();
        assert!(matches!(result, Err(PipelineError::MissingCollaborator("cache"))));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let (transport, _node) = InProcessTransport::new_pair();
        let (sink, _source) = transport.into_parts();
        let mut config = StreamConfig::default();
        config.flush_interval = Duration::ZERO;

        let result = InboxStream::builder()
            .config(config)
            .actor(LocalActor::new("@@me", "main"))
            .cache(Arc::new(InMemoryConversationCache::new()))
            .sink(Arc::new(sink))
            .build();
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_flush_timer_coalesces() {
        let (transport, _node) = InProcessTransport::new_pair();
        let (sink, _source) = transport.into_parts();
        let clock = ManualClock::new();
        let mut stream = InboxStream::builder()
            .actor(LocalActor::new("@@me", "main"))
            .cache(Arc::new(InMemoryConversationCache::new()))
            .sink(Arc::new(sink))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        let c1 = ConversationId::new("c1");
        stream.mount(&c1);

        for token in ["a", "b", "c"] {
            stream.handle_raw(&format!(
                r#"{{"inbox":"c1","message_type":"Stream","message":"{token}"}}"#
            ));
        }
        // one flush + one stall check
        assert_eq!(stream.pending_timers(), 2);
        assert_eq!(stream.store().get(&c1).unwrap().content, "");

        clock.advance_ms(50);
        assert_eq!(stream.fire_due(), 1);
        assert_eq!(stream.store().get(&c1).unwrap().content, "abc");
    }

    #[test]
    fn test_deferred_clear_drops_lane() {
        let (transport, _node) = InProcessTransport::new_pair();
        let (sink, _source) = transport.into_parts();
        let clock = ManualClock::new();
        let mut stream = InboxStream::builder()
            .actor(LocalActor::new("@@me", "main"))
            .cache(Arc::new(InMemoryConversationCache::new()))
            .sink(Arc::new(sink))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        let c1 = ConversationId::new("c1");
        stream.mount(&c1);

        stream.handle_raw(r#"{"inbox":"c2","message_type":"Stream","message":"x"}"#);
        stream.handle_raw(r#"{"inbox":"c1","message_type":"Stream","message":"hi"}"#);
        stream.handle_raw(
            r#"{"inbox":"c1","message_type":"Stream","message":"","metadata":{"is_done":true,"id":"m1"}}"#,
        );
        assert_eq!(stream.lanes.len(), 1);

        clock.advance(stream.config().clear_delay);
        stream.fire_due();
        assert!(stream.store().get(&c1).is_none());
        assert!(stream.lanes.is_empty());
    }
}
