//! Subscription Manager
//!
//! Keeps the node subscribed to the `inbox` and `widget` topics of exactly the
//! mounted conversation. Every change is explicit: a switch unsubscribes the
//! previous conversation before subscribing the next one, and teardown always
//! unsubscribes. Send failures are logged and otherwise ignored; the next
//! mount re-subscribes.

use std::sync::Arc;

use crate::messages::ConversationId;
use crate::transport::frame::{ControlFrame, Subscription, Topic};
use crate::transport::traits::FrameSink;

const TOPICS: [Topic; 2] = [Topic::Inbox, Topic::Widget];

/// Tracks and drives the node-side subscriptions
pub struct SubscriptionManager {
    bearer_auth: String,
    sink: Arc<dyn FrameSink>,
    current: Option<ConversationId>,
}

impl SubscriptionManager {
    /// Create a manager sending through `sink`
    pub fn new(bearer_auth: impl Into<String>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            bearer_auth: bearer_auth.into(),
            sink,
            current: None,
        }
    }

    /// The subscribed conversation
    #[must_use]
    pub fn current(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    /// Subscribe to a conversation
    ///
    /// Subscribing to the already tracked conversation re-sends the
    /// subscription; the node treats duplicates as no-ops.
    pub fn mount(&mut self, conversation: &ConversationId) {
        if let Some(previous) = self.current.take() {
            if previous != *conversation {
                self.send(ControlFrame::unsubscribe(
                    &self.bearer_auth,
                    subscriptions(&previous),
                ));
            }
        }
        self.send(ControlFrame::subscribe(
            &self.bearer_auth,
            subscriptions(conversation),
        ));
        self.current = Some(conversation.clone());
        tracing::debug!(inbox = %conversation, "Subscribed");
    }

    /// Move the subscription to another conversation
    pub fn switch_to(&mut self, conversation: &ConversationId) {
        self.mount(conversation);
    }

    /// Unsubscribe and forget the tracked conversation
    pub fn teardown(&mut self) {
        if let Some(previous) = self.current.take() {
            self.send(ControlFrame::unsubscribe(
                &self.bearer_auth,
                subscriptions(&previous),
            ));
            tracing::debug!(inbox = %previous, "Unsubscribed");
        }
    }

    fn send(&self, frame: ControlFrame) {
        if let Err(e) = self.sink.send(frame) {
            tracing::warn!(error = %e, "Failed to send subscription frame");
        }
    }
}

fn subscriptions(conversation: &ConversationId) -> Vec<Subscription> {
    TOPICS
        .iter()
        .map(|topic| Subscription::new(*topic, conversation))
        .collect()
}
