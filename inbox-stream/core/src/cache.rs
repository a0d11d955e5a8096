//! External Collaborators
//!
//! The durable conversation cache and the widget side-store belong to the
//! UI, not to this crate. The pipeline only sees them through the
//! [`ConversationCache`] and [`WidgetStore`] traits, so a UI can plug in its
//! own query cache. In-memory implementations back the tests and the replay
//! tool.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::{ConversationId, Message, MessageRole};

// ============================================================================
// Conversation cache
// ============================================================================

/// Paginated messages of one conversation, oldest page first
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPages {
    /// Pages of messages, each ordered oldest first
    pub pages: Vec<Vec<Message>>,
}

impl ConversationPages {
    /// Wrap existing pages
    #[must_use]
    pub fn new(pages: Vec<Vec<Message>>) -> Self {
        Self { pages }
    }

    /// The newest message
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.pages.last()?.last()
    }

    /// The newest message, mutably
    pub fn last_message_mut(&mut self) -> Option<&mut Message> {
        self.pages.last_mut()?.last_mut()
    }

    /// All messages in order
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.pages.iter().flatten()
    }

    /// Total number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    /// Whether there are no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append to the last page, creating one if needed
    pub fn push(&mut self, message: Message) {
        match self.pages.last_mut() {
            Some(page) => page.push(message),
            None => self.pages.push(vec![message]),
        }
    }
}

/// Durable, paginated message cache owned by the UI
pub trait ConversationCache: Send + Sync {
    /// Snapshot of a conversation's pages
    fn read(&self, conversation: &ConversationId) -> Option<ConversationPages>;

    /// Conditionally update a conversation
    ///
    /// The updater returns `true` if it changed the pages; returning `false`
    /// must leave the cache untouched. Returns whether a change was stored.
    fn write(
        &self,
        conversation: &ConversationId,
        updater: &mut dyn FnMut(&mut ConversationPages) -> bool,
    ) -> bool;

    /// Mark a conversation stale so it is refetched from the node
    fn invalidate(&self, conversation: &ConversationId);
}

/// In-memory [`ConversationCache`]
#[derive(Debug, Default)]
pub struct InMemoryConversationCache {
    conversations: DashMap<ConversationId, ConversationPages>,
    invalidations: DashMap<ConversationId, usize>,
}

impl InMemoryConversationCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a conversation's pages
    pub fn seed(&self, conversation: &ConversationId, pages: ConversationPages) {
        self.conversations.insert(conversation.clone(), pages);
    }

    /// Append a message to the last page
    pub fn push_message(&self, conversation: &ConversationId, message: Message) {
        self.conversations
            .entry(conversation.clone())
            .or_default()
            .push(message);
    }

    /// Insert the running assistant placeholder, as the UI does on send
    ///
    /// Skipped when the newest message already is an assistant message.
    /// Returns whether the placeholder was inserted.
    pub fn push_optimistic_assistant(
        &self,
        conversation: &ConversationId,
        created_at: DateTime<Utc>,
    ) -> bool {
        let mut pages = self.conversations.entry(conversation.clone()).or_default();
        if pages
            .last_message()
            .is_some_and(|last| last.role == MessageRole::Assistant)
        {
            return false;
        }
        pages.push(Message::optimistic_assistant(created_at));
        true
    }

    /// How many times a conversation was invalidated
    #[must_use]
    pub fn invalidation_count(&self, conversation: &ConversationId) -> usize {
        self.invalidations
            .get(conversation)
            .map_or(0, |count| *count)
    }
}

impl ConversationCache for InMemoryConversationCache {
    fn read(&self, conversation: &ConversationId) -> Option<ConversationPages> {
        self.conversations
            .get(conversation)
            .map(|pages| pages.clone())
    }

    fn write(
        &self,
        conversation: &ConversationId,
        updater: &mut dyn FnMut(&mut ConversationPages) -> bool,
    ) -> bool {
        let Some(mut entry) = self.conversations.get_mut(conversation) else {
            return false;
        };
        // Work on a copy so a declined update leaves no partial edits behind
        let mut draft = entry.clone();
        if !updater(&mut draft) {
            return false;
        }
        *entry = draft;
        true
    }

    fn invalidate(&self, conversation: &ConversationId) {
        *self.invalidations.entry(conversation.clone()).or_insert(0) += 1;
        tracing::debug!(inbox = %conversation, "Conversation cache invalidated");
    }
}

// ============================================================================
// Widget store
// ============================================================================

/// A non-chat widget raised by the node (e.g. a payment request)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    /// Widget kind, e.g. `PaymentRequest`
    pub name: String,
    /// Widget payload
    pub data: Value,
}

/// Side-store for widgets shown outside the transcript
pub trait WidgetStore: Send + Sync {
    /// Replace the current widget
    fn set_widget(&self, widget: Widget);
}

/// In-memory [`WidgetStore`] holding the latest widget
#[derive(Debug, Default)]
pub struct InMemoryWidgetStore {
    current: RwLock<Option<Widget>>,
}

impl InMemoryWidgetStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current widget
    #[must_use]
    pub fn current(&self) -> Option<Widget> {
        self.current.read().clone()
    }

    /// Dismiss the current widget
    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

impl WidgetStore for InMemoryWidgetStore {
    fn set_widget(&self, widget: Widget) {
        tracing::debug!(widget = %widget.name, "Widget set");
        *self.current.write() = Some(widget);
    }
}
