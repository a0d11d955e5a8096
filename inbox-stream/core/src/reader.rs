//! Transcript Reader
//!
//! What the UI shows in the assistant's slot. The stream session wins while
//! it has something to show and the durable tail is still the optimistic
//! placeholder (or the user's message, before a placeholder exists);
//! otherwise the durable message is shown. The two are never
//! mixed across different messages.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::ConversationCache;
use crate::messages::{ConversationId, Message, MessageRole, MessageStatus};
use crate::streaming::{StreamSession, StreamSessionStore};

/// Where the shown message came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TailSource {
    /// Merged from the live stream session
    Ephemeral,
    /// Straight from the durable cache
    Durable,
}

/// The newest message of a conversation as the UI should render it
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TailView {
    /// Source of `message`
    pub source: TailSource,
    /// Message to render
    pub message: Message,
    /// "Thought for N seconds", live while reasoning runs
    pub reasoning_secs: Option<u64>,
}

/// Read the newest message of `conversation`
///
/// `wall` stamps a synthesized message when the cache has no placeholder
/// yet. Returns `None` only when neither source has anything.
pub fn read_tail(
    store: &StreamSessionStore,
    cache: &dyn ConversationCache,
    conversation: &ConversationId,
    now: Instant,
    wall: DateTime<Utc>,
) -> Option<TailView> {
    let durable = cache
        .read(conversation)
        .and_then(|pages| pages.last_message().cloned());
    let session = store.get(conversation);

    let reasoning_secs = session
        .filter(|s| s.reasoning.is_some())
        .map(|s| s.reasoning_elapsed_secs(now))
        .or_else(|| store.reasoning_duration(conversation));

    // The assistant slot is still open when the durable tail is missing, is
    // the user's own message, or is the optimistic placeholder
    let slot_open = durable.as_ref().map_or(true, |m| {
        m.role == MessageRole::User || m.message_id.is_optimistic()
    });

    match session {
        Some(session) if slot_open && (session.is_streaming || session.has_content()) => {
            let durable = durable.filter(|m| m.role == MessageRole::Assistant);
            Some(TailView {
                source: TailSource::Ephemeral,
                message: merge(session, durable, wall),
                reasoning_secs,
            })
        }
        _ => durable.map(|message| TailView {
            source: TailSource::Durable,
            message,
            reasoning_secs,
        }),
    }
}

fn merge(session: &StreamSession, durable: Option<Message>, wall: DateTime<Utc>) -> Message {
    let mut message = durable.unwrap_or_else(|| {
        let mut placeholder = Message::optimistic_assistant(wall);
        if !session.is_streaming {
            placeholder.status = MessageStatus::complete();
        }
        placeholder
    });

    if !session.content.is_empty() {
        message.content = session.content.clone();
    }
    if session.reasoning.is_some() {
        message.reasoning = session.reasoning.clone();
    }
    if !session.tool_calls.is_empty() {
        message.tool_calls = session.tool_calls.clone();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryConversationCache;
    use crate::messages::MessageId;

    fn conv() -> ConversationId {
        ConversationId::new("c1")
    }

    #[test]
    fn test_nothing_to_read() {
        let store = StreamSessionStore::default();
        let cache = InMemoryConversationCache::new();
        assert!(read_tail(&store, &cache, &conv(), Instant::now(), Utc::now()).is_none());
    }

    #[test]
    fn test_started_session_is_never_empty() {
        let mut store = StreamSessionStore::default();
        let cache = InMemoryConversationCache::new();
        store.start_streaming(&conv());

        let view = read_tail(&store, &cache, &conv(), Instant::now(), Utc::now()).unwrap();
        assert_eq!(view.source, TailSource::Ephemeral);
        assert!(view.message.is_running_placeholder());
    }

    #[test]
    fn test_ephemeral_overrides_placeholder() {
        let mut store = StreamSessionStore::default();
        let cache = InMemoryConversationCache::new();
        let now = Instant::now();
        cache.push_optimistic_assistant(&conv(), Utc::now());
        store.start_streaming(&conv());
        store.append_content(&conv(), "Hello", now);

        let view = read_tail(&store, &cache, &conv(), now, Utc::now()).unwrap();
        assert_eq!(view.source, TailSource::Ephemeral);
        assert_eq!(view.message.content, "Hello");
        assert!(view.message.message_id.is_optimistic());
    }

    #[test]
    fn test_durable_wins_once_replaced() {
        let mut store = StreamSessionStore::default();
        let cache = InMemoryConversationCache::new();
        let now = Instant::now();
        cache.push_optimistic_assistant(&conv(), Utc::now());
        store.start_streaming(&conv());
        store.append_content(&conv(), "streamed", now);
        store.end_streaming(&conv(), now);
        cache.write(&conv(), &mut |pages| {
            let Some(last) = pages.last_message_mut() else {
                return false;
            };
            last.message_id = MessageId::new("m1");
            last.content = "final".to_string();
            last.status = MessageStatus::complete();
            true
        });

        let view = read_tail(&store, &cache, &conv(), now, Utc::now()).unwrap();
        assert_eq!(view.source, TailSource::Durable);
        assert_eq!(view.message.content, "final");
    }

    #[test]
    fn test_ephemeral_shown_after_user_message() {
        let mut store = StreamSessionStore::default();
        let cache = InMemoryConversationCache::new();
        let now = Instant::now();
        cache.push_message(&conv(), Message::user("u1", "hi", Utc::now()));
        store.start_streaming(&conv());
        store.append_content(&conv(), "Hey", now);

        let view = read_tail(&store, &cache, &conv(), now, Utc::now()).unwrap();
        assert_eq!(view.source, TailSource::Ephemeral);
        assert_eq!(view.message.role, MessageRole::Assistant);
        assert_eq!(view.message.content, "Hey");
    }

    #[test]
    fn test_reasoning_secs_falls_back_to_ledger() {
        let mut store = StreamSessionStore::default();
        let cache = InMemoryConversationCache::new();
        cache.push_message(&conv(), Message::user("u1", "hi", Utc::now()));
        store.save_reasoning_duration(&conv(), 7);

        let view = read_tail(&store, &cache, &conv(), Instant::now(), Utc::now()).unwrap();
        assert_eq!(view.source, TailSource::Durable);
        assert_eq!(view.reasoning_secs, Some(7));
    }
}
