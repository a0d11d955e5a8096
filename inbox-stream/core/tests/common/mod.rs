//! Shared fixtures for the pipeline integration tests
//!
//! Frames are built as raw JSON strings, exactly as a node would send them.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use inbox_stream_core::{
    ConversationCache, ConversationId, InMemoryConversationCache, InMemoryWidgetStore,
    InProcessNode, InProcessTransport, InboxStream, LocalActor, ManualClock, Message,
    StreamConfig,
};

pub const IDENTITY: &str = "@@localhost.sep-shinkai";
pub const PROFILE: &str = "main";
pub const AGENT_IDENTITY: &str = "@@localhost.sep-shinkai";
pub const AGENT_PROFILE: &str = "main/agent/llama3";

pub struct Harness {
    pub stream: InboxStream,
    pub cache: Arc<InMemoryConversationCache>,
    pub widgets: Arc<InMemoryWidgetStore>,
    pub clock: ManualClock,
    pub node: InProcessNode,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        let (transport, node) = InProcessTransport::new_pair();
        let (sink, _source) = transport.into_parts();
        let cache = Arc::new(InMemoryConversationCache::new());
        let widgets = Arc::new(InMemoryWidgetStore::new());
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        let cache_seam: Arc<dyn ConversationCache> = cache.clone();
        let stream = InboxStream::builder()
            .config(config)
            .actor(LocalActor::new(IDENTITY, PROFILE))
            .bearer_auth("test-token")
            .cache(cache_seam)
            .widgets(widgets.clone())
            .sink(Arc::new(sink))
            .clock(Arc::new(clock.clone()))
            .build()
            .expect("valid pipeline");

        Self {
            stream,
            cache,
            widgets,
            clock,
            node,
        }
    }

    /// What the UI does on send: user message plus running placeholder
    pub fn send_user_message(&self, conversation: &ConversationId, text: &str) {
        self.cache
            .push_message(conversation, Message::user(format!("u-{text}"), text, Utc::now()));
        self.cache.push_optimistic_assistant(conversation, Utc::now());
    }

    pub fn feed(&mut self, frame: &str) {
        self.stream.handle_raw(frame);
    }

    /// Advance the clock and run whatever became due
    pub fn advance_ms(&mut self, ms: u64) -> usize {
        self.clock.advance_ms(ms);
        self.stream.fire_due()
    }

    pub fn last_durable(&self, conversation: &ConversationId) -> Message {
        self.cache
            .read(conversation)
            .and_then(|pages| pages.last_message().cloned())
            .expect("conversation has messages")
    }

    pub fn durable_count(&self, conversation: &ConversationId) -> usize {
        self.cache.read(conversation).map_or(0, |pages| pages.len())
    }
}

pub fn conv(id: &str) -> ConversationId {
    ConversationId::new(id)
}

// =============================================================================
// Frame builders
// =============================================================================

pub fn stream_frame(inbox: &str, text: &str) -> String {
    json!({"inbox": inbox, "message_type": "Stream", "message": text}).to_string()
}

pub fn reasoning_frame(inbox: &str, text: &str) -> String {
    json!({
        "inbox": inbox,
        "message_type": "Stream",
        "message": text,
        "metadata": {"is_reasoning": true}
    })
    .to_string()
}

pub fn done_frame(inbox: &str, id: &str) -> String {
    json!({
        "inbox": inbox,
        "message_type": "Stream",
        "message": "",
        "metadata": {"is_done": true, "id": id, "tps": "42.5", "duration_ms": 1200}
    })
    .to_string()
}

fn envelope(sender: &str, profile: &str, signature: &str, raw_content: &Value) -> String {
    json!({
        "external_metadata": {
            "sender": sender,
            "signature": "outer-signature",
            "scheduled_time": "2024-05-01T12:00:05.000Z"
        },
        "body": {
            "unencrypted": {
                "internal_metadata": {"sender_subidentity": profile, "signature": signature},
                "message_data": {
                    "unencrypted": {"message_raw_content": raw_content.to_string()}
                }
            }
        }
    })
    .to_string()
}

pub fn user_echo(inbox: &str, text: &str) -> String {
    json!({
        "inbox": inbox,
        "message_type": "ShinkaiMessage",
        "message": envelope(IDENTITY, PROFILE, &format!("u-{text}"), &json!({"content": text}))
    })
    .to_string()
}

pub fn assistant_final(inbox: &str, id: &str, content: &str) -> String {
    assistant_final_with(inbox, id, json!({"content": content}))
}

pub fn assistant_final_with(inbox: &str, id: &str, raw_content: Value) -> String {
    json!({
        "inbox": inbox,
        "message_type": "ShinkaiMessage",
        "message": envelope(AGENT_IDENTITY, AGENT_PROFILE, id, &raw_content)
    })
    .to_string()
}

pub fn tool_widget(inbox: &str, index: usize, name: &str, status: &str, result: Option<&str>) -> String {
    let mut request = json!({
        "tool_name": name,
        "args": {"arguments": {"query": "rust"}},
        "status": {"type_": status},
        "tool_router_key": format!("local:::{name}"),
        "index": index
    });
    if let Some(result) = result {
        request["result"] = json!({"data": {"message": result}});
    }
    json!({
        "inbox": inbox,
        "message_type": "Widget",
        "widget": {"ToolRequest": request}
    })
    .to_string()
}

pub fn payment_widget(inbox: &str) -> String {
    json!({
        "inbox": inbox,
        "message_type": "Widget",
        "widget": {"PaymentRequest": {"tool_key": "local:::paid_tool", "usage_type": {"PerUse": "0.1"}}}
    })
    .to_string()
}
