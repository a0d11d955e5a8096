//! Wire Frames
//!
//! JSON shapes exchanged with the node's WebSocket endpoint.
//!
//! # Inbound
//!
//! ```text
//! {
//!   "inbox": "<conversation id>",
//!   "message_type": "ShinkaiMessage" | "Stream" | "Widget",
//!   "message": "<token text, or a JSON-encoded envelope for ShinkaiMessage>",
//!   "metadata": { "is_reasoning", "is_done", "id", "tps", "duration_ms" },
//!   "widget": { "ToolRequest": {..} } | { "PaymentRequest": {..} }
//! }
//! ```
//!
//! Frames decode into the tagged [`InboundFrame`]; any `message_type` this
//! crate does not handle becomes [`InboundFrame::Unknown`].
//!
//! # Outbound
//!
//! ```text
//! { "bearer_auth": "<token>",
//!   "message": { "subscriptions": [{topic, subtopic}], "unsubscriptions": [..] } }
//! ```
//!
//! # Security
//!
//! - Frames larger than [`MAX_FRAME_SIZE`] are rejected before parsing

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::messages::{ConversationId, ToolStatus};

/// Maximum inbound frame size (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Errors decoding inbound frames
#[derive(Debug, Error)]
pub enum FrameError {
    /// The outer frame is not valid JSON or misses required fields
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The embedded node message envelope could not be decoded
    #[error("malformed message envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The frame exceeds [`MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Actual size
        size: usize,
        /// Allowed size
        max: usize,
    },
}

// ============================================================================
// Lenient numbers
// ============================================================================

/// Nodes report performance numbers either as JSON numbers or as strings
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(NumberOrString::as_f64))
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(NumberOrString::as_f64)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.round() as u64))
}

// ============================================================================
// Inbound
// ============================================================================

/// Metadata attached to `Stream` frames
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StreamMetadata {
    /// Token belongs to the reasoning trace
    #[serde(default)]
    pub is_reasoning: bool,
    /// Last token of the turn
    #[serde(default)]
    pub is_done: bool,
    /// Final message id, present on the done frame
    #[serde(default)]
    pub id: Option<String>,
    /// Tokens per second
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tps: Option<f64>,
    /// Generation time in milliseconds
    #[serde(default, deserialize_with = "lenient_u64")]
    pub duration_ms: Option<u64>,
}

/// Tool status wrapper as sent by the node (`{"type_": "Running"}`)
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ToolRequestStatus {
    /// Status value
    pub type_: ToolStatus,
}

/// Tool result payload (`{"data": {"message": ..}}`)
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ToolRequestResult {
    /// Result data
    #[serde(default)]
    pub data: ToolResultData,
}

/// Inner tool result data
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ToolResultData {
    /// Result message (usually a string)
    #[serde(default)]
    pub message: Option<Value>,
}

/// Tool progress reported through a `Widget` frame
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ToolRequest {
    /// Tool display name
    pub tool_name: String,
    /// Arguments (sometimes nested under `arguments`)
    #[serde(default)]
    pub args: Value,
    /// Execution status
    pub status: ToolRequestStatus,
    /// Tool router key
    #[serde(default)]
    pub tool_router_key: Option<String>,
    /// Result, once available
    #[serde(default)]
    pub result: Option<ToolRequestResult>,
    /// Position of this call in the turn's tool list
    pub index: usize,
}

impl ToolRequest {
    /// Call arguments, unwrapping the `arguments` nesting some nodes use
    #[must_use]
    pub fn arguments(&self) -> Value {
        match &self.args {
            Value::Null => Value::Null,
            Value::Object(map) if map.len() == 1 && map.contains_key("arguments") => {
                map.get("arguments").cloned().unwrap_or(Value::Null)
            }
            other => other.clone(),
        }
    }

    /// Result message as text
    #[must_use]
    pub fn result_message(&self) -> Option<String> {
        let message = self.result.as_ref()?.data.message.as_ref()?;
        match message {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Widget payload; exactly one field is normally present
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct WidgetPayload {
    /// Tool progress
    #[serde(rename = "ToolRequest", default)]
    pub tool_request: Option<ToolRequest>,
    /// Payment approval request, passed through untouched
    #[serde(rename = "PaymentRequest", default)]
    pub payment_request: Option<Value>,
}

#[derive(Deserialize)]
struct WireFrame {
    inbox: String,
    message_type: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    metadata: Option<StreamMetadata>,
    #[serde(default)]
    widget: Option<WidgetPayload>,
}

/// A decoded inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// A complete node message; `envelope` is still JSON-encoded
    ShinkaiMessage {
        /// Target conversation
        inbox: ConversationId,
        /// Encoded [`ShinkaiEnvelope`]
        envelope: String,
    },
    /// One token delta
    Stream {
        /// Target conversation
        inbox: ConversationId,
        /// Token text
        text: String,
        /// Delta metadata
        metadata: StreamMetadata,
    },
    /// Tool or payment widget
    Widget {
        /// Target conversation
        inbox: ConversationId,
        /// Widget payload
        widget: WidgetPayload,
    },
    /// Anything this crate does not handle
    Unknown {
        /// Target conversation
        inbox: ConversationId,
        /// Original message type
        message_type: String,
    },
}

impl InboundFrame {
    /// Decode a raw text frame
    ///
    /// # Errors
    ///
    /// Returns `FrameError::TooLarge` for oversized frames and
    /// `FrameError::Malformed` when the JSON is invalid or has no `inbox`.
    pub fn decode(raw: &str) -> Result<Self, FrameError> {
        if raw.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: raw.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let wire: WireFrame = serde_json::from_str(raw).map_err(FrameError::Malformed)?;
        Ok(Self::from_wire(wire))
    }

    /// Decode from an already parsed JSON value
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Malformed` when required fields are missing.
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let wire: WireFrame = serde_json::from_value(value).map_err(FrameError::Malformed)?;
        Ok(Self::from_wire(wire))
    }

    fn from_wire(wire: WireFrame) -> Self {
        let inbox = ConversationId::new(wire.inbox);
        match (wire.message_type.as_str(), wire.message, wire.widget) {
            ("ShinkaiMessage", Some(envelope), _) if !envelope.is_empty() => {
                Self::ShinkaiMessage { inbox, envelope }
            }
            ("Stream", message, _) => Self::Stream {
                inbox,
                text: message.unwrap_or_default(),
                metadata: wire.metadata.unwrap_or_default(),
            },
            ("Widget", _, Some(widget)) => Self::Widget { inbox, widget },
            _ => Self::Unknown {
                inbox,
                message_type: wire.message_type,
            },
        }
    }

    /// Target conversation
    #[must_use]
    pub fn inbox(&self) -> &ConversationId {
        match self {
            Self::ShinkaiMessage { inbox, .. }
            | Self::Stream { inbox, .. }
            | Self::Widget { inbox, .. }
            | Self::Unknown { inbox, .. } => inbox,
        }
    }

    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ShinkaiMessage { .. } => "ShinkaiMessage",
            Self::Stream { .. } => "Stream",
            Self::Widget { .. } => "Widget",
            Self::Unknown { .. } => "Unknown",
        }
    }
}

// ============================================================================
// Node message envelope
// ============================================================================

/// Envelope of a complete node message
#[derive(Clone, Debug, Deserialize)]
pub struct ShinkaiEnvelope {
    /// Routing metadata
    pub external_metadata: ExternalMetadata,
    /// Message body
    pub body: EnvelopeBody,
}

/// Outer routing metadata
#[derive(Clone, Debug, Deserialize)]
pub struct ExternalMetadata {
    /// Sender node identity
    pub sender: String,
    /// Outer signature
    #[serde(default)]
    pub signature: Option<String>,
    /// ISO-8601 timestamp
    #[serde(default)]
    pub scheduled_time: Option<String>,
}

/// Message body (only the unencrypted form is supported)
#[derive(Clone, Debug, Deserialize)]
pub struct EnvelopeBody {
    /// Unencrypted body
    pub unencrypted: UnencryptedBody,
}

/// Unencrypted message body
#[derive(Clone, Debug, Deserialize)]
pub struct UnencryptedBody {
    /// Inner metadata
    pub internal_metadata: InternalMetadata,
    /// Payload
    #[serde(default)]
    pub message_data: Option<MessageData>,
}

/// Inner metadata
#[derive(Clone, Debug, Deserialize)]
pub struct InternalMetadata {
    /// Sender profile
    #[serde(default)]
    pub sender_subidentity: String,
    /// Inner signature (the node message hash)
    #[serde(default)]
    pub signature: Option<String>,
}

/// Message payload wrapper
#[derive(Clone, Debug, Deserialize)]
pub struct MessageData {
    /// Unencrypted payload
    #[serde(default)]
    pub unencrypted: Option<UnencryptedData>,
}

/// Unencrypted payload
#[derive(Clone, Debug, Deserialize)]
pub struct UnencryptedData {
    /// JSON-encoded [`RawContent`]
    #[serde(default)]
    pub message_raw_content: Option<String>,
}

impl ShinkaiEnvelope {
    /// Decode the envelope carried by a `ShinkaiMessage` frame
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Envelope` when the envelope is malformed.
    pub fn decode(envelope: &str) -> Result<Self, FrameError> {
        serde_json::from_str(envelope).map_err(FrameError::Envelope)
    }

    /// Inner signature, falling back to the outer one
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        non_empty(&self.body.unencrypted.internal_metadata.signature)
            .or_else(|| non_empty(&self.external_metadata.signature))
    }

    /// Encoded raw content, if present
    #[must_use]
    pub fn raw_content(&self) -> Option<&str> {
        self.body
            .unencrypted
            .message_data
            .as_ref()?
            .unencrypted
            .as_ref()?
            .message_raw_content
            .as_deref()
    }

    /// Whether the local actor sent this message
    #[must_use]
    pub fn is_from(&self, identity: &str, profile: &str) -> bool {
        self.external_metadata.sender == identity
            && self.body.unencrypted.internal_metadata.sender_subidentity == profile
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Decoded `message_raw_content`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawContent {
    /// Final answer text
    #[serde(default)]
    pub content: Option<String>,
    /// Final reasoning text
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// Performance data and tool calls
    #[serde(default)]
    pub metadata: Option<RawContentMetadata>,
}

impl RawContent {
    /// Decode raw content; an absent payload decodes as empty
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Envelope` when the payload is not valid JSON.
    pub fn decode(raw: Option<&str>) -> Result<Self, FrameError> {
        match raw {
            Some(raw) => serde_json::from_str(raw).map_err(FrameError::Envelope),
            None => Ok(Self::default()),
        }
    }
}

/// Metadata inside raw content
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawContentMetadata {
    /// Tokens per second
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tps: Option<f64>,
    /// Generation time in milliseconds
    #[serde(default, deserialize_with = "lenient_u64")]
    pub duration_ms: Option<u64>,
    /// Tool invocations of the turn
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// One tool invocation as recorded in the final message
#[derive(Clone, Debug, Deserialize)]
pub struct FunctionCall {
    /// Tool name
    pub name: String,
    /// Arguments
    #[serde(default)]
    pub arguments: Value,
    /// Router key
    #[serde(default)]
    pub tool_router_key: String,
    /// JSON-encoded tool response
    #[serde(default)]
    pub response: Option<String>,
}

// ============================================================================
// Outbound
// ============================================================================

/// Subscription topic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// Chat messages and stream deltas
    Inbox,
    /// Tool and payment widgets
    Widget,
}

/// One (topic, conversation) subscription
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Topic
    pub topic: Topic,
    /// Conversation id
    pub subtopic: String,
}

impl Subscription {
    /// Subscription for a conversation
    #[must_use]
    pub fn new(topic: Topic, conversation: &ConversationId) -> Self {
        Self {
            topic,
            subtopic: conversation.as_str().to_string(),
        }
    }
}

/// Subscription change request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Topics to add
    pub subscriptions: Vec<Subscription>,
    /// Topics to drop
    pub unsubscriptions: Vec<Subscription>,
}

/// Outbound control frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    /// API bearer token
    pub bearer_auth: String,
    /// Subscription changes
    pub message: SubscriptionMessage,
}

impl ControlFrame {
    /// Frame that subscribes to `subscriptions`
    #[must_use]
    pub fn subscribe(bearer_auth: &str, subscriptions: Vec<Subscription>) -> Self {
        Self {
            bearer_auth: bearer_auth.to_string(),
            message: SubscriptionMessage {
                subscriptions,
                unsubscriptions: Vec::new(),
            },
        }
    }

    /// Frame that unsubscribes from `unsubscriptions`
    #[must_use]
    pub fn unsubscribe(bearer_auth: &str, unsubscriptions: Vec<Subscription>) -> Self {
        Self {
            bearer_auth: bearer_auth.to_string(),
            message: SubscriptionMessage {
                subscriptions: Vec::new(),
                unsubscriptions,
            },
        }
    }

    /// Encode as a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns the serializer error (not expected for this shape).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
