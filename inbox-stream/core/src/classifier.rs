//! Event Classifier
//!
//! Turns a decoded [`InboundFrame`] into a [`FrameClass`] the pipeline can
//! act on, and drops frames addressed to any conversation other than the one
//! currently mounted.
//!
//! # Classification
//!
//! | Frame | Condition | Class |
//! |-------|-----------|-------|
//! | `ShinkaiMessage` | sender is the local identity + profile | `UserEcho` |
//! | `ShinkaiMessage` | anyone else | `AssistantFinal` |
//! | `Stream` | | `StreamDelta` (content or reasoning, maybe done) |
//! | `Widget` | `ToolRequest` | `ToolWidget` |
//! | `Widget` | `PaymentRequest` | `PaymentWidget` |
//! | anything else | | `Unknown` |

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::Widget;
use crate::messages::{
    CompletionReason, ConversationId, GeneratedFile, MessageId, MessageMetadata, ToolCallPatch,
    ToolCallRecord, ToolStatus,
};
use crate::reconciler::FinalizeRequest;
use crate::streaming::TokenKind;
use crate::transport::frame::{
    FrameError, FunctionCall, InboundFrame, RawContent, ShinkaiEnvelope, ToolRequest,
};

/// The local user, used to recognise echoes of our own messages
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalActor {
    /// Node identity (e.g. `@@localhost.sep-shinkai`)
    pub identity: String,
    /// Profile / subidentity (e.g. `main`)
    pub profile: String,
}

impl LocalActor {
    /// Create a local actor
    pub fn new(identity: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            profile: profile.into(),
        }
    }
}

/// End-of-stream signal carried by the last `Stream` frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DoneSignal {
    /// Final message id
    pub message_id: Option<MessageId>,
    /// Performance metadata
    pub metadata: MessageMetadata,
}

impl From<DoneSignal> for FinalizeRequest {
    fn from(done: DoneSignal) -> Self {
        Self {
            message_id: done.message_id,
            metadata: done.metadata,
            ..Self::default()
        }
    }
}

/// What a frame means for the mounted conversation
#[derive(Clone, Debug, PartialEq)]
pub enum FrameClass {
    /// Our own message came back: a new turn begins
    UserEcho,
    /// The authoritative final assistant message
    AssistantFinal(FinalizeRequest),
    /// A token delta
    StreamDelta {
        /// Content or reasoning
        kind: TokenKind,
        /// Token text
        text: String,
        /// Present on the last delta of the turn
        done: Option<DoneSignal>,
    },
    /// Tool progress for the call at `index`
    ToolWidget {
        /// Tool call position
        index: usize,
        /// Fields reported by the node
        patch: ToolCallPatch,
    },
    /// A payment approval widget
    PaymentWidget(Widget),
    /// Nothing to do
    Unknown {
        /// Original message type
        message_type: String,
    },
}

/// Classifies frames for the currently mounted conversation
#[derive(Clone, Debug)]
pub struct EventClassifier {
    current: Option<ConversationId>,
    actor: LocalActor,
}

impl EventClassifier {
    /// Create a classifier with no mounted conversation
    #[must_use]
    pub fn new(actor: LocalActor) -> Self {
        Self {
            current: None,
            actor,
        }
    }

    /// The mounted conversation
    #[must_use]
    pub fn current(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    /// Change (or clear) the mounted conversation
    pub fn set_current(&mut self, conversation: Option<ConversationId>) {
        self.current = conversation;
    }

    /// Classify a frame
    ///
    /// Returns `Ok(None)` when the frame belongs to another conversation.
    /// `now` is the fallback timestamp for final messages without one.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Envelope` when a `ShinkaiMessage` envelope cannot
    /// be decoded.
    pub fn classify(
        &self,
        frame: &InboundFrame,
        now: DateTime<Utc>,
    ) -> Result<Option<FrameClass>, FrameError> {
        if self.current.as_ref() != Some(frame.inbox()) {
            tracing::trace!(
                inbox = %frame.inbox(),
                kind = frame.kind(),
                "Discarding frame for another conversation"
            );
            return Ok(None);
        }

        let class = match frame {
            InboundFrame::ShinkaiMessage { envelope, .. } => {
                let envelope = ShinkaiEnvelope::decode(envelope)?;
                if envelope.is_from(&self.actor.identity, &self.actor.profile) {
                    FrameClass::UserEcho
                } else {
                    FrameClass::AssistantFinal(extract_final(&envelope, now))
                }
            }
            InboundFrame::Stream { text, metadata, .. } => FrameClass::StreamDelta {
                kind: if metadata.is_reasoning {
                    TokenKind::Reasoning
                } else {
                    TokenKind::Content
                },
                text: text.clone(),
                done: metadata.is_done.then(|| DoneSignal {
                    message_id: metadata
                        .id
                        .as_deref()
                        .filter(|id| !id.is_empty())
                        .map(MessageId::new),
                    metadata: MessageMetadata {
                        tps: metadata.tps,
                        duration_ms: metadata.duration_ms,
                    },
                }),
            },
            InboundFrame::Widget { widget, .. } => {
                if let Some(tool) = &widget.tool_request {
                    FrameClass::ToolWidget {
                        index: tool.index,
                        patch: tool_patch(tool),
                    }
                } else if let Some(data) = &widget.payment_request {
                    FrameClass::PaymentWidget(Widget {
                        name: "PaymentRequest".to_string(),
                        data: data.clone(),
                    })
                } else {
                    FrameClass::Unknown {
                        message_type: "Widget".to_string(),
                    }
                }
            }
            InboundFrame::Unknown { message_type, .. } => FrameClass::Unknown {
                message_type: message_type.clone(),
            },
        };

        Ok(Some(class))
    }
}

fn tool_patch(tool: &ToolRequest) -> ToolCallPatch {
    ToolCallPatch {
        name: Some(tool.tool_name.clone()),
        tool_router_key: Some(tool.tool_router_key.clone().unwrap_or_default()),
        args: Some(tool.arguments()),
        status: Some(tool.status.type_),
        result: tool.result_message(),
        generated_files: None,
    }
}

/// Pull the authoritative turn out of a final assistant message
///
/// An unreadable `message_raw_content` still finalises the turn, keeping
/// only the message id and timestamp.
fn extract_final(envelope: &ShinkaiEnvelope, now: DateTime<Utc>) -> FinalizeRequest {
    let message_id = envelope.message_id().map(MessageId::new);
    let created_at = envelope
        .external_metadata
        .scheduled_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map_or(now, |t| t.with_timezone(&Utc));

    let raw = match RawContent::decode(envelope.raw_content()) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable final message content, finalising with stream data");
            return FinalizeRequest {
                message_id,
                created_at: Some(created_at),
                ..FinalizeRequest::default()
            };
        }
    };

    let metadata = raw.metadata.unwrap_or_default();
    let tool_calls: Vec<ToolCallRecord> = metadata
        .function_calls
        .iter()
        .map(tool_call_from_function)
        .collect();

    FinalizeRequest {
        message_id,
        created_at: Some(created_at),
        content: raw.content.filter(|c| !c.is_empty()),
        reasoning: raw.reasoning_content.filter(|r| !r.is_empty()),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        metadata: MessageMetadata {
            tps: metadata.tps,
            duration_ms: metadata.duration_ms,
        },
        reason: CompletionReason::Unknown,
    }
}

fn tool_call_from_function(call: &FunctionCall) -> ToolCallRecord {
    ToolCallRecord {
        name: call.name.clone(),
        tool_router_key: call.tool_router_key.clone(),
        args: call.arguments.clone(),
        status: ToolStatus::Complete,
        result: Some(call.response.clone().unwrap_or_default()),
        generated_files: call.response.as_deref().and_then(created_files),
    }
}

/// Files listed under `data.__created_files__` (or top-level
/// `__created_files__`) of a tool's JSON response
fn created_files(response: &str) -> Option<Vec<GeneratedFile>> {
    let value: Value = serde_json::from_str(response).ok()?;
    let listed = value
        .get("data")
        .and_then(|data| data.get("__created_files__"))
        .filter(|files| !files.is_null())
        .or_else(|| value.get("__created_files__"))?
        .as_array()?;

    let files: Vec<GeneratedFile> = listed
        .iter()
        .filter_map(Value::as_str)
        .map(GeneratedFile::from_path)
        .collect();
    (!files.is_empty()).then_some(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn classifier() -> EventClassifier {
        let mut classifier = EventClassifier::new(LocalActor::new("@@me", "main"));
        classifier.set_current(Some(ConversationId::new("c1")));
        classifier
    }

    fn shinkai_frame(inbox: &str, sender: &str, profile: &str, raw_content: Option<Value>) -> InboundFrame {
        let mut unencrypted = json!({
            "internal_metadata": {"sender_subidentity": profile, "signature": "hash-1"}
        });
        if let Some(raw) = raw_content {
            unencrypted["message_data"] =
                json!({"unencrypted": {"message_raw_content": raw.to_string()}});
        }
        let envelope = json!({
            "external_metadata": {
                "sender": sender,
                "signature": "outer",
                "scheduled_time": "2024-05-01T12:00:00.000Z"
            },
            "body": {"unencrypted": unencrypted}
        });
        InboundFrame::ShinkaiMessage {
            inbox: ConversationId::new(inbox),
            envelope: envelope.to_string(),
        }
    }

    #[test]
    fn test_other_conversation_is_discarded() {
        let frame = InboundFrame::Stream {
            inbox: ConversationId::new("c2"),
            text: "x".to_string(),
            metadata: Default::default(),
        };
        assert_eq!(classifier().classify(&frame, Utc::now()).unwrap(), None);

        let unmounted = EventClassifier::new(LocalActor::new("@@me", "main"));
        let frame = InboundFrame::Stream {
            inbox: ConversationId::new("c1"),
            text: "x".to_string(),
            metadata: Default::default(),
        };
        assert_eq!(unmounted.classify(&frame, Utc::now()).unwrap(), None);
    }

    #[test]
    fn test_user_echo() {
        let frame = shinkai_frame("c1", "@@me", "main", None);
        assert_eq!(
            classifier().classify(&frame, Utc::now()).unwrap(),
            Some(FrameClass::UserEcho)
        );

        // Same node, other profile: that is the assistant
        let frame = shinkai_frame("c1", "@@me", "agent", Some(json!({"content": "hi"})));
        assert!(matches!(
            classifier().classify(&frame, Utc::now()).unwrap(),
            Some(FrameClass::AssistantFinal(_))
        ));
    }

    #[test]
    fn test_assistant_final_extraction() {
        let frame = shinkai_frame(
            "c1",
            "@@node",
            "agent",
            Some(json!({
                "content": "The answer",
                "reasoning_content": "Let me think",
                "metadata": {
                    "tps": "33.5",
                    "duration_ms": 1200,
                    "function_calls": [{
                        "name": "write_file",
                        "arguments": {"path": "a.txt"},
                        "tool_router_key": "local:::write_file",
                        "response": "{\"data\":{\"__created_files__\":[\"/out/a.txt\"]}}"
                    }]
                }
            })),
        );

        let Some(FrameClass::AssistantFinal(request)) =
            classifier().classify(&frame, Utc::now()).unwrap()
        else {
            panic!("expected assistant final");
        };

        assert_eq!(request.message_id, Some(MessageId::new("hash-1")));
        assert_eq!(
            request.created_at.unwrap().to_rfc3339(),
            "2024-05-01T12:00:00+00:00"
        );
        assert_eq!(request.content.as_deref(), Some("The answer"));
        assert_eq!(request.reasoning.as_deref(), Some("Let me think"));
        assert_eq!(request.metadata.tps, Some(33.5));
        assert_eq!(request.metadata.duration_ms, Some(1200));

        let calls = request.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, ToolStatus::Complete);
        assert_eq!(calls[0].tool_router_key, "local:::write_file");
        let files = calls[0].generated_files.as_ref().unwrap();
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].extension, "txt");
    }

    #[test]
    fn test_unreadable_raw_content_still_finalises() {
        let mut frame = shinkai_frame("c1", "@@node", "agent", None);
        if let InboundFrame::ShinkaiMessage { envelope, .. } = &mut frame {
            let mut value: Value = serde_json::from_str(envelope).unwrap();
            value["body"]["unencrypted"]["message_data"] =
                json!({"unencrypted": {"message_raw_content": "{not json"}});
            *envelope = value.to_string();
        }

        let Some(FrameClass::AssistantFinal(request)) =
            classifier().classify(&frame, Utc::now()).unwrap()
        else {
            panic!("expected assistant final");
        };
        assert_eq!(request.message_id, Some(MessageId::new("hash-1")));
        assert!(request.content.is_none());
        assert!(request.tool_calls.is_none());
    }

    #[test]
    fn test_malformed_envelope_is_an_error() {
        let frame = InboundFrame::ShinkaiMessage {
            inbox: ConversationId::new("c1"),
            envelope: "{\"external_metadata\":{}}".to_string(),
        };
        assert!(matches!(
            classifier().classify(&frame, Utc::now()),
            Err(FrameError::Envelope(_))
        ));
    }

    #[test]
    fn test_stream_delta_with_done() {
        let frame = InboundFrame::decode(
            &json!({
                "inbox": "c1",
                "message_type": "Stream",
                "message": "!",
                "metadata": {"is_done": true, "id": "final-1", "tps": 20}
            })
            .to_string(),
        )
        .unwrap();

        let class = classifier().classify(&frame, Utc::now()).unwrap();
        assert_eq!(
            class,
            Some(FrameClass::StreamDelta {
                kind: TokenKind::Content,
                text: "!".to_string(),
                done: Some(DoneSignal {
                    message_id: Some(MessageId::new("final-1")),
                    metadata: MessageMetadata {
                        tps: Some(20.0),
                        duration_ms: None,
                    },
                }),
            })
        );
    }

    #[test]
    fn test_widgets() {
        let tool = InboundFrame::decode(
            &json!({
                "inbox": "c1",
                "message_type": "Widget",
                "widget": {"ToolRequest": {
                    "tool_name": "search",
                    "args": {"q": "rust"},
                    "status": {"type_": "Running"},
                    "index": 0
                }}
            })
            .to_string(),
        )
        .unwrap();
        let Some(FrameClass::ToolWidget { index, patch }) =
            classifier().classify(&tool, Utc::now()).unwrap()
        else {
            panic!("expected tool widget");
        };
        assert_eq!(index, 0);
        assert_eq!(patch.name.as_deref(), Some("search"));
        assert_eq!(patch.status, Some(ToolStatus::Running));
        assert_eq!(patch.tool_router_key.as_deref(), Some(""));

        let payment = InboundFrame::decode(
            &json!({
                "inbox": "c1",
                "message_type": "Widget",
                "widget": {"PaymentRequest": {"price": 5}}
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(
            classifier().classify(&payment, Utc::now()).unwrap(),
            Some(FrameClass::PaymentWidget(Widget {
                name: "PaymentRequest".to_string(),
                data: json!({"price": 5}),
            }))
        );
    }

    #[test]
    fn test_created_files_locations() {
        assert_eq!(
            created_files(r#"{"__created_files__":["/x/y.png"]}"#).unwrap()[0].path,
            "/x/y.png"
        );
        assert!(created_files(r#"{"data":{"__created_files__":[]}}"#).is_none());
        assert!(created_files("plain text").is_none());
    }
}
