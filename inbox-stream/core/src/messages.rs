//! Conversation Messages
//!
//! Identifier newtypes and the durable message model shared with the
//! external conversation cache. The cache owns these values; the streaming
//! core only reads them and writes finalised turns back.
//!
//! # Optimistic Placeholder
//!
//! When the user sends a message, the UI appends an assistant message with
//! the reserved id [`OPTIMISTIC_ASSISTANT_MESSAGE_ID`] and a `running`
//! status to the last page. At most one such message exists per
//! conversation and it is always the very last message while running. The
//! reconciler replaces it with the authoritative message exactly once.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved id of the placeholder assistant message inserted on send
pub const OPTIMISTIC_ASSISTANT_MESSAGE_ID: &str = "OPTIMISTIC_ASSISTANT_MESSAGE_ID";

/// Conversation (inbox) identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Create a conversation id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Durable message identifier (node message hash)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a message id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved placeholder id
    #[must_use]
    pub fn optimistic() -> Self {
        Self(OPTIMISTIC_ASSISTANT_MESSAGE_ID.to_string())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the reserved placeholder id
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.0 == OPTIMISTIC_ASSISTANT_MESSAGE_ID
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The local user
    User,
    /// The AI assistant
    Assistant,
}

/// Why a message reached the `complete` state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionReason {
    /// Normal completion (the node does not report a reason)
    #[default]
    Unknown,
    /// The turn stalled and was force-finalised client side
    Timeout,
}

/// Durable message status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageStatus {
    /// The assistant is still producing this message
    Running,
    /// The message is final
    Complete {
        /// Completion reason
        reason: CompletionReason,
    },
}

impl MessageStatus {
    /// Completed with an unknown reason
    #[must_use]
    pub fn complete() -> Self {
        Self::Complete {
            reason: CompletionReason::Unknown,
        }
    }

    /// Whether the message is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Reasoning trace status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningStatus {
    /// Reasoning tokens are still arriving
    Running,
    /// Reasoning has ended
    Complete,
}

/// Reasoning trace attached to an assistant message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reasoning {
    /// Accumulated reasoning text
    pub text: String,
    /// Current status
    pub status: ReasoningStatus,
}

impl Reasoning {
    /// A completed reasoning trace
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: ReasoningStatus::Complete,
        }
    }
}

/// Tool call status as reported by the node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolStatus {
    /// Queued but not started
    #[default]
    Pending,
    /// Executing
    Running,
    /// Finished successfully
    Complete,
    /// Finished without a full result
    Incomplete,
    /// Waiting on the user (e.g. payment approval)
    RequiresAction,
}

/// Kind of a file produced by a tool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Unknown until the cache refetches full previews
    #[default]
    Unknown,
}

/// A file a tool created while running
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    /// Stable id (the path)
    pub id: String,
    /// Full node path
    pub path: String,
    /// Last path segment
    pub name: String,
    /// Extension (last `.` segment of the name)
    pub extension: String,
    /// File kind
    #[serde(rename = "type")]
    pub file_type: FileType,
    /// MIME type
    pub mime_type: String,
}

impl GeneratedFile {
    /// Describe a created file from its node path
    pub fn from_path(path: &str) -> Self {
        let name = match path.rsplit('/').next() {
            Some(segment) if !segment.is_empty() => segment.to_string(),
            _ => "unknown_file".to_string(),
        };
        let extension = name.rsplit('.').next().unwrap_or_default().to_string();
        Self {
            id: path.to_string(),
            path: path.to_string(),
            name,
            extension,
            file_type: FileType::Unknown,
            mime_type: "application/octet-stream".to_string(),
        }
    }
}

/// One tool invocation inside an assistant turn
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// Tool display name
    pub name: String,
    /// Router key identifying the tool implementation
    pub tool_router_key: String,
    /// Call arguments
    pub args: serde_json::Value,
    /// Execution status
    pub status: ToolStatus,
    /// Raw result payload
    pub result: Option<String>,
    /// Files the tool created, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_files: Option<Vec<GeneratedFile>>,
}

impl ToolCallRecord {
    /// Whether this call produced at least one file
    #[must_use]
    pub fn has_generated_files(&self) -> bool {
        self.generated_files
            .as_ref()
            .is_some_and(|files| !files.is_empty())
    }

    /// Shallow-merge the present fields of `patch` into this record
    pub fn apply(&mut self, patch: ToolCallPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(key) = patch.tool_router_key {
            self.tool_router_key = key;
        }
        if let Some(args) = patch.args {
            self.args = args;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(files) = patch.generated_files {
            self.generated_files = Some(files);
        }
    }
}

/// Partial tool call update; absent fields leave the record untouched
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallPatch {
    /// New name
    pub name: Option<String>,
    /// New router key
    pub tool_router_key: Option<String>,
    /// New arguments
    pub args: Option<serde_json::Value>,
    /// New status
    pub status: Option<ToolStatus>,
    /// New result
    pub result: Option<String>,
    /// New generated file list
    pub generated_files: Option<Vec<GeneratedFile>>,
}

impl ToolCallPatch {
    /// Patch that only sets the status
    #[must_use]
    pub fn status(status: ToolStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Set the name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the result
    #[must_use]
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Build a fresh record from this patch (used when appending)
    #[must_use]
    pub fn into_record(self) -> ToolCallRecord {
        let mut record = ToolCallRecord::default();
        record.apply(self);
        record
    }
}

impl From<ToolCallRecord> for ToolCallPatch {
    fn from(record: ToolCallRecord) -> Self {
        Self {
            name: Some(record.name),
            tool_router_key: Some(record.tool_router_key),
            args: Some(record.args),
            status: Some(record.status),
            result: record.result,
            generated_files: record.generated_files,
        }
    }
}

/// Performance metadata reported for a finished turn
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Tokens per second
    pub tps: Option<f64>,
    /// Generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// A message in the durable conversation cache
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id (optimistic placeholder or node hash)
    pub message_id: MessageId,
    /// Who sent it
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Running or complete
    pub status: MessageStatus,
    /// Reasoning trace, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    /// Tool invocations
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Performance metadata
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// A completed user message
    pub fn user(id: impl Into<String>, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            message_id: MessageId::new(id),
            role: MessageRole::User,
            content: content.into(),
            status: MessageStatus::complete(),
            reasoning: None,
            tool_calls: Vec::new(),
            created_at,
            metadata: MessageMetadata::default(),
        }
    }

    /// The running placeholder inserted on send
    #[must_use]
    pub fn optimistic_assistant(created_at: DateTime<Utc>) -> Self {
        Self {
            message_id: MessageId::optimistic(),
            role: MessageRole::Assistant,
            content: String::new(),
            status: MessageStatus::Running,
            reasoning: None,
            tool_calls: Vec::new(),
            created_at,
            metadata: MessageMetadata::default(),
        }
    }

    /// Whether this is the running optimistic assistant placeholder
    #[must_use]
    pub fn is_running_placeholder(&self) -> bool {
        self.message_id.is_optimistic()
            && self.role == MessageRole::Assistant
            && self.status.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generated_file_from_path() {
        let file = GeneratedFile::from_path("/home/node/out/report.final.pdf");
        assert_eq!(file.id, "/home/node/out/report.final.pdf");
        assert_eq!(file.name, "report.final.pdf");
        assert_eq!(file.extension, "pdf");
        assert_eq!(file.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_generated_file_without_extension_or_name() {
        let file = GeneratedFile::from_path("/tmp/Makefile");
        assert_eq!(file.extension, "Makefile");

        let file = GeneratedFile::from_path("/tmp/dir/");
        assert_eq!(file.name, "unknown_file");
    }

    #[test]
    fn test_tool_call_patch_shallow_merge() {
        let mut record = ToolCallPatch::status(ToolStatus::Running)
            .with_name("search")
            .into_record();
        record.apply(ToolCallPatch::status(ToolStatus::Complete).with_result("42"));

        assert_eq!(record.name, "search");
        assert_eq!(record.status, ToolStatus::Complete);
        assert_eq!(record.result.as_deref(), Some("42"));
    }

    #[test]
    fn test_placeholder_detection() {
        let now = Utc::now();
        let placeholder = Message::optimistic_assistant(now);
        assert!(placeholder.is_running_placeholder());

        let mut done = placeholder.clone();
        done.status = MessageStatus::complete();
        assert!(!done.is_running_placeholder());

        assert!(!Message::user("u1", "hi", now).is_running_placeholder());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(MessageStatus::complete()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "complete", "reason": "unknown"}));

        let json = serde_json::to_value(MessageStatus::Running).unwrap();
        assert_eq!(json, serde_json::json!({"type": "running"}));
    }
}
