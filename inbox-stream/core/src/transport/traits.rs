//! Transport Traits
//!
//! The pipeline talks to the node through two narrow seams:
//! - `FrameSink`: outbound subscription control frames (synchronous, fire
//!   and forget, so the pipeline never awaits)
//! - `FrameSource`: inbound raw text frames, polled by the driver

use async_trait::async_trait;
use thiserror::Error;

use super::frame::ControlFrame;

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to the node failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection was closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to send a frame
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a frame
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The node address could not be turned into a WebSocket URL
    #[error("invalid node address `{address}`: {reason}")]
    InvalidAddress {
        /// Offending address
        address: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Outbound side: subscription control frames
pub trait FrameSink: Send + Sync {
    /// Queue a control frame for delivery
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone or the frame cannot be
    /// encoded.
    fn send(&self, frame: ControlFrame) -> Result<(), TransportError>;
}

/// Inbound side: raw text frames from the node
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next text frame
    ///
    /// Returns `Ok(None)` once the connection has closed cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying connection fails.
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError>;
}
