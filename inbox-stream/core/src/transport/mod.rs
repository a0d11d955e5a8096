//! Transport Layer
//!
//! Everything between the pipeline and the node's WebSocket:
//! - `frame`: inbound frame decoding and outbound control frames
//! - `traits`: the `FrameSink` / `FrameSource` seams
//! - `in_process`: channel transport for tests, replays and embedding
//! - `endpoint`: WebSocket URL derivation from the node address
//! - `websocket`: live client (feature `websocket`)
//!
//! # Design Philosophy
//!
//! The pipeline is synchronous and never awaits. Outbound frames are queued
//! through a `FrameSink`; inbound frames are pulled by the async driver from
//! a `FrameSource` and handed to the pipeline one at a time.

pub mod endpoint;
pub mod frame;
pub mod in_process;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;

// Re-exports for convenience
pub use endpoint::node_ws_url;
pub use frame::{
    ControlFrame, FrameError, InboundFrame, ShinkaiEnvelope, StreamMetadata, Subscription,
    Topic, ToolRequest, WidgetPayload,
};
pub use in_process::{InProcessNode, InProcessSink, InProcessSource, InProcessTransport};
pub use traits::{FrameSink, FrameSource, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketSink, WebSocketSource, WebSocketTransport};
