//! In-Process Transport
//!
//! Channel-based stand-in for the node's WebSocket, used by tests, the replay
//! tool, and embedders that already receive frames some other way.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, node) = InProcessTransport::new_pair();
//! let (sink, source) = transport.into_parts();
//!
//! // Hand `sink` to the pipeline and `source` to the driver
//! node.push_frame(r#"{"inbox":"c1","message_type":"Stream","message":"Hi"}"#)?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::frame::ControlFrame;
use super::traits::{FrameSink, FrameSource, TransportError};

/// Client side of an in-process connection
pub struct InProcessTransport {
    sink: InProcessSink,
    source: InProcessSource,
}

/// Outbound half: control frames towards the node side
#[derive(Clone)]
pub struct InProcessSink {
    control_tx: mpsc::UnboundedSender<ControlFrame>,
    connected: Arc<AtomicBool>,
}

/// Inbound half: raw frames from the node side
pub struct InProcessSource {
    frame_rx: mpsc::UnboundedReceiver<String>,
}

/// Node side of an in-process connection
pub struct InProcessNode {
    frame_tx: mpsc::UnboundedSender<String>,
    control_rx: mpsc::UnboundedReceiver<ControlFrame>,
    connected: Arc<AtomicBool>,
}

impl InProcessTransport {
    /// Create a connected client/node pair
    #[must_use]
    pub fn new_pair() -> (Self, InProcessNode) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let transport = Self {
            sink: InProcessSink {
                control_tx,
                connected: Arc::clone(&connected),
            },
            source: InProcessSource { frame_rx },
        };
        let node = InProcessNode {
            frame_tx,
            control_rx,
            connected,
        };

        (transport, node)
    }

    /// Split into the sink (for the pipeline) and source (for the driver)
    #[must_use]
    pub fn into_parts(self) -> (InProcessSink, InProcessSource) {
        (self.sink, self.source)
    }
}

impl FrameSink for InProcessSink {
    fn send(&self, frame: ControlFrame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.control_tx
            .send(frame)
            .map_err(|_| TransportError::SendFailed("channel closed".to_string()))
    }
}

#[async_trait]
impl FrameSource for InProcessSource {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.frame_rx.recv().await)
    }
}

impl InProcessNode {
    /// Deliver a raw frame to the client
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionClosed` if the client side is gone.
    pub fn push_frame(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.frame_tx
            .send(frame.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Take the next control frame the client sent, if any
    pub fn try_recv_control(&mut self) -> Option<ControlFrame> {
        self.control_rx.try_recv().ok()
    }

    /// Wait for the next control frame
    pub async fn recv_control(&mut self) -> Option<ControlFrame> {
        self.control_rx.recv().await
    }

    /// Drain every control frame sent so far
    pub fn drain_control(&mut self) -> Vec<ControlFrame> {
        std::iter::from_fn(|| self.try_recv_control()).collect()
    }

    /// Simulate the node dropping the connection
    ///
    /// Further control frames fail and the client's source ends once the
    /// node handle is dropped.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
