//! WebSocket Transport
//!
//! Client connection to a live node's `/ws` endpoint. Only compiled with the
//! `websocket` feature.
//!
//! The socket is split: a writer task drains queued [`ControlFrame`]s so the
//! synchronous [`FrameSink`] never blocks the pipeline, and the read half is
//! exposed as a [`FrameSource`] for the driver.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::endpoint::node_ws_url;
use super::frame::ControlFrame;
use super::traits::{FrameSink, FrameSource, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connected WebSocket client
pub struct WebSocketTransport {
    sink: WebSocketSink,
    source: WebSocketSource,
}

/// Outbound half; frames are queued for the writer task
#[derive(Clone)]
pub struct WebSocketSink {
    control_tx: mpsc::UnboundedSender<ControlFrame>,
}

/// Inbound half
pub struct WebSocketSource {
    reader: SplitStream<WsStream>,
    writer_task: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Connect to the node serving the HTTP API at `node_address`
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, the connection times out,
    /// or the handshake fails.
    pub async fn connect_to_node(node_address: &str) -> Result<Self, TransportError> {
        let url = node_ws_url(node_address)?;
        Self::connect(&url, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a WebSocket URL
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` on timeout or handshake
    /// failure.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let (stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!(
                    "connection timeout after {connect_timeout:?}"
                ))
            })?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = %url, "Connected to node WebSocket");

        let (mut writer, reader) = stream.split();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<ControlFrame>();

        let writer_url = url.to_string();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = control_rx.recv().await {
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode control frame");
                        continue;
                    }
                };
                if let Err(e) = writer.send(Message::Text(text.into())).await {
                    tracing::warn!(url = %writer_url, error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = writer.send(Message::Close(None)).await;
        });

        Ok(Self {
            sink: WebSocketSink { control_tx },
            source: WebSocketSource {
                reader,
                writer_task,
            },
        })
    }

    /// Split into the sink (for the pipeline) and source (for the driver)
    #[must_use]
    pub fn into_parts(self) -> (WebSocketSink, WebSocketSource) {
        (self.sink, self.source)
    }
}

impl FrameSink for WebSocketSink {
    fn send(&self, frame: ControlFrame) -> Result<(), TransportError> {
        self.control_tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(message) = self.reader.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(text.to_string())),
                Ok(Message::Close(_)) => return Ok(None),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
        Ok(None)
    }
}

impl Drop for WebSocketSource {
    fn drop(&mut self) {
        self.writer_task.abort();
    }
}
