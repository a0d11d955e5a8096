//! Inbox Stream Core - Chat Streaming Conciliation
//!
//! This crate turns the live WebSocket feed of a chat node into the single
//! message a chat view should render for the assistant's turn. It reconciles
//! three sources of truth that disagree while a turn is in flight:
//!
//! - token deltas (`Stream` frames), fast but partial
//! - tool progress (`Widget` frames), keyed by call index
//! - the final node message (`ShinkaiMessage`), authoritative but late
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     Node WebSocket feed                        │
//! └──────────────────────────────┬─────────────────────────────────┘
//!                                │ FrameSource / FrameSink
//! ┌──────────────────────────────▼─────────────────────────────────┐
//! │                         InboxStream                            │
//! │  ┌────────────┐   ┌─────────────┐   ┌──────────────────────┐   │
//! │  │ Classifier │──▶│ TokenBuffer │──▶│ StreamSessionStore   │   │
//! │  └─────┬──────┘   └─────────────┘   │ (ephemeral, per inbox│   │
//! │        │                            │  + reasoning ledger) │   │
//! │        │          ┌─────────────┐   └──────────┬───────────┘   │
//! │        └─────────▶│ Reconciler  │◀─────────────┘               │
//! │                   └──────┬──────┘        TimerQueue            │
//! └──────────────────────────┼─────────────────────────────────────┘
//!                            ▼
//!                 ConversationCache (durable)  ──▶  read_tail()
//! ```
//!
//! The pipeline is synchronous and owns all of its state. Deferred work
//! (token flushes, ephemeral clears, cache refetches, stall checks) is
//! queued as timer actions and run by [`InboxStream::fire_due`]; the
//! [`driver`] module provides the async loop that waits on frames and
//! deadlines.
//!
//! # Key Types
//!
//! - [`InboxStream`]: The pipeline for one chat view
//! - [`StreamSessionStore`]: Ephemeral per-conversation stream state
//! - [`Reconciler`]: Writes the finished turn into the durable cache
//! - [`ConversationCache`]: The durable message store seam
//! - [`TailView`]: What to render in the assistant slot
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use inbox_stream_core::{
//!     ConversationId, InMemoryConversationCache, InProcessTransport, InboxStream, LocalActor,
//! };
//!
//! let (transport, node) = InProcessTransport::new_pair();
//! let (sink, mut source) = transport.into_parts();
//!
//! let mut stream = InboxStream::builder()
//!     .actor(LocalActor::new("@@localhost.sep-shinkai", "main"))
//!     .cache(Arc::new(InMemoryConversationCache::new()))
//!     .sink(Arc::new(sink))
//!     .build()?;
//!
//! stream.mount(&ConversationId::new("job_inbox::abc::false"));
//! inbox_stream_core::driver::run(&mut stream, &mut source).await?;
//! ```
//!
//! # Module Overview
//!
//! - [`cache`]: Durable conversation cache and widget store seams
//! - [`classifier`]: Frame classification for the mounted conversation
//! - [`config`]: TOML / environment configuration
//! - [`driver`]: Async event loop over a frame source
//! - [`messages`]: Durable message model
//! - [`pipeline`]: The [`InboxStream`] pipeline
//! - [`reader`]: Tail read merging ephemeral and durable state
//! - [`reconciler`]: Durable writes at the end of a turn
//! - [`scheduler`]: Clocks and the timer queue
//! - [`streaming`]: Token buffer, stream sessions and reasoning ledger
//! - [`subscription`]: Topic subscription bookkeeping
//! - [`transport`]: Wire frames and transports (in-process, WebSocket)

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod classifier;
pub mod config;
pub mod driver;
pub mod messages;
pub mod pipeline;
pub mod reader;
pub mod reconciler;
pub mod scheduler;
pub mod streaming;
pub mod subscription;
pub mod transport;

// Pipeline exports
pub use pipeline::{InboxStream, InboxStreamBuilder, PipelineError};

// Classification exports
pub use classifier::{DoneSignal, EventClassifier, FrameClass, LocalActor};

// Message model exports
pub use messages::{
    CompletionReason, ConversationId, FileType, GeneratedFile, Message, MessageId,
    MessageMetadata, MessageRole, MessageStatus, Reasoning, ReasoningStatus, ToolCallPatch,
    ToolCallRecord, ToolStatus,
};

// Cache exports
pub use cache::{
    ConversationCache, ConversationPages, InMemoryConversationCache, InMemoryWidgetStore, Widget,
    WidgetStore,
};

// Streaming exports
pub use streaming::{
    ReasoningDurationLedger, StreamSession, StreamSessionStore, TokenBuffer, TokenKind,
};

// Reconciliation and read exports
pub use reader::{read_tail, TailSource, TailView};
pub use reconciler::{FinalizeRequest, ReconcileOutcome, Reconciler, WriteOutcome};

// Scheduling exports
pub use scheduler::{Clock, ManualClock, SystemClock, TimerAction, TimerQueue};

// Subscription exports
pub use subscription::SubscriptionManager;

// Transport exports
pub use transport::{
    node_ws_url, ControlFrame, FrameSink, FrameSource, InProcessNode, InProcessSink,
    InProcessSource, InProcessTransport, InboundFrame, TransportError,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, StreamConfig,
};

// Driver exports
pub use driver::DriverStats;
