//! Inbox Stream Replay - Recorded Frame Log Player
//!
//! Feeds a recorded node WebSocket log through the streaming pipeline with a
//! manual clock and prints the transcript the UI would end up showing.
//!
//! # Usage
//!
//! ```bash
//! # Replay a capture
//! inbox-stream-replay --frames capture.jsonl --inbox "job_inbox::abc::false" \
//!     --identity @@localhost.sep-shinkai --profile main
//!
//! # Slower flush cadence, custom config
//! inbox-stream-replay --frames capture.jsonl --inbox c1 --identity @@me \
//!     --profile main --flush-interval-ms 200 --config ./stream.toml
//!
//! # Verbose logging (goes to stderr)
//! RUST_LOG=debug inbox-stream-replay ...
//! ```
//!
//! # Frame Log Format
//!
//! One JSON value per line. Either a bare frame as received from the node,
//! or `{"at_ms": 120, "frame": {...}}` to place the frame on the timeline
//! (milliseconds since the start of the replay). Blank lines and lines
//! starting with `#` are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use inbox_stream_core::transport::frame::RawContent;
use inbox_stream_core::transport::ShinkaiEnvelope;
use inbox_stream_core::{
    default_config_path, load_config_from_path, Clock, ConfigOverrides, ConversationCache,
    ConversationId, InMemoryConversationCache, InMemoryWidgetStore, InProcessTransport,
    InboundFrame, InboxStream, LocalActor, ManualClock, Message, TailView, Widget,
};

/// Inbox Stream Replay - run a recorded frame log through the pipeline
#[derive(Parser, Debug)]
#[command(name = "inbox-stream-replay")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSONL frame log
    #[arg(short = 'f', long, value_name = "FILE")]
    frames: PathBuf,

    /// Conversation (inbox) to mount
    #[arg(short = 'i', long, value_name = "ID")]
    inbox: String,

    /// Local node identity, used to recognise user echoes
    #[arg(long, env = "INBOX_STREAM_IDENTITY")]
    identity: String,

    /// Local profile (sender subidentity)
    #[arg(long, env = "INBOX_STREAM_PROFILE", default_value = "main")]
    profile: String,

    /// Configuration file path
    #[arg(short = 'c', long, env = "INBOX_STREAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Token flush cadence override
    #[arg(long, value_name = "MS")]
    flush_interval_ms: Option<u64>,

    /// Stall timeout override (0 disables)
    #[arg(long, value_name = "SECS")]
    stall_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "INBOX_STREAM_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// One line of the frame log
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogLine {
    Timed { at_ms: Option<u64>, frame: Value },
    Bare(Value),
}

impl LogLine {
    fn into_parts(self) -> (Option<u64>, Value) {
        match self {
            Self::Timed { at_ms, frame } => (at_ms, frame),
            Self::Bare(frame) => (None, frame),
        }
    }
}

/// What the replay printed
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Transcript {
    inbox: String,
    frames: usize,
    rejected: usize,
    timers_fired: usize,
    /// Tail right after the last frame, before pending timers ran
    tail_at_end_of_log: Option<TailView>,
    /// Tail once every deferred action has run
    tail: Option<TailView>,
    messages: Vec<Message>,
    widget: Option<Widget>,
    invalidations: usize,
    control_frames: usize,
}

/// Initialize logging with the specified level; logs go to stderr so the
/// transcript on stdout stays parseable
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "inbox_stream_replay={level},inbox_stream_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// The local user's own message in `inbox`, as `(id, text)`
fn user_echo(
    frame: &InboundFrame,
    inbox: &ConversationId,
    actor: &LocalActor,
) -> Option<(String, String)> {
    let InboundFrame::ShinkaiMessage { inbox: target, envelope } = frame else {
        return None;
    };
    if target != inbox {
        return None;
    }
    let envelope = ShinkaiEnvelope::decode(envelope).ok()?;
    if !envelope.is_from(&actor.identity, &actor.profile) {
        return None;
    }
    let text = RawContent::decode(envelope.raw_content())
        .ok()
        .and_then(|raw| raw.content)
        .unwrap_or_default();
    let id = envelope.message_id().unwrap_or("user").to_string();
    Some((id, text))
}

async fn read_log(path: &Path) -> Result<Vec<(Option<u64>, Value)>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read frame log: {}", path.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            let entry: LogLine = serde_json::from_str(line)
                .with_context(|| format!("Invalid JSON on line {}", n + 1))?;
            Ok(entry.into_parts())
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    let mut overrides = ConfigOverrides::new();
    if let Some(ms) = args.flush_interval_ms {
        overrides = overrides.with_flush_interval_ms(ms);
    }
    if let Some(secs) = args.stall_timeout_secs {
        overrides = overrides.with_stall_timeout_secs(secs);
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    info!(source = %config.source(), "Configuration loaded");

    let log = read_log(&args.frames).await?;

    let clock = ManualClock::new();
    let cache = Arc::new(InMemoryConversationCache::new());
    let widgets = Arc::new(InMemoryWidgetStore::new());
    let (transport, mut node) = InProcessTransport::new_pair();
    let (sink, _source) = transport.into_parts();
    let cache_seam: Arc<dyn ConversationCache> = cache.clone();

    let actor = LocalActor::new(&args.identity, &args.profile);
    let mut stream = InboxStream::builder()
        .config(config)
        .actor(actor.clone())
        .cache(cache_seam)
        .widgets(widgets.clone())
        .sink(Arc::new(sink))
        .clock(Arc::new(clock.clone()))
        .build()
        .context("Failed to build pipeline")?;

    let inbox = ConversationId::new(&args.inbox);
    stream.mount(&inbox);

    let mut elapsed_ms = 0u64;
    let mut timers_fired = 0;
    let mut frames = 0;
    let mut rejected = 0;
    let mut turn_open = false;

    for (at_ms, value) in log {
        if let Some(at) = at_ms {
            if at > elapsed_ms {
                clock.advance_ms(at - elapsed_ms);
                elapsed_ms = at;
            }
        }
        timers_fired += stream.fire_due();

        match InboundFrame::decode(&value.to_string()) {
            Ok(frame) => {
                frames += 1;
                // Lay down what the UI writes on send. A capture that starts
                // mid-turn only gets the placeholder.
                if let Some((id, text)) = user_echo(&frame, &inbox, &actor) {
                    cache.push_message(&inbox, Message::user(id, text, clock.wall_time()));
                    cache.push_optimistic_assistant(&inbox, clock.wall_time());
                    turn_open = true;
                } else if !turn_open && frame.inbox() == &inbox {
                    cache.push_optimistic_assistant(&inbox, clock.wall_time());
                    turn_open = true;
                }
                stream.handle_frame(&frame);
            }
            Err(e) => {
                rejected += 1;
                warn!(error = %e, at_ms = elapsed_ms, "Skipping undecodable frame");
            }
        }
    }
    timers_fired += stream.fire_due();
    let tail_at_end_of_log = stream.tail(&inbox);

    // Settle: run every deferred action in deadline order
    while let Some(deadline) = stream.next_deadline() {
        let wait = deadline.saturating_duration_since(clock.now());
        clock.advance(wait.max(Duration::from_millis(1)));
        timers_fired += stream.fire_due();
    }

    let transcript = Transcript {
        inbox: args.inbox.clone(),
        frames,
        rejected,
        timers_fired,
        tail_at_end_of_log,
        tail: stream.tail(&inbox),
        messages: cache
            .read(&inbox)
            .map(|pages| pages.messages().cloned().collect())
            .unwrap_or_default(),
        widget: widgets.current(),
        invalidations: cache.invalidation_count(&inbox),
        control_frames: node.drain_control().len(),
    };

    println!("{}", serde_json::to_string_pretty(&transcript)?);
    Ok(())
}
