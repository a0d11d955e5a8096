//! Event Loop Driver
//!
//! Runs an [`InboxStream`] against a [`FrameSource`]: waits for whichever
//! comes first, the next inbound frame or the earliest timer deadline, and
//! feeds it to the pipeline. The pipeline stays synchronous; this is the only
//! place that awaits.

use std::future::Future;
use std::time::Instant;

use crate::pipeline::InboxStream;
use crate::transport::traits::{FrameSource, TransportError};

/// Counters reported when the loop ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Frames handed to the pipeline
    pub frames: usize,
    /// Timer actions that ran
    pub timers_fired: usize,
}

/// Drive the pipeline until the source closes
///
/// # Errors
///
/// Returns the source's error if the connection fails.
pub async fn run<S>(stream: &mut InboxStream, source: &mut S) -> Result<DriverStats, TransportError>
where
    S: FrameSource + ?Sized,
{
    run_until(stream, source, std::future::pending::<()>()).await
}

/// Drive the pipeline until the source closes or `shutdown` resolves
///
/// # Errors
///
/// Returns the source's error if the connection fails.
pub async fn run_until<S, F>(
    stream: &mut InboxStream,
    source: &mut S,
    shutdown: F,
) -> Result<DriverStats, TransportError>
where
    S: FrameSource + ?Sized,
    F: Future<Output = ()>,
{
    let mut stats = DriverStats::default();
    tokio::pin!(shutdown);

    loop {
        stats.timers_fired += stream.fire_due();
        let deadline = stream.next_deadline();

        tokio::select! {
            () = &mut shutdown => {
                tracing::debug!("Driver shutdown requested");
                break;
            }
            frame = source.next_frame() => match frame? {
                Some(raw) => {
                    stats.frames += 1;
                    stream.handle_raw(&raw);
                }
                None => {
                    tracing::info!(frames = stats.frames, "Frame source closed");
                    break;
                }
            },
            () = wait_until(deadline) => {}
        }
    }

    Ok(stats)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}
