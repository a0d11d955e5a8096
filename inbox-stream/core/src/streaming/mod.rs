//! Streaming State
//!
//! Ephemeral, per-conversation state for the assistant turn currently in
//! flight.
//!
//! # Design Philosophy
//!
//! Stream state never touches the durable cache. The UI reads from a
//! [`StreamSession`] while a turn is streaming and switches to the cache
//! only after the reconciler has written the final message and the session
//! has been cleared. The session store is handed to the pipeline by value;
//! there is no global store.
//!
//! - [`TokenBuffer`] coalesces raw fragments between flushes
//! - [`StreamSessionStore`] owns the sessions and mutates them
//! - [`ReasoningDurationLedger`] keeps the last reasoning duration per
//!   conversation after its session is gone

pub mod buffer;
pub mod ledger;
pub mod session;

pub use buffer::{TokenBuffer, TokenKind, DEFAULT_FLUSH_INTERVAL};
pub use ledger::{ReasoningDurationLedger, DEFAULT_LEDGER_CAPACITY};
pub use session::{StreamSession, StreamSessionStore};
