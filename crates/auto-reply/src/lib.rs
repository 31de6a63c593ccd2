//! Auto-reply engine: decides when agent runs start for each session and
//! delivers what they produce.
//!
//! - [`history`]: unanswered group messages kept as context
//! - [`queue`]: per-session run admission, batching and the global run cap
//! - [`reply`]: filtering, prefixing and pacing of outbound replies
//! - [`pipeline`]: the inbound entry point tying them together

pub mod error;
pub mod history;
pub mod pipeline;
pub mod queue;
pub mod reply;

pub use {
    error::{Error, Result},
    history::{HistoryBuffer, HistoryEntry},
    pipeline::{AgentRunExecutor, AutoReply, Disposition, InboundOutcome},
    queue::{
        Admission, LaneSnapshot, LaneState, QueueSettings, QueuedMessage, RunContext,
        RunCoordinator, RunExecutor,
    },
    reply::{DispatchCounts, HumanDelay, ReplyDispatcher, ResponsePrefix, SILENT_REPLY_TOKEN},
};
