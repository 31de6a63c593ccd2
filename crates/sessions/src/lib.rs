//! Session storage and management.
//!
//! All session entries live in one JSON document (`sessions.json`) that is
//! rewritten atomically on every change. Conversation transcripts are kept
//! next to it as append-only JSONL files named after the session id.

pub mod entry;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod migrate;
pub mod store;
pub mod transcript;

pub use {
    entry::{GroupActivation, SessionEntry, SessionPatch, ThinkingLevel, VerboseLevel},
    error::{Error, Result},
    key::{GLOBAL_KEY, GroupKey, GroupKind, SessionKind},
    lifecycle::{InboundMeta, ResetPolicy, ResetReason, ResolvedSession},
    store::{SessionListFilter, SessionMap, SessionRow, SessionStore},
    transcript::{CompactOutcome, TranscriptStore},
};
