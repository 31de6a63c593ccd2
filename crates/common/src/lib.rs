//! Shared inbound/outbound types and error plumbing for the switchboard crates.

pub mod error;
pub mod time;
pub mod types;

pub use {
    error::FromMessage,
    types::{ChatType, MediaRef, MsgContext, ReplyPayload},
};
