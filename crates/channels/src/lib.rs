//! Outbound delivery seam.
//!
//! Channel adapters (Telegram, Slack, WhatsApp, ...) live outside this
//! workspace. They implement [`ChannelOutbound`] and are registered per
//! surface in an [`OutboundRegistry`], which the reply dispatcher delivers
//! through.

pub mod error;
pub mod plugin;
pub mod registry;

pub use {
    error::{Error, Result},
    plugin::{ChannelOutbound, ChannelReplyTarget},
    registry::OutboundRegistry,
};
