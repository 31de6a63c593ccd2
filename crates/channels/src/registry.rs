use std::{collections::HashMap, sync::Arc};

use {async_trait::async_trait, switchboard_common::ReplyPayload, tracing::debug};

use crate::{
    Error, Result,
    plugin::{ChannelOutbound, ChannelReplyTarget},
};

/// Outbound adapters keyed by surface name.
///
/// Itself a [`ChannelOutbound`]: `deliver` routes on
/// `target.channel_type`.
#[derive(Default, Clone)]
pub struct OutboundRegistry {
    outbounds: HashMap<String, Arc<dyn ChannelOutbound>>,
}

impl OutboundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel_type: impl Into<String>, outbound: Arc<dyn ChannelOutbound>) {
        let channel_type = channel_type.into().to_ascii_lowercase();
        debug!(channel_type = %channel_type, "registered outbound");
        self.outbounds.insert(channel_type, outbound);
    }

    pub fn get(&self, channel_type: &str) -> Option<&Arc<dyn ChannelOutbound>> {
        self.outbounds.get(&channel_type.to_ascii_lowercase())
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.outbounds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn require(&self, channel_type: &str) -> Result<&Arc<dyn ChannelOutbound>> {
        self.get(channel_type)
            .ok_or_else(|| Error::unknown_channel(channel_type))
    }
}

#[async_trait]
impl ChannelOutbound for OutboundRegistry {
    /// Plain sends carry no surface; use [`ChannelOutbound::deliver`].
    async fn send_text(&self, _account_id: &str, _to: &str, _text: &str) -> Result<()> {
        Err(Error::invalid_target("registry needs a reply target to pick a channel"))
    }

    async fn deliver(&self, target: &ChannelReplyTarget, payload: &ReplyPayload) -> Result<()> {
        self.require(&target.channel_type)?
            .deliver(target, payload)
            .await
    }
}
