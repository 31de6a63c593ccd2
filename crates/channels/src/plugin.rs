use {async_trait::async_trait, switchboard_common::ReplyPayload};

use crate::Result;

/// Where to send a reply.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelReplyTarget {
    /// Surface name, e.g. "telegram".
    pub channel_type: String,
    pub account_id: String,
    /// Chat/peer ID to send the reply to.
    pub chat_id: String,
}

/// Send messages out through one platform.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<()>;

    /// Send a payload that carries attachments. Adapters without media
    /// support fall back to the text.
    async fn send_media(&self, account_id: &str, to: &str, payload: &ReplyPayload) -> Result<()> {
        match payload.text.as_deref() {
            Some(text) => self.send_text(account_id, to, text).await,
            None => Ok(()),
        }
    }

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(&self, _account_id: &str, _to: &str) -> Result<()> {
        Ok(())
    }

    /// Deliver one reply payload, picking text or media.
    async fn deliver(&self, target: &ChannelReplyTarget, payload: &ReplyPayload) -> Result<()> {
        if payload.media.is_empty() {
            let text = payload.text.as_deref().unwrap_or_default();
            self.send_text(&target.account_id, &target.chat_id, text)
                .await
        } else {
            self.send_media(&target.account_id, &target.chat_id, payload)
                .await
        }
    }
}
