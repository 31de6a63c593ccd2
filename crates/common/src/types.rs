//! Inbound message context and outbound reply payloads shared by every crate.

use serde::{Deserialize, Serialize};

/// Conversation shape of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Direct,
    Group,
    Room,
}

impl ChatType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Room => "room",
        }
    }

    /// Parse an adapter-supplied chat type. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" | "dm" | "private" => Some(Self::Direct),
            "group" => Some(Self::Group),
            "room" | "channel" => Some(Self::Room),
            _ => None,
        }
    }

    pub fn is_group_like(self) -> bool {
        !matches!(self, Self::Direct)
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attachment reference carried through without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Normalized inbound message handed over by a channel adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsgContext {
    /// Platform address of the conversation (`whatsapp:group:123`, `123@g.us`, ...).
    pub from: String,
    /// Originating channel, when the adapter knows it.
    #[serde(default)]
    pub surface: Option<String>,
    /// Raw chat type as reported by the adapter (`direct`, `group`, `channel`, ...).
    #[serde(default)]
    pub chat_type: Option<String>,
    pub body: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub account_id: Option<String>,
    /// Whether the bot was addressed in a group. `None` when the adapter does not track it.
    #[serde(default)]
    pub was_mentioned: Option<bool>,
    #[serde(default)]
    pub group_subject: Option<String>,
    #[serde(default)]
    pub group_room: Option<String>,
    #[serde(default)]
    pub group_space: Option<String>,
}

impl MsgContext {
    /// Best display name for the sender.
    pub fn sender_label(&self) -> &str {
        self.sender_name
            .as_deref()
            .or(self.sender_id.as_deref())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("unknown")
    }

    pub fn surface_lower(&self) -> Option<String> {
        self.surface
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
    }
}

/// One outbound reply unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Produced by the agent but not meant for the user.
    #[serde(default)]
    pub silent: bool,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// No text (after trimming) and no media.
    pub fn is_empty(&self) -> bool {
        self.media.is_empty() && self.text.as_deref().is_none_or(|t| t.trim().is_empty())
    }
}
