//! Session freshness: idle expiry and reset triggers for inbound traffic.

use {
    serde::Serialize,
    switchboard_common::{ChatType, MsgContext},
    switchboard_config::SessionConfig,
};

use crate::entry::SessionEntry;

#[derive(Debug, Clone, Default)]
pub struct ResetPolicy {
    /// 0 disables idle expiry.
    pub idle_minutes: u64,
    pub triggers: Vec<String>,
}

impl ResetPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            idle_minutes: config.idle_minutes,
            triggers: config
                .reset_triggers
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_expired(&self, entry: &SessionEntry, now: u64) -> bool {
        self.idle_minutes > 0
            && now.saturating_sub(entry.updated_at) > self.idle_minutes.saturating_mul(60_000)
    }

    /// If `body` is a reset trigger, return what follows it (possibly empty).
    pub fn match_trigger(&self, body: &str) -> Option<String> {
        let trimmed = body.trim();
        let lower = trimmed.to_ascii_lowercase();
        self.triggers.iter().find_map(|trigger| {
            if lower == *trigger {
                return Some(String::new());
            }
            let rest = lower.strip_prefix(trigger.as_str())?;
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            // ASCII lowercasing keeps byte offsets.
            Some(trimmed[trigger.len()..].trim().to_string())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetReason {
    Trigger,
    Idle,
}

impl ResetReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Idle => "idle",
        }
    }
}

/// Metadata recorded on the entry for every inbound message.
#[derive(Debug, Clone, Default)]
pub struct InboundMeta {
    pub chat_type: ChatType,
    pub surface: Option<String>,
    pub display_name: Option<String>,
    pub subject: Option<String>,
    pub room: Option<String>,
    pub space: Option<String>,
}

impl InboundMeta {
    pub fn from_context(ctx: &MsgContext, chat_type: ChatType) -> Self {
        Self {
            chat_type,
            surface: ctx.surface_lower(),
            display_name: if chat_type.is_group_like() {
                ctx.group_subject.clone()
            } else {
                ctx.sender_name.clone()
            },
            subject: ctx.group_subject.clone(),
            room: ctx.group_room.clone(),
            space: ctx.group_space.clone(),
        }
    }

    pub(crate) fn apply(&self, entry: &mut SessionEntry) {
        entry.chat_type = Some(self.chat_type);
        if self.surface.is_some() {
            entry.surface = self.surface.clone();
        }
        for (field, value) in [
            (&mut entry.display_name, &self.display_name),
            (&mut entry.subject, &self.subject),
            (&mut entry.room, &self.room),
            (&mut entry.space, &self.space),
        ] {
            if value.is_some() {
                field.clone_from(value);
            }
        }
    }
}

/// Outcome of resolving the session for one inbound message.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub entry: SessionEntry,
    pub is_new: bool,
    pub reset: Option<ResetReason>,
    /// Legacy key the entry was moved from, if it was found only there.
    pub adopted_from: Option<String>,
    /// Body to run, with any reset trigger stripped. Empty after a bare trigger.
    pub body: String,
}
