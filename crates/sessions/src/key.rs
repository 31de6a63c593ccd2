//! Session key shapes.
//!
//! - `main` (configurable): direct traffic
//! - `global`: everything, when the global scope is configured
//! - `<surface>:group:<id>` / `<surface>:channel:<id>`: group and room traffic
//! - `group:<id>`: legacy group key without a surface

use switchboard_common::ChatType;

pub const GLOBAL_KEY: &str = "global";
pub const DEFAULT_MAIN_KEY: &str = "main";
pub const UNKNOWN_KEY: &str = "unknown";
pub const LEGACY_GROUP_PREFIX: &str = "group:";

/// Surfaces whose addresses may carry a `<surface>:` prefix.
pub const KNOWN_GROUP_SURFACES: &[&str] = &[
    "whatsapp", "telegram", "discord", "slack", "signal", "imessage", "webchat", "msteams",
    "matrix",
];

pub fn is_known_surface(surface: &str) -> bool {
    KNOWN_GROUP_SURFACES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(surface))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Group,
    Channel,
}

impl GroupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("group") {
            Some(Self::Group)
        } else if raw.eq_ignore_ascii_case("channel") {
            Some(Self::Channel)
        } else {
            None
        }
    }

    pub fn chat_type(self) -> ChatType {
        match self {
            Self::Group => ChatType::Group,
            Self::Channel => ChatType::Room,
        }
    }
}

/// Parsed group address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    /// Lower-case surface, `None` for legacy keys.
    pub surface: Option<String>,
    pub kind: GroupKind,
    pub id: String,
}

impl GroupKey {
    /// `<surface>:<kind>:<id>`, or `group:<id>` without a surface.
    pub fn render(&self) -> String {
        match &self.surface {
            Some(surface) => format!("{surface}:{}:{}", self.kind.as_str(), self.id),
            None => self.legacy_key(),
        }
    }

    pub fn legacy_key(&self) -> String {
        format!("{LEGACY_GROUP_PREFIX}{}", self.id)
    }

    /// Parse a stored session key. Only canonical shapes are accepted;
    /// platform addresses go through the router instead.
    pub fn parse(key: &str) -> Option<Self> {
        if let Some(id) = key.strip_prefix(LEGACY_GROUP_PREFIX) {
            return (!id.is_empty()).then(|| Self {
                surface: None,
                kind: GroupKind::Group,
                id: id.to_string(),
            });
        }
        let mut parts = key.splitn(3, ':');
        let surface = parts.next()?;
        let kind = GroupKind::parse(parts.next()?)?;
        let id = parts.next()?;
        if surface.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self {
            surface: Some(surface.to_ascii_lowercase()),
            kind,
            id: id.to_string(),
        })
    }
}

/// Coarse classification used by listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Direct,
    Group,
    Global,
    Unknown,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Global => "global",
            Self::Unknown => "unknown",
        }
    }

    pub fn classify(key: &str, chat_type: Option<ChatType>) -> Self {
        let key = key.trim();
        if key == GLOBAL_KEY {
            return Self::Global;
        }
        if key.is_empty() || key == UNKNOWN_KEY {
            return Self::Unknown;
        }
        if GroupKey::parse(key).is_some() || chat_type.is_some_and(ChatType::is_group_like) {
            return Self::Group;
        }
        Self::Direct
    }
}
