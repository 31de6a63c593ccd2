/// Config schema types (session routing, message queueing, reply pacing, agent limits).
use std::{collections::HashMap, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub session: SessionConfig,
    pub messages: MessagesConfig,
    pub agent: AgentConfig,
}

// ── Session ──────────────────────────────────────────────────────────────────

/// How direct traffic is bucketed into sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionScope {
    /// Groups get their own session; direct chats share the main session.
    #[default]
    PerSender,
    /// Everything shares the `global` session.
    Global,
}

/// Whether replies may be sent for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendPolicy {
    #[default]
    Allow,
    Deny,
}

impl SendPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl FromStr for SendPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            _ => Err("invalid sendPolicy (use allow|deny)".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub scope: SessionScope,
    /// Bucket for direct traffic. Blank falls back to `main`.
    pub main_key: String,
    /// Directory holding `sessions.json` and transcripts. Defaults to `<data_dir>/sessions`.
    pub store: Option<PathBuf>,
    /// Reset a session after this many idle minutes (0 = never).
    pub idle_minutes: u64,
    /// Message bodies that start a fresh session.
    pub reset_triggers: Vec<String>,
    /// Default when a session has no `sendPolicy` of its own.
    pub send_policy: SendPolicy,
    /// Lines kept by `sessions.compact` when the caller gives no limit.
    pub compact_max_lines: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scope: SessionScope::default(),
            main_key: "main".into(),
            store: None,
            idle_minutes: 0,
            reset_triggers: vec!["/new".into(), "/reset".into()],
            send_policy: SendPolicy::default(),
            compact_max_lines: 400,
        }
    }
}

impl SessionConfig {
    pub fn main_key(&self) -> &str {
        let key = self.main_key.trim();
        if key.is_empty() { "main" } else { key }
    }

    /// Resolved store directory.
    pub fn store_dir(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("sessions"))
    }
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// What happens to a message that arrives while a run is active for its session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    /// Inject into the live run.
    Steer,
    /// Buffer; one run consumes the whole backlog after the current run.
    #[default]
    Followup,
    /// Like followup, but wait out the debounce window before starting.
    Collect,
    /// Steer now and also keep the message for a followup run.
    #[serde(alias = "steer+backlog")]
    SteerBacklog,
    /// Strict FIFO, one run per message.
    Queue,
    /// Cancel the active run and start over with the new message.
    Interrupt,
}

impl QueueMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Steer => "steer",
            Self::Followup => "followup",
            Self::Collect => "collect",
            Self::SteerBacklog => "steer-backlog",
            Self::Queue => "queue",
            Self::Interrupt => "interrupt",
        }
    }
}

impl FromStr for QueueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steer" => Ok(Self::Steer),
            "followup" => Ok(Self::Followup),
            "collect" => Ok(Self::Collect),
            "steer-backlog" | "steer+backlog" => Ok(Self::SteerBacklog),
            "queue" => Ok(Self::Queue),
            "interrupt" => Ok(Self::Interrupt),
            _ => Err(
                "invalid queueMode (use steer|followup|collect|steer-backlog|queue|interrupt)"
                    .into(),
            ),
        }
    }
}

/// Overflow behaviour once the pending batch reaches its cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// Discard the oldest pending message.
    Old,
    /// Discard the incoming message.
    New,
    /// Fold the pending messages into one summary message.
    #[default]
    Summarize,
}

impl DropPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Old => "old",
            Self::New => "new",
            Self::Summarize => "summarize",
        }
    }
}

impl FromStr for DropPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "old" => Ok(Self::Old),
            "new" => Ok(Self::New),
            "summarize" => Ok(Self::Summarize),
            _ => Err("invalid queueDrop (use old|new|summarize)".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub mode: QueueMode,
    /// Quiet period before a batched run starts (0 = start immediately).
    pub debounce_ms: u64,
    /// Maximum pending messages per session.
    pub cap: usize,
    pub drop: DropPolicy,
    /// Per-surface mode overrides, keyed by lower-case surface name.
    pub by_surface: HashMap<String, QueueMode>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::default(),
            debounce_ms: 0,
            cap: 20,
            drop: DropPolicy::default(),
            by_surface: HashMap::new(),
        }
    }
}

impl QueueConfig {
    pub fn mode_for_surface(&self, surface: Option<&str>) -> QueueMode {
        surface
            .and_then(|s| self.by_surface.get(&s.to_ascii_lowercase()))
            .copied()
            .unwrap_or(self.mode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupChatConfig {
    /// Unanswered group messages kept as context (0 disables buffering).
    pub history_limit: usize,
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self { history_limit: 50 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HumanDelayMode {
    #[default]
    Off,
    /// Uniform 800–2500 ms.
    Natural,
    /// Uniform between `min_ms` and `max_ms`.
    Custom,
}

/// Pause inserted between consecutive block replies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanDelayConfig {
    pub mode: HumanDelayMode,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl HumanDelayConfig {
    pub const NATURAL_MIN_MS: u64 = 800;
    pub const NATURAL_MAX_MS: u64 = 2500;

    /// Inclusive delay bounds, `None` when pacing is off.
    pub fn bounds(&self) -> Option<(u64, u64)> {
        match self.mode {
            HumanDelayMode::Off => None,
            HumanDelayMode::Natural => Some((Self::NATURAL_MIN_MS, Self::NATURAL_MAX_MS)),
            HumanDelayMode::Custom => {
                let min = self.min_ms.unwrap_or(Self::NATURAL_MIN_MS);
                let max = self.max_ms.unwrap_or(min).max(min);
                Some((min, max))
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    pub queue: QueueConfig,
    pub group_chat: GroupChatConfig,
    /// Template prepended to replies, e.g. `"[{model}] "`.
    pub response_prefix: Option<String>,
    pub human_delay: HumanDelayConfig,
}

// ── Agent ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent runs allowed at once across all sessions.
    pub max_concurrent: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}
