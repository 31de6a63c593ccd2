use std::str::FromStr;

use {
    serde::{Deserialize, Serialize},
    switchboard_common::{ChatType, time::now_ms},
    switchboard_config::{DropPolicy, QueueMode, SendPolicy},
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    Minimal,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for ThinkingLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err("invalid thinkingLevel (use off|minimal|low|medium|high)".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerboseLevel {
    On,
    Off,
}

impl FromStr for VerboseLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            _ => Err("invalid verboseLevel (use on|off)".into()),
        }
    }
}

/// When the agent answers in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupActivation {
    Mention,
    Always,
}

impl FromStr for GroupActivation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mention" => Ok(Self::Mention),
            "always" => Ok(Self::Always),
            _ => Err("invalid groupActivation (use mention|always)".into()),
        }
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Persisted state of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    /// Generated when a hand-written entry leaves it out.
    #[serde(default = "new_session_id")]
    pub session_id: String,
    /// Epoch millis of the last activity; never decreases.
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<ChatType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<ThinkingLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_level: Option<VerboseLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_policy: Option<SendPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_activation: Option<GroupActivation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_mode: Option<QueueMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_debounce_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_cap: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_drop: Option<DropPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub aborted_last_run: bool,
    /// Fields written by other tools; carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionEntry {
    pub fn new() -> Self {
        Self {
            session_id: new_session_id(),
            updated_at: now_ms(),
            chat_type: None,
            surface: None,
            thinking_level: None,
            verbose_level: None,
            provider_override: None,
            model_override: None,
            send_policy: None,
            group_activation: None,
            queue_mode: None,
            queue_debounce_ms: None,
            queue_cap: None,
            queue_drop: None,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            last_channel: None,
            last_to: None,
            display_name: None,
            subject: None,
            room: None,
            space: None,
            label: None,
            aborted_last_run: false,
            extra: serde_json::Map::new(),
        }
    }

    /// Bump `updated_at` without ever moving it backwards.
    pub fn touch(&mut self, now: u64) {
        self.updated_at = self.updated_at.max(now);
    }

    /// Fresh `session_id`; routing metadata and operator preferences survive,
    /// token counters do not.
    pub fn reset(&mut self, now: u64) {
        self.session_id = new_session_id();
        self.input_tokens = None;
        self.output_tokens = None;
        self.total_tokens = None;
        self.aborted_last_run = false;
        self.touch(now);
    }

    /// `totalTokens`, or `input + output` when it was never recorded.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
        })
    }

    pub fn add_usage(&mut self, input: u64, output: u64) {
        let input = self.input_tokens.unwrap_or(0) + input;
        let output = self.output_tokens.unwrap_or(0) + output;
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self.total_tokens = Some(input + output);
    }

    pub fn send_policy_or(&self, default: SendPolicy) -> SendPolicy {
        self.send_policy.unwrap_or(default)
    }
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// Field-level update for a session.
///
/// Outer `None` leaves a field untouched, `Some(None)` clears it and
/// `Some(Some(v))` sets it. Enum-valued fields carry the raw string so
/// validation can report what was wrong.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub thinking_level: Option<Option<String>>,
    pub verbose_level: Option<Option<String>>,
    pub send_policy: Option<Option<String>>,
    pub group_activation: Option<Option<String>>,
    pub queue_mode: Option<Option<String>>,
    pub queue_debounce_ms: Option<Option<u64>>,
    pub queue_cap: Option<Option<usize>>,
    pub queue_drop: Option<Option<String>>,
    pub provider_override: Option<Option<String>>,
    pub model_override: Option<Option<String>>,
    pub label: Option<Option<String>>,
}

fn parse_field<T: FromStr<Err = String>>(value: &Option<Option<String>>) -> Result<Option<Option<T>>> {
    match value {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(raw)) => raw.parse().map(|v| Some(Some(v))).map_err(Error::validation),
    }
}

fn trimmed(value: &Option<Option<String>>, field: &str) -> Result<Option<Option<String>>> {
    match value {
        Some(Some(raw)) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(Error::validation(format!("invalid {field} (empty)")));
            }
            Ok(Some(Some(raw.to_string())))
        },
        other => Ok(other.clone()),
    }
}

fn assign<T>(field: &mut Option<T>, update: Option<Option<T>>) {
    if let Some(value) = update {
        *field = value;
    }
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.thinking_level.is_none()
            && self.verbose_level.is_none()
            && self.send_policy.is_none()
            && self.group_activation.is_none()
            && self.queue_mode.is_none()
            && self.queue_debounce_ms.is_none()
            && self.queue_cap.is_none()
            && self.queue_drop.is_none()
            && self.provider_override.is_none()
            && self.model_override.is_none()
            && self.label.is_none()
    }

    /// Validate every field, then apply. On error `entry` is untouched.
    pub fn apply(&self, entry: &mut SessionEntry) -> Result<()> {
        let thinking = parse_field::<ThinkingLevel>(&self.thinking_level)?;
        let verbose = parse_field::<VerboseLevel>(&self.verbose_level)?;
        let send = parse_field::<SendPolicy>(&self.send_policy)?;
        let activation = parse_field::<GroupActivation>(&self.group_activation)?;
        let mode = parse_field::<QueueMode>(&self.queue_mode)?;
        let drop = parse_field::<DropPolicy>(&self.queue_drop)?;
        if let Some(Some(0)) = self.queue_cap {
            return Err(Error::validation("invalid queueCap (must be at least 1)"));
        }
        let provider = trimmed(&self.provider_override, "providerOverride")?;
        let model = trimmed(&self.model_override, "modelOverride")?;
        let label = match &self.label {
            Some(Some(raw)) if raw.trim().is_empty() => Some(None),
            Some(Some(raw)) => Some(Some(raw.trim().to_string())),
            other => other.clone(),
        };

        assign(&mut entry.thinking_level, thinking);
        assign(&mut entry.verbose_level, verbose);
        assign(&mut entry.send_policy, send);
        assign(&mut entry.group_activation, activation);
        assign(&mut entry.queue_mode, mode);
        assign(&mut entry.queue_debounce_ms, self.queue_debounce_ms);
        assign(&mut entry.queue_cap, self.queue_cap);
        assign(&mut entry.queue_drop, drop);
        assign(&mut entry.provider_override, provider);
        assign(&mut entry.model_override, model);
        assign(&mut entry.label, label);
        Ok(())
    }
}
