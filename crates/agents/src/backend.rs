use std::pin::Pin;

use {
    async_trait::async_trait,
    futures::Stream,
    serde::{Deserialize, Serialize},
    switchboard_common::{MsgContext, ReplyPayload},
    switchboard_sessions::{SessionEntry, ThinkingLevel, VerboseLevel},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

// ── Reply fragments ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    /// Tool progress/result summary.
    Tool,
    /// Intermediate block of the answer.
    Block,
    /// Last piece of the answer.
    Final,
}

impl FragmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Block => "block",
            Self::Final => "final",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFragment {
    pub kind: FragmentKind,
    pub payload: ReplyPayload,
}

impl ReplyFragment {
    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Tool,
            payload: ReplyPayload::text(text),
        }
    }

    pub fn block(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Block,
            payload: ReplyPayload::text(text),
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Final,
            payload: ReplyPayload::text(text),
        }
    }
}

// ── Runs ────────────────────────────────────────────────────────────────────

/// Per-session preferences forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub provider_override: Option<String>,
    pub model_override: Option<String>,
    pub thinking_level: Option<ThinkingLevel>,
    pub verbose_level: Option<VerboseLevel>,
}

impl RunOptions {
    pub fn from_entry(entry: &SessionEntry) -> Self {
        Self {
            provider_override: entry.provider_override.clone(),
            model_override: entry.model_override.clone(),
            thinking_level: entry.thinking_level,
            verbose_level: entry.verbose_level,
        }
    }
}

/// Everything the backend needs to execute one run.
#[derive(Debug)]
pub struct RunRequest {
    pub run_id: String,
    pub session_key: String,
    pub session_id: String,
    /// Rendered prompt input (history context + batched bodies).
    pub input: String,
    /// Inbound messages folded into this run, oldest first.
    pub batch: Vec<MsgContext>,
    pub options: RunOptions,
    /// Extra user messages steered into the run while it is live.
    pub steer: mpsc::UnboundedReceiver<String>,
    pub cancel: CancellationToken,
}

/// Events emitted by a run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    ModelSelected {
        provider: String,
        model: String,
        thinking_level: Option<String>,
    },
    Fragment(ReplyFragment),
    Usage {
        input: u64,
        output: u64,
    },
    /// The run failed. No further events follow.
    Error(String),
}

pub type RunStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

/// The conversational agent that turns a batch of messages into replies.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn start_run(&self, request: RunRequest) -> anyhow::Result<RunStream>;

    /// Ask the backend to stop the run for `session_id`. Resolves once the
    /// backend has acknowledged.
    async fn cancel_run(&self, session_id: &str) -> anyhow::Result<()>;
}
