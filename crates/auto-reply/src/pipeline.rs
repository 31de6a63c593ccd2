//! Inbound pipeline: from a normalized message to delivered replies.
//!
//! [`AutoReply::handle_inbound`] resolves the session, applies the reset,
//! send-policy and mention gates, and hands the message to the
//! [`RunCoordinator`]. Runs are executed by [`AgentRunExecutor`], which
//! streams backend events into a [`ReplyDispatcher`].

use std::sync::Arc;

use {
    async_trait::async_trait,
    futures::StreamExt,
    serde_json::json,
    switchboard_agents::{
        AgentBackend, FragmentKind, ModelSelection, ModelSelectionCell, RunEvent, RunOptions,
        RunRequest,
    },
    switchboard_channels::{ChannelOutbound, ChannelReplyTarget},
    switchboard_common::{ChatType, MsgContext, time::now_ms},
    switchboard_config::{QueueConfig, SendPolicy, SwitchboardConfig},
    switchboard_routing::{SessionRouting, resolve_session_key},
    switchboard_sessions::{
        GroupActivation, InboundMeta, ResetPolicy, SessionEntry, SessionStore, TranscriptStore,
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{auto_reply as auto_reply_metrics, counter, labels};

use crate::{
    error::Result,
    history::{HistoryBuffer, HistoryEntry, render_with_history},
    queue::{Admission, QueueSettings, QueuedMessage, RunContext, RunCoordinator, RunExecutor, render_batch},
    reply::{HumanDelay, ReplyDispatcher, ResponsePrefix},
};

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handed to the run coordinator.
    Admitted(Admission),
    /// Kept as group context; the agent was not addressed.
    Buffered,
    /// The session's send policy is `deny`.
    SendDenied,
    /// A bare reset trigger: the session was reset and nothing runs.
    ResetOnly,
    /// No text and no media.
    Empty,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admitted(admission) => admission.as_str(),
            Self::Buffered => "buffered",
            Self::SendDenied => "send_denied",
            Self::ResetOnly => "reset_only",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundOutcome {
    pub session_key: String,
    pub session_id: String,
    pub disposition: Disposition,
}

/// The auto-reply engine for every session.
#[derive(Clone)]
pub struct AutoReply {
    routing: SessionRouting,
    reset_policy: ResetPolicy,
    default_send_policy: SendPolicy,
    queue: QueueConfig,
    store: SessionStore,
    transcripts: TranscriptStore,
    history: Arc<HistoryBuffer>,
    coordinator: RunCoordinator,
}

impl AutoReply {
    /// Transcripts live next to the session store document.
    pub fn new(
        config: &SwitchboardConfig,
        store: SessionStore,
        backend: Arc<dyn AgentBackend>,
        outbound: Arc<dyn ChannelOutbound>,
    ) -> Self {
        let transcripts = TranscriptStore::new(
            store
                .path()
                .parent()
                .map(ToOwned::to_owned)
                .unwrap_or_default(),
        );
        let history = Arc::new(HistoryBuffer::from_config(&config.messages.group_chat));
        let executor = Arc::new(AgentRunExecutor {
            store: store.clone(),
            transcripts: transcripts.clone(),
            history: Arc::clone(&history),
            backend,
            outbound,
            prefix: config
                .messages
                .response_prefix
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(ResponsePrefix::new),
            delay: HumanDelay::from_config(&config.messages.human_delay),
        });
        Self {
            routing: SessionRouting::from_config(&config.session),
            reset_policy: ResetPolicy::from_config(&config.session),
            default_send_policy: config.session.send_policy,
            queue: config.messages.queue.clone(),
            store,
            transcripts,
            history,
            coordinator: RunCoordinator::new(executor, config.agent.max_concurrent),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn transcripts(&self) -> &TranscriptStore {
        &self.transcripts
    }

    pub fn history(&self) -> &Arc<HistoryBuffer> {
        &self.history
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    pub fn routing(&self) -> &SessionRouting {
        &self.routing
    }

    /// Route one inbound message.
    pub async fn handle_inbound(&self, ctx: MsgContext) -> Result<InboundOutcome> {
        let surface = ctx.surface_lower();
        #[cfg(feature = "metrics")]
        counter!(
            auto_reply_metrics::MESSAGES_RECEIVED_TOTAL,
            labels::CHANNEL => surface.clone().unwrap_or_else(|| "unknown".into())
        )
        .increment(1);

        let resolved = resolve_session_key(&ctx, &self.routing);
        let meta = InboundMeta::from_context(&ctx, resolved.chat_type);
        if self.reset_policy.match_trigger(&ctx.body).is_some()
            && self.coordinator.cancel(&resolved.key, true).await
        {
            debug!(session_key = %resolved.key, "reset trigger cancelled the active run");
        }
        let session = self
            .store
            .resolve_for_inbound(
                &resolved.key,
                resolved.legacy_key.as_deref(),
                &ctx.body,
                &meta,
                &self.reset_policy,
                now_ms(),
            )
            .await?;
        let key = resolved.key;
        let entry = session.entry;
        if session.reset.is_some() {
            if self.coordinator.is_active(&key) {
                self.coordinator.cancel(&key, true).await;
            }
            self.history.clear(&key);
        }

        let held = if session.body.trim().is_empty() && ctx.media.is_empty() {
            if self.reset_policy.match_trigger(&ctx.body).is_some() {
                Some(Disposition::ResetOnly)
            } else {
                Some(Disposition::Empty)
            }
        } else if entry.send_policy_or(self.default_send_policy) == SendPolicy::Deny {
            Some(Disposition::SendDenied)
        } else if needs_mention(resolved.chat_type, &entry) && ctx.was_mentioned == Some(false) {
            self.history
                .append(&key, HistoryEntry::from_context(&ctx, &session.body));
            Some(Disposition::Buffered)
        } else {
            None
        };

        let disposition = match held {
            Some(disposition) => {
                debug!(session_key = %key, disposition = disposition.as_str(), "inbound message held");
                #[cfg(feature = "metrics")]
                counter!(auto_reply_metrics::MESSAGES_HELD_TOTAL, labels::REASON => disposition.as_str())
                    .increment(1);
                disposition
            },
            None => {
                let settings = QueueSettings::resolve(
                    &self.queue,
                    surface.as_deref().or(entry.surface.as_deref()),
                    Some(&entry),
                );
                let admission = self
                    .coordinator
                    .enqueue(&key, settings, QueuedMessage::new(ctx, session.body))
                    .await;
                Disposition::Admitted(admission)
            },
        };

        Ok(InboundOutcome {
            session_key: key,
            session_id: entry.session_id,
            disposition,
        })
    }
}

fn needs_mention(chat_type: ChatType, entry: &SessionEntry) -> bool {
    chat_type.is_group_like()
        && entry.group_activation.unwrap_or(GroupActivation::Mention) == GroupActivation::Mention
}

/// Pick the reply route: the newest message in the batch, else the session's
/// last successful route.
fn reply_target(batch: &[QueuedMessage], entry: &SessionEntry) -> Option<ChannelReplyTarget> {
    if let Some(ctx) = batch.iter().rev().find_map(|m| m.ctx.as_ref()) {
        return Some(ChannelReplyTarget {
            channel_type: ctx.surface_lower().or_else(|| entry.surface.clone())?,
            account_id: ctx.account_id.clone().unwrap_or_default(),
            chat_id: ctx.from.clone(),
        });
    }
    Some(ChannelReplyTarget {
        channel_type: entry.last_channel.clone()?,
        account_id: String::new(),
        chat_id: entry.last_to.clone()?,
    })
}

fn history_entry(message: &QueuedMessage) -> HistoryEntry {
    match &message.ctx {
        Some(ctx) => HistoryEntry::from_context(ctx, &message.body),
        None => HistoryEntry {
            sender: message.sender.clone(),
            body: message.body.clone(),
            timestamp: None,
            message_id: None,
        },
    }
}

/// Runs one batch against the agent backend and delivers its output.
pub struct AgentRunExecutor {
    store: SessionStore,
    transcripts: TranscriptStore,
    history: Arc<HistoryBuffer>,
    backend: Arc<dyn AgentBackend>,
    outbound: Arc<dyn ChannelOutbound>,
    prefix: Option<ResponsePrefix>,
    delay: HumanDelay,
}

impl AgentRunExecutor {
    async fn record_turn(&self, session_id: &str, role: &str, content: &str) {
        let turn = json!({ "role": role, "content": content, "ts": now_ms() });
        if let Err(e) = self.transcripts.append(session_id, &turn).await {
            warn!(session_id, error = %e, "failed to append transcript turn");
        }
    }
}

#[async_trait]
impl RunExecutor for AgentRunExecutor {
    async fn execute(&self, run: RunContext) -> anyhow::Result<()> {
        let RunContext {
            run_id,
            session_key,
            batch,
            steer,
            cancel,
        } = run;

        let Some(entry) = self.store.get(&session_key).await else {
            debug!(session_key = %session_key, run_id = %run_id, "session removed before run start");
            return Ok(());
        };
        let target = reply_target(&batch, &entry)
            .ok_or_else(|| anyhow::anyhow!("no reply route for session {session_key}"))?;
        let input = render_with_history(&self.history.entries(&session_key), &render_batch(&batch));
        self.record_turn(&entry.session_id, "user", &input).await;

        let request = RunRequest {
            run_id: run_id.clone(),
            session_key: session_key.clone(),
            session_id: entry.session_id.clone(),
            input,
            batch: batch.iter().filter_map(|m| m.ctx.clone()).collect(),
            options: RunOptions::from_entry(&entry),
            steer,
            cancel: cancel.clone(),
        };
        let mut stream = self.backend.start_run(request).await?;

        let selection = ModelSelectionCell::new();
        let mut dispatcher = ReplyDispatcher::new(Arc::clone(&self.outbound), target.clone())
            .with_prefix(self.prefix.clone())
            .with_selection(selection.clone())
            .with_delay(self.delay)
            .with_cancel(cancel.clone());

        let (mut input_tokens, mut output_tokens) = (0u64, 0u64);
        let mut replies = Vec::new();
        let mut failure = None;
        let mut aborted = false;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    aborted = true;
                    if let Err(e) = self.backend.cancel_run(&entry.session_id).await {
                        warn!(session_key = %session_key, run_id = %run_id, error = %e, "backend cancel failed");
                    }
                    break;
                },
                event = stream.next() => match event {
                    None => break,
                    Some(RunEvent::ModelSelected { provider, model, thinking_level }) => {
                        selection.set(ModelSelection { provider, model, thinking_level });
                    },
                    Some(RunEvent::Fragment(fragment)) => {
                        let kind = fragment.kind;
                        let text = fragment.payload.text.clone();
                        if dispatcher.dispatch(fragment).await
                            && kind != FragmentKind::Tool
                            && let Some(text) = text
                        {
                            replies.push(text);
                        }
                    },
                    Some(RunEvent::Usage { input, output }) => {
                        input_tokens += input;
                        output_tokens += output;
                    },
                    Some(RunEvent::Error(message)) => {
                        failure = Some(message);
                        break;
                    },
                },
            }
        }
        drop(stream);

        // A reset during the run issued a new session id; leave that session alone.
        let current = self.store.get(&session_key).await;
        if current.is_none_or(|current| current.session_id != entry.session_id) {
            for text in &replies {
                self.record_turn(&entry.session_id, "assistant", text).await;
            }
            info!(session_key = %session_key, run_id = %run_id, aborted, "run outlived its session");
            return match failure {
                Some(message) => Err(anyhow::anyhow!("agent run failed: {message}")),
                None => Ok(()),
            };
        }

        if input_tokens + output_tokens > 0 {
            self.store
                .record_usage(&session_key, input_tokens, output_tokens)
                .await?;
        }
        for text in &replies {
            self.record_turn(&entry.session_id, "assistant", text).await;
        }

        if dispatcher.did_send_reply() {
            self.history.clear(&session_key);
            self.store
                .update_last_route(&session_key, &target.channel_type, &target.chat_id)
                .await?;
        } else if entry.chat_type.is_some_and(ChatType::is_group_like) {
            for message in &batch {
                self.history.append(&session_key, history_entry(message));
            }
        }

        if aborted || entry.aborted_last_run {
            self.store.set_aborted(&session_key, aborted).await?;
        }

        let counts = dispatcher.counts();
        info!(
            session_key = %session_key,
            run_id = %run_id,
            tool = counts.tool,
            block = counts.block,
            finals = counts.final_,
            failed = dispatcher.failed(),
            aborted,
            "replies dispatched"
        );

        match failure {
            Some(message) => Err(anyhow::anyhow!("agent run failed: {message}")),
            None => Ok(()),
        }
    }
}
