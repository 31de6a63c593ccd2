//! Reply delivery: filtering, prefixing and pacing of run output.

use std::{sync::Arc, time::Duration};

use {
    rand::Rng,
    serde::Serialize,
    switchboard_agents::{FragmentKind, ModelSelection, ModelSelectionCell, ReplyFragment},
    switchboard_channels::{ChannelOutbound, ChannelReplyTarget},
    switchboard_config::HumanDelayConfig,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, dispatch as dispatch_metrics, labels};

/// Reply text the agent uses to say "nothing to send".
pub const SILENT_REPLY_TOKEN: &str = "NO_REPLY";

// ── Prefix ──────────────────────────────────────────────────────────────────

/// Response prefix template, e.g. `"[{model}] "`.
///
/// Variables: `{model}`, `{modelFull}` (`provider/model`), `{provider}`,
/// `{thinkingLevel}` (alias `{think}`). Unknown variables, and variables with
/// no value yet, are left as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePrefix {
    template: String,
}

impl ResponsePrefix {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, selection: Option<&ModelSelection>) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let name = &after[..close];
            match template_var(name, selection) {
                Some(value) => out.push_str(&value),
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                },
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

fn template_var(name: &str, selection: Option<&ModelSelection>) -> Option<String> {
    let selection = selection?;
    match name.trim().to_ascii_lowercase().as_str() {
        "model" => Some(selection.model.clone()),
        "modelfull" => Some(format!("{}/{}", selection.provider, selection.model)),
        "provider" => Some(selection.provider.clone()),
        "thinkinglevel" | "think" => selection.thinking_level.clone(),
        _ => None,
    }
}

fn apply_prefix(text: &str, prefix: &str) -> String {
    if prefix.is_empty() || text.starts_with(prefix) {
        text.to_string()
    } else {
        format!("{prefix}{text}")
    }
}

// ── Pacing ──────────────────────────────────────────────────────────────────

/// Random pause between consecutive block/final replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HumanDelay {
    bounds: Option<(u64, u64)>,
}

impl HumanDelay {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn between(min_ms: u64, max_ms: u64) -> Self {
        Self {
            bounds: Some((min_ms, max_ms.max(min_ms))),
        }
    }

    pub fn from_config(config: &HumanDelayConfig) -> Self {
        Self {
            bounds: config.bounds(),
        }
    }

    fn sample(&self) -> Option<Duration> {
        let (min, max) = self.bounds?;
        let ms = if min >= max {
            min
        } else {
            rand::rng().random_range(min..=max)
        };
        Some(Duration::from_millis(ms))
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounts {
    pub tool: usize,
    pub block: usize,
    #[serde(rename = "final")]
    pub final_: usize,
}

pub type OnDeliveryError = Box<dyn Fn(FragmentKind, &switchboard_channels::Error) + Send + Sync>;

/// Delivers the fragments of one run to one reply target.
pub struct ReplyDispatcher {
    outbound: Arc<dyn ChannelOutbound>,
    target: ChannelReplyTarget,
    prefix: Option<ResponsePrefix>,
    selection: ModelSelectionCell,
    delay: HumanDelay,
    cancel: CancellationToken,
    on_error: Option<OnDeliveryError>,
    counts: DispatchCounts,
    failed: usize,
}

impl ReplyDispatcher {
    pub fn new(outbound: Arc<dyn ChannelOutbound>, target: ChannelReplyTarget) -> Self {
        Self {
            outbound,
            target,
            prefix: None,
            selection: ModelSelectionCell::new(),
            delay: HumanDelay::off(),
            cancel: CancellationToken::new(),
            on_error: None,
            counts: DispatchCounts::default(),
            failed: 0,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: Option<ResponsePrefix>) -> Self {
        self.prefix = prefix;
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: ModelSelectionCell) -> Self {
        self.selection = selection;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: HumanDelay) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: OnDeliveryError) -> Self {
        self.on_error = Some(f);
        self
    }

    pub fn target(&self) -> &ChannelReplyTarget {
        &self.target
    }

    /// Deliver one fragment. Returns whether it was sent.
    pub async fn dispatch(&mut self, fragment: ReplyFragment) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let ReplyFragment { kind, mut payload } = fragment;

        if payload.silent
            || payload.is_empty()
            || payload.text.as_deref().map(str::trim) == Some(SILENT_REPLY_TOKEN)
        {
            debug!(kind = kind.as_str(), "skipping silent reply");
            #[cfg(feature = "metrics")]
            counter!(dispatch_metrics::SKIPPED_TOTAL, labels::KIND => kind.as_str()).increment(1);
            return false;
        }

        if let (Some(prefix), Some(text)) = (&self.prefix, payload.text.as_deref()) {
            let rendered = prefix.render(self.selection.get().as_ref());
            payload.text = Some(apply_prefix(text, &rendered));
        }

        if kind != FragmentKind::Tool
            && self.counts.block + self.counts.final_ > 0
            && let Some(pause) = self.delay.sample()
        {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = tokio::time::sleep(pause) => {},
            }
        }

        match self.outbound.deliver(&self.target, &payload).await {
            Ok(()) => {
                match kind {
                    FragmentKind::Tool => self.counts.tool += 1,
                    FragmentKind::Block => self.counts.block += 1,
                    FragmentKind::Final => self.counts.final_ += 1,
                }
                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::DELIVERIES_TOTAL, labels::KIND => kind.as_str())
                    .increment(1);
                true
            },
            Err(e) => {
                self.failed += 1;
                warn!(
                    channel = %self.target.channel_type,
                    to = %self.target.chat_id,
                    kind = kind.as_str(),
                    error = %e,
                    "reply delivery failed"
                );
                #[cfg(feature = "metrics")]
                counter!(
                    dispatch_metrics::DELIVERY_FAILURES_TOTAL,
                    labels::CHANNEL => self.target.channel_type.clone()
                )
                .increment(1);
                if let Some(on_error) = &self.on_error {
                    on_error(kind, &e);
                }
                false
            },
        }
    }

    /// Whether any block or final reply reached the user.
    pub fn did_send_reply(&self) -> bool {
        self.counts.block + self.counts.final_ > 0
    }

    pub fn counts(&self) -> DispatchCounts {
        self.counts
    }

    pub fn failed(&self) -> usize {
        self.failed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        switchboard_common::ReplyPayload,
    };

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(tokio::time::Instant, String)>>,
    }

    impl Outbox {
        fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ChannelOutbound for Outbox {
        async fn send_text(&self, _account_id: &str, _to: &str, text: &str) -> switchboard_channels::Result<()> {
            if text.contains("bad") {
                return Err(switchboard_channels::Error::unavailable("socket closed"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((tokio::time::Instant::now(), text.to_string()));
            Ok(())
        }
    }

    fn target() -> ChannelReplyTarget {
        ChannelReplyTarget {
            channel_type: "telegram".into(),
            account_id: "bot".into(),
            chat_id: "42".into(),
        }
    }

    fn dispatcher(outbox: &Arc<Outbox>) -> ReplyDispatcher {
        ReplyDispatcher::new(outbox.clone(), target())
    }

    fn selection() -> ModelSelection {
        ModelSelection {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            thinking_level: Some("low".into()),
        }
    }

    #[tokio::test]
    async fn skips_empty_and_silent_payloads() {
        let outbox = Arc::new(Outbox::default());
        let mut d = dispatcher(&outbox);

        assert!(!d.dispatch(ReplyFragment::block("")).await);
        assert!(!d.dispatch(ReplyFragment::final_text(" NO_REPLY ")).await);
        let silent = ReplyFragment {
            kind: FragmentKind::Final,
            payload: ReplyPayload {
                text: Some("hidden".into()),
                silent: true,
                ..Default::default()
            },
        };
        assert!(!d.dispatch(silent).await);
        assert!(d.dispatch(ReplyFragment::final_text("NO_REPLY, really")).await);

        assert_eq!(outbox.texts(), vec!["NO_REPLY, really"]);
        assert!(d.did_send_reply());
    }

    #[test]
    fn prefix_template_variables() {
        let prefix = ResponsePrefix::new("[{model}|{modelFull}|{provider}|{think}|{thinkingLevel}|{other}] ");
        assert_eq!(
            prefix.render(Some(&selection())),
            "[gpt-4o|openai/gpt-4o|openai|low|low|{other}] "
        );
        assert_eq!(prefix.render(None), "[{model}|{modelFull}|{provider}|{think}|{thinkingLevel}|{other}] ");
        assert_eq!(ResponsePrefix::new("{unterminated").render(Some(&selection())), "{unterminated");
    }

    #[tokio::test]
    async fn prefix_reads_selection_at_delivery_time() {
        let outbox = Arc::new(Outbox::default());
        let cell = ModelSelectionCell::new();
        let mut d = dispatcher(&outbox)
            .with_prefix(Some(ResponsePrefix::new("[{model}] ")))
            .with_selection(cell.clone());

        cell.set(selection());
        d.dispatch(ReplyFragment::block("hello")).await;
        d.dispatch(ReplyFragment::final_text("[gpt-4o] already prefixed")).await;

        assert_eq!(outbox.texts(), vec![
            "[gpt-4o] hello",
            "[gpt-4o] already prefixed"
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_only_between_block_replies() {
        let outbox = Arc::new(Outbox::default());
        let mut d = dispatcher(&outbox).with_delay(HumanDelay::from_config(&HumanDelayConfig {
            mode: switchboard_config::HumanDelayMode::Natural,
            ..Default::default()
        }));

        let start = tokio::time::Instant::now();
        d.dispatch(ReplyFragment::block("one")).await;
        d.dispatch(ReplyFragment::tool("running search")).await;
        d.dispatch(ReplyFragment::final_text("two")).await;

        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent[0].0, start);
        assert_eq!(sent[1].0, start);
        let gap = sent[2].0 - sent[1].0;
        assert!(gap >= Duration::from_millis(800), "gap was {gap:?}");
        assert!(gap <= Duration::from_millis(2500), "gap was {gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn custom_delay_uses_configured_bounds() {
        let outbox = Arc::new(Outbox::default());
        let mut d = dispatcher(&outbox).with_delay(HumanDelay::between(100, 100));

        d.dispatch(ReplyFragment::block("one")).await;
        d.dispatch(ReplyFragment::block("two")).await;

        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent[1].0 - sent[0].0, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn stops_after_cancel() {
        let outbox = Arc::new(Outbox::default());
        let cancel = CancellationToken::new();
        let mut d = dispatcher(&outbox).with_cancel(cancel.clone());

        assert!(d.dispatch(ReplyFragment::block("partial")).await);
        cancel.cancel();
        assert!(!d.dispatch(ReplyFragment::final_text("rest")).await);
        assert_eq!(outbox.texts(), vec!["partial"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_delay_drops_the_fragment() {
        let outbox = Arc::new(Outbox::default());
        let cancel = CancellationToken::new();
        let mut d = dispatcher(&outbox)
            .with_cancel(cancel.clone())
            .with_delay(HumanDelay::between(1_000, 1_000));

        d.dispatch(ReplyFragment::block("one")).await;
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        assert!(!d.dispatch(ReplyFragment::block("two")).await);
        assert_eq!(outbox.texts(), vec!["one"]);
    }

    #[tokio::test]
    async fn delivery_failure_does_not_stop_later_fragments() {
        let outbox = Arc::new(Outbox::default());
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let mut d = dispatcher(&outbox).on_error(Box::new(move |kind, _err| {
            assert_eq!(kind, FragmentKind::Block);
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!d.dispatch(ReplyFragment::block("bad news")).await);
        assert!(d.dispatch(ReplyFragment::final_text("good news")).await);

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(d.failed(), 1);
        assert_eq!(d.counts(), DispatchCounts {
            tool: 0,
            block: 0,
            final_: 1
        });
        assert_eq!(outbox.texts(), vec!["good news"]);
    }
}
