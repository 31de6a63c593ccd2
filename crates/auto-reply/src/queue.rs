//! Per-session run admission.
//!
//! Every session key has a lane that is idle, admitting (waiting for a
//! global run slot) or running. Inbound messages either start a run, get
//! batched behind a debounce timer, are steered into the live run, queue up
//! for a followup run, or interrupt the live run, depending on the
//! effective [`QueueMode`].
//!
//! Lane state sits behind one synchronous mutex that is never held across
//! an `.await`. Runs execute in spawned tasks and report back when they
//! finish. Debounce timers are spawned sleeps tagged with a generation, so a
//! stale timer does nothing.

use std::{
    collections::{HashMap, VecDeque},
    fmt::Write as _,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    serde::Serialize,
    switchboard_common::MsgContext,
    switchboard_config::{DropPolicy, QueueConfig, QueueMode},
    switchboard_sessions::SessionEntry,
    tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, gauge, histogram, labels, queue as queue_metrics};

/// First line of a message produced by the `summarize` drop policy.
pub const SUMMARY_HEADER: &str = "[Queued messages while agent was busy]";

// ── Settings ────────────────────────────────────────────────────────────────

/// Effective queue behaviour for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub mode: QueueMode,
    pub debounce_ms: u64,
    pub cap: usize,
    pub drop: DropPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::resolve(&QueueConfig::default(), None, None)
    }
}

impl QueueSettings {
    /// Session overrides win over the per-surface mode, which wins over the
    /// global defaults.
    pub fn resolve(config: &QueueConfig, surface: Option<&str>, entry: Option<&SessionEntry>) -> Self {
        Self {
            mode: entry
                .and_then(|e| e.queue_mode)
                .unwrap_or_else(|| config.mode_for_surface(surface)),
            debounce_ms: entry
                .and_then(|e| e.queue_debounce_ms)
                .unwrap_or(config.debounce_ms),
            cap: entry.and_then(|e| e.queue_cap).unwrap_or(config.cap).max(1),
            drop: entry.and_then(|e| e.queue_drop).unwrap_or(config.drop),
        }
    }
}

// ── Messages ────────────────────────────────────────────────────────────────

/// One inbound message waiting for (or handed to) a run.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub sender: String,
    pub body: String,
    /// Inbound context. `None` for synthetic summary messages.
    pub ctx: Option<MsgContext>,
    collapsed: Vec<(String, String)>,
}

impl QueuedMessage {
    pub fn new(ctx: MsgContext, body: impl Into<String>) -> Self {
        Self {
            sender: ctx.sender_label().to_string(),
            body: body.into(),
            ctx: Some(ctx),
            collapsed: Vec::new(),
        }
    }

    /// A message without inbound context.
    pub fn text(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            ctx: None,
            collapsed: Vec::new(),
        }
    }

    pub fn is_summary(&self) -> bool {
        !self.collapsed.is_empty()
    }

    /// Fold messages into one. Earlier summaries are flattened so the count
    /// stays accurate.
    fn summarize(messages: Vec<QueuedMessage>) -> Self {
        let mut lines = Vec::new();
        for message in messages {
            if message.collapsed.is_empty() {
                lines.push((message.sender, message.body));
            } else {
                lines.extend(message.collapsed);
            }
        }
        let noun = if lines.len() == 1 { "message" } else { "messages" };
        let mut body = format!("{SUMMARY_HEADER}\n({} {noun})", lines.len());
        for (sender, text) in &lines {
            let _ = write!(body, "\n- {sender}: {text}");
        }
        Self {
            sender: "queue".into(),
            body,
            ctx: None,
            collapsed: lines,
        }
    }
}

/// Agent input for a batch: a lone message is passed through, several are
/// listed as `sender: body` lines.
pub fn render_batch(batch: &[QueuedMessage]) -> String {
    match batch {
        [] => String::new(),
        [only] => only.body.clone(),
        many => many
            .iter()
            .map(|m| {
                if m.is_summary() {
                    m.body.clone()
                } else {
                    format!("{}: {}", m.sender, m.body)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

// ── Public state ────────────────────────────────────────────────────────────

/// What happened to an enqueued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Admission {
    Started,
    Debounced,
    Steered,
    Queued,
    SteeredAndQueued,
    Interrupted,
    Dropped,
}

impl Admission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Debounced => "debounced",
            Self::Steered => "steered",
            Self::Queued => "queued",
            Self::SteeredAndQueued => "steered-and-queued",
            Self::Interrupted => "interrupted",
            Self::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneState {
    #[default]
    Idle,
    Admitting,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSnapshot {
    pub state: LaneState,
    pub pending: usize,
    pub debounce_armed: bool,
    pub run_id: Option<String>,
}

// ── Executor seam ───────────────────────────────────────────────────────────

/// Handed to the executor for one run.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub session_key: String,
    pub batch: Vec<QueuedMessage>,
    /// Messages steered into this run while it is live.
    pub steer: mpsc::UnboundedReceiver<String>,
    /// Fired when the run is interrupted or cancelled.
    pub cancel: CancellationToken,
}

/// Executes admitted runs.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    async fn execute(&self, run: RunContext) -> anyhow::Result<()>;

    /// Called after a run fails. Pending messages stay queued for the next run.
    async fn run_failed(&self, _session_key: &str, _run_id: &str, _error: &anyhow::Error) {}
}

// ── Lanes ───────────────────────────────────────────────────────────────────

struct ActiveRun {
    run_id: String,
    steer: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

struct RunTicket {
    key: String,
    run_id: String,
    cancel: CancellationToken,
    finished: CancellationToken,
}

struct PreparedRun {
    ticket: RunTicket,
    context: RunContext,
}

enum RunOutcome {
    Completed,
    Cancelled,
    Failed(anyhow::Error),
}

impl RunOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Default)]
struct Lane {
    state: LaneState,
    pending: VecDeque<QueuedMessage>,
    settings: QueueSettings,
    timer_generation: u64,
    timer_armed: bool,
    /// Slot kept across a collect window after a run finished.
    held_permit: Option<OwnedSemaphorePermit>,
    run: Option<ActiveRun>,
}

impl Lane {
    /// Buffer a message, applying the drop policy on overflow. Returns false
    /// when the message itself was dropped.
    fn push_pending(&mut self, key: &str, message: QueuedMessage) -> bool {
        let cap = self.settings.cap.max(1);
        if self.pending.len() >= cap {
            let policy = self.settings.drop;
            debug!(session_key = key, policy = policy.as_str(), cap, "pending queue full");
            #[cfg(feature = "metrics")]
            counter!(queue_metrics::MESSAGES_DROPPED_TOTAL, labels::POLICY => policy.as_str())
                .increment(1);
            match policy {
                DropPolicy::Old => {
                    while self.pending.len() >= cap {
                        self.pending.pop_front();
                    }
                },
                DropPolicy::New => return false,
                DropPolicy::Summarize => {
                    let mut collapsed: Vec<QueuedMessage> = self.pending.drain(..).collect();
                    if cap == 1 {
                        collapsed.push(message);
                        self.pending.push_back(QueuedMessage::summarize(collapsed));
                        return true;
                    }
                    self.pending.push_back(QueuedMessage::summarize(collapsed));
                },
            }
        }
        self.pending.push_back(message);
        true
    }

    /// Nothing queued, armed, held or running.
    fn is_dormant(&self) -> bool {
        self.state == LaneState::Idle
            && self.pending.is_empty()
            && !self.timer_armed
            && self.held_permit.is_none()
            && self.run.is_none()
    }

    fn try_steer(&self, body: &str) -> bool {
        match (&self.state, &self.run) {
            (LaneState::Running, Some(run)) => run.steer.send(body.to_string()).is_ok(),
            _ => false,
        }
    }

    fn take_batch(&mut self) -> Vec<QueuedMessage> {
        if self.settings.mode == QueueMode::Queue {
            self.pending.pop_front().into_iter().collect()
        } else {
            self.pending.drain(..).collect()
        }
    }

    /// Move the next batch into a fresh run. The lane becomes `Admitting`.
    fn prepare_run(&mut self, key: &str) -> PreparedRun {
        let run_id = uuid::Uuid::new_v4().to_string();
        let (steer_tx, steer_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();

        self.timer_armed = false;
        self.timer_generation += 1;
        self.state = LaneState::Admitting;
        self.run = Some(ActiveRun {
            run_id: run_id.clone(),
            steer: steer_tx,
            cancel: cancel.clone(),
            finished: finished.clone(),
        });

        PreparedRun {
            context: RunContext {
                run_id: run_id.clone(),
                session_key: key.to_string(),
                batch: self.take_batch(),
                steer: steer_rx,
                cancel: cancel.clone(),
            },
            ticket: RunTicket {
                key: key.to_string(),
                run_id,
                cancel,
                finished,
            },
        }
    }
}

// ── Coordinator ─────────────────────────────────────────────────────────────

struct Inner {
    lanes: Mutex<HashMap<String, Lane>>,
    /// FIFO-fair run slots shared by all sessions.
    slots: Arc<Semaphore>,
    executor: Arc<dyn RunExecutor>,
    /// Signalled whenever a lane may have gone idle.
    changed: Notify,
}

/// Decides, per session, when agent runs start.
#[derive(Clone)]
pub struct RunCoordinator {
    inner: Arc<Inner>,
}

impl RunCoordinator {
    pub fn new(executor: Arc<dyn RunExecutor>, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: Mutex::new(HashMap::new()),
                slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
                executor,
                changed: Notify::new(),
            }),
        }
    }

    /// Admit one inbound message for `key`.
    ///
    /// In `interrupt` mode this waits until the active run has acknowledged
    /// cancellation.
    pub async fn enqueue(
        &self,
        key: &str,
        settings: QueueSettings,
        message: QueuedMessage,
    ) -> Admission {
        let mode = settings.mode;
        let mut start = None;
        let mut interrupt = None;

        let admission = {
            let mut lanes = self.inner.lock_lanes();
            let lane = lanes.entry(key.to_string()).or_default();
            let debounce_ms = settings.debounce_ms;
            let cap = settings.cap.max(1);
            lane.settings = settings;

            match lane.state {
                LaneState::Idle => {
                    if !lane.push_pending(key, message) {
                        Admission::Dropped
                    } else if debounce_ms == 0 || lane.pending.len() >= cap {
                        let permit = lane.held_permit.take();
                        start = Some((lane.prepare_run(key), permit));
                        Admission::Started
                    } else {
                        self.inner.arm_timer(key, lane, debounce_ms);
                        Admission::Debounced
                    }
                },
                LaneState::Admitting | LaneState::Running => match mode {
                    QueueMode::Steer => {
                        if lane.try_steer(&message.body) {
                            Admission::Steered
                        } else if lane.push_pending(key, message) {
                            Admission::Queued
                        } else {
                            Admission::Dropped
                        }
                    },
                    QueueMode::SteerBacklog => {
                        let steered = lane.try_steer(&message.body);
                        match (steered, lane.push_pending(key, message)) {
                            (true, true) => Admission::SteeredAndQueued,
                            (true, false) => Admission::Steered,
                            (false, true) => Admission::Queued,
                            (false, false) => Admission::Dropped,
                        }
                    },
                    QueueMode::Interrupt => {
                        if lane.push_pending(key, message) {
                            interrupt = lane
                                .run
                                .as_ref()
                                .map(|run| (run.cancel.clone(), run.finished.clone()));
                            Admission::Interrupted
                        } else {
                            Admission::Dropped
                        }
                    },
                    QueueMode::Followup | QueueMode::Collect | QueueMode::Queue => {
                        if lane.push_pending(key, message) {
                            Admission::Queued
                        } else {
                            Admission::Dropped
                        }
                    },
                },
            }
        };

        debug!(session_key = key, mode = mode.as_str(), admission = admission.as_str(), "message admitted");
        #[cfg(feature = "metrics")]
        counter!(
            queue_metrics::ADMISSIONS_TOTAL,
            labels::MODE => mode.as_str(),
            labels::OUTCOME => admission.as_str()
        )
        .increment(1);

        if let Some((run, permit)) = start {
            self.inner.spawn(run, permit);
        }
        if let Some((cancel, finished)) = interrupt {
            #[cfg(feature = "metrics")]
            counter!(queue_metrics::RUNS_CANCELLED_TOTAL, labels::REASON => "interrupt").increment(1);
            cancel.cancel();
            finished.cancelled().await;
        }
        admission
    }

    /// Cancel the active run for `key` and wait until it has stopped.
    /// Returns whether a run was cancelled.
    pub async fn cancel(&self, key: &str, clear_pending: bool) -> bool {
        let tokens = {
            let mut lanes = self.inner.lock_lanes();
            let Some(lane) = lanes.get_mut(key) else {
                return false;
            };
            if clear_pending {
                lane.pending.clear();
                lane.timer_armed = false;
                lane.timer_generation += 1;
                lane.held_permit = None;
            }
            let tokens = lane
                .run
                .as_ref()
                .map(|run| (run.run_id.clone(), run.cancel.clone(), run.finished.clone()));
            Inner::prune(&mut lanes, key);
            tokens
        };

        let Some((run_id, cancel, finished)) = tokens else {
            self.inner.changed.notify_waiters();
            return false;
        };
        debug!(session_key = key, run_id = %run_id, clear_pending, "cancelling run");
        #[cfg(feature = "metrics")]
        counter!(queue_metrics::RUNS_CANCELLED_TOTAL, labels::REASON => "control").increment(1);
        cancel.cancel();
        finished.cancelled().await;
        true
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.inner
            .lock_lanes()
            .get(key)
            .is_some_and(|lane| lane.state != LaneState::Idle)
    }

    pub fn snapshot(&self, key: &str) -> Option<LaneSnapshot> {
        self.inner.lock_lanes().get(key).map(|lane| LaneSnapshot {
            state: lane.state,
            pending: lane.pending.len(),
            debounce_armed: lane.timer_armed,
            run_id: lane.run.as_ref().map(|run| run.run_id.clone()),
        })
    }

    /// Resolve once the lane has no run and no armed timer.
    pub async fn wait_idle(&self, key: &str) {
        loop {
            let notified = self.inner.changed.notified();
            let settled = self
                .inner
                .lock_lanes()
                .get(key)
                .is_none_or(|lane| lane.state == LaneState::Idle && !lane.timer_armed);
            if settled {
                return;
            }
            notified.await;
        }
    }

    /// Forget the lane for `key`. A run still in flight finishes unobserved.
    pub fn remove_lane(&self, key: &str) -> bool {
        let removed = self.inner.lock_lanes().remove(key).is_some();
        self.inner.changed.notify_waiters();
        removed
    }
}

impl Inner {
    fn lock_lanes(&self) -> MutexGuard<'_, HashMap<String, Lane>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the lane for `key` once it has nothing left to track.
    fn prune(lanes: &mut HashMap<String, Lane>, key: &str) {
        if lanes.get(key).is_some_and(Lane::is_dormant) {
            lanes.remove(key);
        }
    }

    fn arm_timer(self: &Arc<Self>, key: &str, lane: &mut Lane, delay_ms: u64) {
        lane.timer_generation += 1;
        lane.timer_armed = true;
        let generation = lane.timer_generation;
        let inner = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            inner.timer_fired(&key, generation);
        });
    }

    fn timer_fired(self: &Arc<Self>, key: &str, generation: u64) {
        let start = {
            let mut lanes = self.lock_lanes();
            let Some(lane) = lanes.get_mut(key) else {
                return;
            };
            if !lane.timer_armed
                || lane.timer_generation != generation
                || lane.state != LaneState::Idle
            {
                return;
            }
            lane.timer_armed = false;
            if lane.pending.is_empty() {
                lane.held_permit = None;
                Self::prune(&mut lanes, key);
                None
            } else {
                let permit = lane.held_permit.take();
                Some((lane.prepare_run(key), permit))
            }
        };
        match start {
            Some((run, permit)) => self.spawn(run, permit),
            None => self.changed.notify_waiters(),
        }
    }

    fn spawn(self: &Arc<Self>, run: PreparedRun, permit: Option<OwnedSemaphorePermit>) {
        tokio::spawn(Arc::clone(self).drive(run, permit));
    }

    /// Run a lane until it has nothing left to start.
    async fn drive(self: Arc<Self>, mut run: PreparedRun, mut permit: Option<OwnedSemaphorePermit>) {
        loop {
            let slot = match permit.take() {
                Some(slot) => Some(slot),
                None => tokio::select! {
                    () = run.ticket.cancel.cancelled() => None,
                    acquired = Arc::clone(&self.slots).acquire_owned() => acquired.ok(),
                },
            };

            let outcome = match slot {
                Some(_) if self.mark_running(&run.ticket) => {
                    self.execute(run.context, &run.ticket).await
                },
                _ => RunOutcome::Cancelled,
            };

            match self.finish(run.ticket, slot, outcome) {
                Some((next, carried)) => {
                    run = next;
                    permit = carried;
                },
                None => return,
            }
        }
    }

    fn mark_running(&self, ticket: &RunTicket) -> bool {
        let mut lanes = self.lock_lanes();
        match lanes.get_mut(&ticket.key) {
            Some(lane)
                if !ticket.cancel.is_cancelled()
                    && lane.run.as_ref().is_some_and(|r| r.run_id == ticket.run_id) =>
            {
                lane.state = LaneState::Running;
                true
            },
            _ => false,
        }
    }

    async fn execute(&self, context: RunContext, ticket: &RunTicket) -> RunOutcome {
        let batch = context.batch.len();
        info!(session_key = %ticket.key, run_id = %ticket.run_id, batch, "run started");
        #[cfg(feature = "metrics")]
        gauge!(queue_metrics::ACTIVE_RUNS).increment(1.0);
        let started = Instant::now();

        let executor = Arc::clone(&self.executor);
        let joined = tokio::spawn(async move { executor.execute(context).await }).await;

        #[cfg(feature = "metrics")]
        {
            gauge!(queue_metrics::ACTIVE_RUNS).decrement(1.0);
            histogram!(queue_metrics::RUN_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        }

        let outcome = match joined {
            Ok(_) if ticket.cancel.is_cancelled() => RunOutcome::Cancelled,
            Ok(Ok(())) => RunOutcome::Completed,
            Ok(Err(e)) => RunOutcome::Failed(e),
            Err(e) => RunOutcome::Failed(anyhow::anyhow!("run task failed: {e}")),
        };

        if let RunOutcome::Failed(error) = &outcome {
            warn!(session_key = %ticket.key, run_id = %ticket.run_id, error = %error, "run failed");
            #[cfg(feature = "metrics")]
            counter!(queue_metrics::RUN_FAILURES_TOTAL).increment(1);
            self.executor
                .run_failed(&ticket.key, &ticket.run_id, error)
                .await;
        }
        info!(
            session_key = %ticket.key,
            run_id = %ticket.run_id,
            outcome = outcome.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        outcome
    }

    /// Book-keep a finished run and prepare the followup, if any. The slot is
    /// carried into the followup so a busy session does not requeue behind
    /// newly admitted ones.
    fn finish(
        self: &Arc<Self>,
        ticket: RunTicket,
        permit: Option<OwnedSemaphorePermit>,
        outcome: RunOutcome,
    ) -> Option<(PreparedRun, Option<OwnedSemaphorePermit>)> {
        let next = {
            let mut lanes = self.lock_lanes();
            let next = match lanes.get_mut(&ticket.key) {
                Some(lane) if lane.run.as_ref().is_some_and(|r| r.run_id == ticket.run_id) => {
                    lane.run = None;
                    lane.state = LaneState::Idle;
                    if matches!(outcome, RunOutcome::Failed(_)) || lane.pending.is_empty() {
                        None
                    } else if lane.settings.mode == QueueMode::Collect && lane.settings.debounce_ms > 0
                    {
                        lane.held_permit = permit;
                        let delay = lane.settings.debounce_ms;
                        self.arm_timer(&ticket.key, lane, delay);
                        None
                    } else {
                        Some((lane.prepare_run(&ticket.key), permit))
                    }
                },
                _ => None,
            };
            Self::prune(&mut lanes, &ticket.key);
            next
        };

        ticket.finished.cancel();
        if next.is_none() {
            self.changed.notify_waiters();
        }
        next
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct Recorder {
        hold: Duration,
        runs: Mutex<Vec<Vec<String>>>,
        steered: Mutex<Vec<String>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        cancelled: AtomicUsize,
        failures: AtomicUsize,
        fail_next: AtomicBool,
    }

    impl Recorder {
        fn holding(ms: u64) -> Arc<Self> {
            Arc::new(Self {
                hold: Duration::from_millis(ms),
                ..Default::default()
            })
        }

        fn runs(&self) -> Vec<Vec<String>> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RunExecutor for Recorder {
        async fn execute(&self, mut run: RunContext) -> anyhow::Result<()> {
            self.runs
                .lock()
                .unwrap()
                .push(run.batch.iter().map(|m| m.body.clone()).collect());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let sleep = tokio::time::sleep(self.hold);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    () = run.cancel.cancelled() => {
                        self.cancelled.fetch_add(1, Ordering::SeqCst);
                        break;
                    },
                    Some(text) = run.steer.recv() => self.steered.lock().unwrap().push(text),
                }
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("backend exploded");
            }
            Ok(())
        }

        async fn run_failed(&self, _key: &str, _run_id: &str, _error: &anyhow::Error) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn settings(mode: QueueMode, debounce_ms: u64, cap: usize, drop: DropPolicy) -> QueueSettings {
        QueueSettings {
            mode,
            debounce_ms,
            cap,
            drop,
        }
    }

    fn followup() -> QueueSettings {
        settings(QueueMode::Followup, 0, 20, DropPolicy::Summarize)
    }

    fn msg(body: &str) -> QueuedMessage {
        QueuedMessage::text("user", body)
    }

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_batches_until_cap() {
        let rec = Recorder::holding(100);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Followup, 50, 3, DropPolicy::Summarize);

        assert_eq!(coord.enqueue("k", s.clone(), msg("a")).await, Admission::Debounced);
        assert_eq!(coord.enqueue("k", s.clone(), msg("b")).await, Admission::Debounced);
        assert_eq!(coord.enqueue("k", s.clone(), msg("c")).await, Admission::Started);
        tick().await;
        assert_eq!(coord.enqueue("k", s, msg("d")).await, Admission::Queued);

        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a", "b", "c"], vec!["d"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_timer_starts_partial_batch() {
        let rec = Recorder::holding(10);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Followup, 50, 3, DropPolicy::Summarize);

        coord.enqueue("k", s.clone(), msg("a")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        coord.enqueue("k", s, msg("b")).await;
        assert!(coord.snapshot("k").unwrap().debounce_armed);
        assert!(rec.runs().is_empty());

        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a", "b"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_mode_runs_one_message_at_a_time() {
        let rec = Recorder::holding(20);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Queue, 0, 20, DropPolicy::Summarize);

        assert_eq!(coord.enqueue("k", s.clone(), msg("m0")).await, Admission::Started);
        for body in ["m1", "m2", "m3"] {
            assert_eq!(coord.enqueue("k", s.clone(), msg(body)).await, Admission::Queued);
        }

        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["m0"], vec!["m1"], vec!["m2"], vec!["m3"]]);
        assert_eq!(rec.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn followup_consumes_backlog_in_one_run() {
        let rec = Recorder::holding(20);
        let coord = RunCoordinator::new(rec.clone(), 4);

        coord.enqueue("k", followup(), msg("a")).await;
        coord.enqueue("k", followup(), msg("b")).await;
        coord.enqueue("k", followup(), msg("c")).await;

        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a"], vec!["b", "c"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn steer_injects_into_live_run() {
        let rec = Recorder::holding(50);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Steer, 0, 20, DropPolicy::Summarize);

        coord.enqueue("k", s.clone(), msg("a")).await;
        tick().await;
        assert_eq!(coord.enqueue("k", s, msg("b")).await, Admission::Steered);

        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a"]]);
        assert_eq!(*rec.steered.lock().unwrap(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn steer_while_admitting_falls_back_to_queue() {
        let rec = Recorder::holding(50);
        let coord = RunCoordinator::new(rec.clone(), 1);
        let s = settings(QueueMode::Steer, 0, 20, DropPolicy::Summarize);

        coord.enqueue("busy", followup(), msg("x")).await;
        tick().await;
        coord.enqueue("k", s.clone(), msg("a")).await;
        tick().await;
        assert_eq!(coord.snapshot("k").unwrap().state, LaneState::Admitting);
        assert_eq!(coord.enqueue("k", s, msg("b")).await, Admission::Queued);

        coord.wait_idle("busy").await;
        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["x"], vec!["a"], vec!["b"]]);
        assert!(rec.steered.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn steer_backlog_steers_and_keeps_a_copy() {
        let rec = Recorder::holding(50);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::SteerBacklog, 200, 20, DropPolicy::Summarize);

        coord.enqueue("k", followup(), msg("a")).await;
        tick().await;
        assert_eq!(coord.enqueue("k", s, msg("b")).await, Admission::SteeredAndQueued);

        coord.wait_idle("k").await;
        assert_eq!(*rec.steered.lock().unwrap(), vec!["b"]);
        assert_eq!(rec.runs(), vec![vec!["a"], vec!["b"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_cancels_then_restarts() {
        let rec = Recorder::holding(1_000);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Interrupt, 0, 20, DropPolicy::Summarize);

        coord.enqueue("k", s.clone(), msg("a")).await;
        tick().await;
        assert_eq!(coord.enqueue("k", s, msg("b")).await, Admission::Interrupted);
        assert_eq!(rec.cancelled.load(Ordering::SeqCst), 1);

        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a"], vec!["b"]]);
        assert_eq!(rec.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_waits_out_the_window_after_completion() {
        let rec = Recorder::holding(100);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Collect, 50, 20, DropPolicy::Summarize);

        assert_eq!(coord.enqueue("k", s.clone(), msg("a")).await, Admission::Debounced);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(coord.enqueue("k", s.clone(), msg("b")).await, Admission::Queued);

        // First run ends at 150ms; the collect window is open until 200ms.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snap = coord.snapshot("k").unwrap();
        assert_eq!(snap.state, LaneState::Idle);
        assert_eq!(snap.pending, 1);
        assert!(snap.debounce_armed);
        assert_eq!(coord.enqueue("k", s, msg("c")).await, Admission::Debounced);

        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a"], vec!["b", "c"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_pending_for_next_inbound() {
        let rec = Recorder::holding(20);
        rec.fail_next.store(true, Ordering::SeqCst);
        let coord = RunCoordinator::new(rec.clone(), 4);

        coord.enqueue("k", followup(), msg("a")).await;
        tick().await;
        coord.enqueue("k", followup(), msg("b")).await;
        coord.wait_idle("k").await;

        assert_eq!(rec.failures.load(Ordering::SeqCst), 1);
        assert_eq!(rec.runs(), vec![vec!["a"]]);
        let snap = coord.snapshot("k").unwrap();
        assert_eq!(snap.state, LaneState::Idle);
        assert_eq!(snap.pending, 1);

        assert_eq!(coord.enqueue("k", followup(), msg("c")).await, Admission::Started);
        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a"], vec!["b", "c"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_old_discards_earliest() {
        let rec = Recorder::holding(50);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Followup, 0, 2, DropPolicy::Old);

        coord.enqueue("k", s.clone(), msg("a")).await;
        for body in ["b", "c", "d"] {
            assert_eq!(coord.enqueue("k", s.clone(), msg(body)).await, Admission::Queued);
        }
        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a"], vec!["c", "d"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_new_rejects_incoming() {
        let rec = Recorder::holding(50);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Followup, 0, 2, DropPolicy::New);

        coord.enqueue("k", s.clone(), msg("a")).await;
        coord.enqueue("k", s.clone(), msg("b")).await;
        coord.enqueue("k", s.clone(), msg("c")).await;
        assert_eq!(coord.enqueue("k", s, msg("d")).await, Admission::Dropped);
        coord.wait_idle("k").await;
        assert_eq!(rec.runs(), vec![vec!["a"], vec!["b", "c"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_summarize_collapses_backlog() {
        let rec = Recorder::holding(50);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let s = settings(QueueMode::Followup, 0, 2, DropPolicy::Summarize);

        coord.enqueue("k", s.clone(), msg("a")).await;
        coord.enqueue("k", s.clone(), msg("b")).await;
        coord.enqueue("k", s.clone(), msg("c")).await;
        assert_eq!(coord.enqueue("k", s, msg("d")).await, Admission::Queued);
        coord.wait_idle("k").await;

        let runs = rec.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(
            runs[1][0],
            "[Queued messages while agent was busy]\n(2 messages)\n- user: b\n- user: c"
        );
        assert_eq!(runs[1][1], "d");
    }

    #[tokio::test(start_paused = true)]
    async fn global_cap_admits_in_arrival_order() {
        let rec = Recorder::holding(20);
        let coord = RunCoordinator::new(rec.clone(), 1);

        coord.enqueue("s1", followup(), msg("s1-a")).await;
        tick().await;
        coord.enqueue("s2", followup(), msg("s2-a")).await;
        coord.enqueue("s3", followup(), msg("s3-a")).await;
        // s1 keeps its slot for the followup run.
        coord.enqueue("s1", followup(), msg("s1-b")).await;

        for key in ["s1", "s2", "s3"] {
            coord.wait_idle(key).await;
        }
        assert_eq!(rec.runs(), vec![
            vec!["s1-a"],
            vec!["s1-b"],
            vec!["s2-a"],
            vec!["s3-a"]
        ]);
        assert_eq!(rec.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_pending_and_waits() {
        let rec = Recorder::holding(1_000);
        let coord = RunCoordinator::new(rec.clone(), 4);

        coord.enqueue("k", followup(), msg("a")).await;
        coord.enqueue("k", followup(), msg("b")).await;
        tick().await;
        assert!(coord.is_active("k"));

        assert!(coord.cancel("k", true).await);
        assert!(!coord.is_active("k"));
        assert!(coord.snapshot("k").is_none());
        assert_eq!(rec.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(rec.runs(), vec![vec!["a"]]);

        assert!(!coord.cancel("k", true).await);
        assert!(!coord.cancel("missing", false).await);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_lane_forgets_state() {
        let rec = Recorder::holding(100);
        let coord = RunCoordinator::new(rec.clone(), 4);
        coord.enqueue("k", followup(), msg("a")).await;
        tick().await;
        assert!(coord.remove_lane("k"));
        assert!(coord.snapshot("k").is_none());
        assert!(!coord.remove_lane("k"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rec.runs(), vec![vec!["a"]]);
        assert!(coord.snapshot("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn settled_lanes_are_dropped() {
        let rec = Recorder::holding(10);
        let coord = RunCoordinator::new(rec.clone(), 4);
        let debounced = settings(QueueMode::Followup, 30, 20, DropPolicy::Summarize);

        for i in 0..50 {
            let key = format!("k{i}");
            coord.enqueue(&key, followup(), msg("a")).await;
            coord.enqueue(&key, followup(), msg("b")).await;
        }
        coord.enqueue("debounced", debounced, msg("x")).await;
        assert!(coord.snapshot("debounced").unwrap().debounce_armed);

        for i in 0..50 {
            coord.wait_idle(&format!("k{i}")).await;
        }
        coord.wait_idle("debounced").await;

        assert_eq!(rec.runs().len(), 101);
        assert!(coord.snapshot("k0").is_none());
        assert!(coord.inner.lock_lanes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_keeps_lane_with_backlog() {
        let rec = Recorder::holding(20);
        rec.fail_next.store(true, Ordering::SeqCst);
        let coord = RunCoordinator::new(rec.clone(), 4);

        coord.enqueue("k", followup(), msg("a")).await;
        tick().await;
        coord.enqueue("k", followup(), msg("b")).await;
        coord.wait_idle("k").await;
        assert_eq!(coord.inner.lock_lanes().len(), 1);

        assert!(!coord.cancel("k", true).await);
        assert!(coord.inner.lock_lanes().is_empty());
    }

    #[test]
    fn session_overrides_beat_surface_and_global() {
        let mut config = QueueConfig {
            mode: QueueMode::Followup,
            debounce_ms: 10,
            ..Default::default()
        };
        config.by_surface.insert("telegram".into(), QueueMode::Steer);

        let global = QueueSettings::resolve(&config, Some("signal"), None);
        assert_eq!(global.mode, QueueMode::Followup);

        let surface = QueueSettings::resolve(&config, Some("Telegram"), None);
        assert_eq!(surface.mode, QueueMode::Steer);

        let entry = SessionEntry {
            queue_mode: Some(QueueMode::Interrupt),
            queue_debounce_ms: Some(0),
            queue_cap: Some(5),
            ..Default::default()
        };
        let session = QueueSettings::resolve(&config, Some("telegram"), Some(&entry));
        assert_eq!(session.mode, QueueMode::Interrupt);
        assert_eq!(session.debounce_ms, 0);
        assert_eq!(session.cap, 5);
        assert_eq!(session.drop, DropPolicy::Summarize);
    }

    #[test]
    fn batch_rendering() {
        assert_eq!(render_batch(&[msg("hi")]), "hi");
        let batch = [QueuedMessage::text("ann", "one"), QueuedMessage::text("bob", "two")];
        assert_eq!(render_batch(&batch), "ann: one\nbob: two");
    }

    #[test]
    fn summaries_flatten() {
        let first = QueuedMessage::summarize(vec![msg("a"), msg("b")]);
        let second = QueuedMessage::summarize(vec![first, msg("c")]);
        assert!(second.is_summary());
        assert!(second.body.contains("(3 messages)"));
        assert!(second.body.ends_with("- user: a\n- user: b\n- user: c"));
    }
}
