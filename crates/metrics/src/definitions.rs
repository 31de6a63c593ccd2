//! Metric name and label definitions.
//!
//! Centralized so every crate records under the same names.

/// Session key resolution metrics
pub mod routing {
    /// Session keys resolved, labelled by `chat_type`
    pub const RESOLUTIONS_TOTAL: &str = "switchboard_routing_resolutions_total";
    /// Resolutions that produced a legacy alias key
    pub const LEGACY_KEYS_TOTAL: &str = "switchboard_routing_legacy_keys_total";
}

/// Session store metrics
pub mod sessions {
    /// Sessions created (first sighting of a key)
    pub const CREATED_TOTAL: &str = "switchboard_sessions_created_total";
    /// Session resets (explicit, trigger or idle expiry), labelled by `reason`
    pub const RESETS_TOTAL: &str = "switchboard_sessions_resets_total";
    /// Store document writes
    pub const STORE_WRITES_TOTAL: &str = "switchboard_sessions_store_writes_total";
    /// Writes retried after the optimistic content check failed
    pub const STORE_WRITE_CONFLICTS_TOTAL: &str =
        "switchboard_sessions_store_write_conflicts_total";
    /// Legacy keys rewritten at load time
    pub const KEYS_MIGRATED_TOTAL: &str = "switchboard_sessions_keys_migrated_total";
    /// Transcript compactions performed
    pub const COMPACTIONS_TOTAL: &str = "switchboard_sessions_compactions_total";
}

/// Inbound pipeline metrics
pub mod auto_reply {
    /// Inbound messages received, labelled by `channel`
    pub const MESSAGES_RECEIVED_TOTAL: &str = "switchboard_auto_reply_messages_received_total";
    /// Inbound messages that did not start or join a run, labelled by `reason`
    pub const MESSAGES_HELD_TOTAL: &str = "switchboard_auto_reply_messages_held_total";
}

/// Run admission and queue metrics
pub mod queue {
    /// Inbound messages handed to the coordinator, labelled by `outcome`
    pub const ADMISSIONS_TOTAL: &str = "switchboard_queue_admissions_total";
    /// Messages dropped by the overflow policy, labelled by `policy`
    pub const MESSAGES_DROPPED_TOTAL: &str = "switchboard_queue_messages_dropped_total";
    /// Number of currently running agent runs
    pub const ACTIVE_RUNS: &str = "switchboard_queue_active_runs";
    /// Agent run duration in seconds
    pub const RUN_DURATION_SECONDS: &str = "switchboard_queue_run_duration_seconds";
    /// Runs that ended with an error
    pub const RUN_FAILURES_TOTAL: &str = "switchboard_queue_run_failures_total";
    /// Runs cancelled by interrupt or the control plane
    pub const RUNS_CANCELLED_TOTAL: &str = "switchboard_queue_runs_cancelled_total";
}

/// Reply dispatch metrics
pub mod dispatch {
    /// Payloads delivered, labelled by `kind`
    pub const DELIVERIES_TOTAL: &str = "switchboard_dispatch_deliveries_total";
    /// Delivery failures, labelled by `channel`
    pub const DELIVERY_FAILURES_TOTAL: &str = "switchboard_dispatch_delivery_failures_total";
    /// Payloads skipped as empty or silent
    pub const SKIPPED_TOTAL: &str = "switchboard_dispatch_skipped_total";
}

/// Control plane metrics
pub mod control {
    /// Control-plane method calls, labelled by `method` and `success`
    pub const CALLS_TOTAL: &str = "switchboard_control_calls_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const CHAT_TYPE: &str = "chat_type";
    pub const KIND: &str = "kind";
    pub const METHOD: &str = "method";
    pub const MODE: &str = "mode";
    pub const OUTCOME: &str = "outcome";
    pub const POLICY: &str = "policy";
    pub const REASON: &str = "reason";
    pub const SUCCESS: &str = "success";
}
