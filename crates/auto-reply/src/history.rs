//! Unanswered group messages kept as context for the next reply.
//!
//! Buffers live only in memory and are keyed by session key. A buffer is
//! cleared once a reply has been delivered for its session.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use {switchboard_common::MsgContext, switchboard_config::GroupChatConfig};

pub const HISTORY_CONTEXT_MARKER: &str = "[Chat messages since your last reply - for context]";
pub const CURRENT_MESSAGE_MARKER: &str = "[Current message - respond to this]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sender: String,
    pub body: String,
    pub timestamp: Option<u64>,
    pub message_id: Option<String>,
}

impl HistoryEntry {
    pub fn from_context(ctx: &MsgContext, body: &str) -> Self {
        Self {
            sender: ctx.sender_label().to_string(),
            body: body.to_string(),
            timestamp: ctx.timestamp,
            message_id: ctx.message_id.clone(),
        }
    }

    fn render(&self) -> String {
        let sender = match self.sender.trim() {
            "" => "unknown",
            sender => sender,
        };
        match self.message_id.as_deref() {
            Some(id) => format!("{sender}: {} [id:{id}]", self.body),
            None => format!("{sender}: {}", self.body),
        }
    }
}

/// Prefix `current` with the buffered context block, if any.
pub fn render_with_history(entries: &[HistoryEntry], current: &str) -> String {
    if entries.is_empty() {
        return current.to_string();
    }
    let mut out = String::from(HISTORY_CONTEXT_MARKER);
    for entry in entries {
        out.push('\n');
        out.push_str(&entry.render());
    }
    out.push_str("\n\n");
    out.push_str(CURRENT_MESSAGE_MARKER);
    out.push('\n');
    out.push_str(current);
    out
}

/// Capped per-session ring of recent messages.
#[derive(Debug, Default)]
pub struct HistoryBuffer {
    limit: usize,
    buffers: Mutex<HashMap<String, VecDeque<HistoryEntry>>>,
}

impl HistoryBuffer {
    /// A `limit` of 0 disables buffering.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &GroupChatConfig) -> Self {
        Self::new(config.history_limit)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn append(&self, key: &str, entry: HistoryEntry) {
        if self.limit == 0 {
            return;
        }
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        let buffer = buffers.entry(key.to_string()).or_default();
        buffer.push_back(entry);
        while buffer.len() > self.limit {
            buffer.pop_front();
        }
    }

    pub fn entries(&self, key: &str) -> Vec<HistoryEntry> {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers
            .get(key)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &str) -> usize {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers.get(key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    pub fn clear(&self, key: &str) {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers.remove(key);
    }

    pub fn render(&self, key: &str, current: &str) -> String {
        render_with_history(&self.entries(key), current)
    }
}
