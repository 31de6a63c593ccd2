use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    switchboard_common::time::now_ms,
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, labels, sessions as session_metrics};

use crate::{
    entry::{SessionEntry, SessionPatch},
    error::{Context, Result},
    key::SessionKind,
    lifecycle::{InboundMeta, ResetPolicy, ResetReason, ResolvedSession},
    migrate::{Notices, migrate_keys},
};

/// Session key → entry, ordered so the document diffs cleanly.
pub type SessionMap = BTreeMap<String, SessionEntry>;

pub const STORE_FILENAME: &str = "sessions.json";

/// Entries that did not parse, written back verbatim so hand edits survive.
type Unparsed = serde_json::Map<String, serde_json::Value>;

/// Read-modify-write attempts before accepting last-writer-wins.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Filters for [`SessionStore::list`].
#[derive(Debug, Clone, Default)]
pub struct SessionListFilter {
    pub include_global: bool,
    pub include_unknown: bool,
    /// Only entries updated within this many minutes.
    pub active_minutes: Option<u64>,
    pub limit: Option<usize>,
}

/// One listed session.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub key: String,
    pub kind: &'static str,
    pub entry: SessionEntry,
}

impl SessionRow {
    /// Entry fields plus `key`, `kind` and an always-present `totalTokens`.
    pub fn to_value(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.entry).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("key".into(), self.key.clone().into());
            obj.insert("kind".into(), self.kind.into());
            obj.insert("totalTokens".into(), self.entry.total_tokens().into());
        }
        value
    }
}

/// Single-document session store.
///
/// The whole map is rewritten through a temp file + rename on every change.
/// Writers in this process are serialized; writers in other processes are
/// detected by re-reading the file before the rename.
#[derive(Clone)]
pub struct SessionStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    notices: Arc<Notices>,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
            notices: Arc::new(Notices::default()),
        }
    }

    /// Store at `<dir>/sessions.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORE_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every entry. Missing or unreadable documents yield an empty map.
    pub async fn load(&self) -> SessionMap {
        match self.snapshot().await {
            Ok((_, map, _)) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read session store");
                SessionMap::new()
            },
        }
    }

    pub async fn get(&self, key: &str) -> Option<SessionEntry> {
        self.load().await.remove(key)
    }

    /// Replace the whole document.
    pub async fn save(&self, map: &SessionMap) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (_, _, unparsed) = self.snapshot().await?;
        let bytes = encode_document(map, &unparsed)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await?
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        #[cfg(feature = "metrics")]
        counter!(session_metrics::STORE_WRITES_TOTAL).increment(1);
        Ok(())
    }

    /// Read-modify-write of the whole map.
    ///
    /// `f` may run more than once: if the file changed between our read and
    /// our write, the cycle restarts from the fresh contents. An `Err` from
    /// `f` aborts without writing.
    pub async fn update<R, F>(&self, mut f: F) -> Result<R>
    where
        F: FnMut(&mut SessionMap) -> Result<R> + Send,
        R: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (raw, mut map, unparsed) = self.snapshot().await?;
            let out = f(&mut map)?;
            let bytes = encode_document(&map, &unparsed)?;
            let path = self.path.clone();
            let force = attempt >= MAX_WRITE_ATTEMPTS;
            let committed = tokio::task::spawn_blocking(move || -> std::io::Result<bool> {
                if !force && read_bytes(&path)? != raw {
                    return Ok(false);
                }
                write_atomic(&path, &bytes)?;
                Ok(true)
            })
            .await?
            .with_context(|| format!("failed to write {}", self.path.display()))?;

            if committed {
                if force && attempt > 1 {
                    warn!(path = %self.path.display(), attempt, "session store kept changing, last write wins");
                }
                #[cfg(feature = "metrics")]
                counter!(session_metrics::STORE_WRITES_TOTAL).increment(1);
                return Ok(out);
            }
            debug!(path = %self.path.display(), attempt, "session store changed underneath, retrying");
            #[cfg(feature = "metrics")]
            counter!(session_metrics::STORE_WRITE_CONFLICTS_TOTAL).increment(1);
        }
    }

    /// Record the last successful outbound route.
    pub async fn update_last_route(
        &self,
        key: &str,
        channel: &str,
        to: &str,
    ) -> Result<SessionEntry> {
        let now = now_ms();
        self.update(|map| {
            let entry = map.entry(key.to_string()).or_default();
            entry.last_channel = Some(channel.to_string());
            entry.last_to = Some(to.to_string());
            entry.touch(now);
            Ok(entry.clone())
        })
        .await
    }

    /// Validate and apply a patch. The store is untouched when validation fails.
    pub async fn patch(&self, key: &str, patch: &SessionPatch) -> Result<SessionEntry> {
        let now = now_ms();
        self.update(|map| {
            let mut entry = map.get(key).cloned().unwrap_or_default();
            patch.apply(&mut entry)?;
            entry.touch(now);
            map.insert(key.to_string(), entry.clone());
            Ok(entry)
        })
        .await
    }

    /// Issue a new session id, keeping metadata and preferences.
    pub async fn reset(&self, key: &str) -> Result<SessionEntry> {
        let now = now_ms();
        let entry = self
            .update(|map| {
                let entry = map.entry(key.to_string()).or_default();
                entry.reset(now);
                Ok(entry.clone())
            })
            .await?;
        #[cfg(feature = "metrics")]
        counter!(session_metrics::RESETS_TOTAL, labels::REASON => "explicit").increment(1);
        Ok(entry)
    }

    pub async fn remove(&self, key: &str) -> Result<Option<SessionEntry>> {
        self.update(|map| Ok(map.remove(key))).await
    }

    /// Add token usage from a finished run.
    pub async fn record_usage(&self, key: &str, input: u64, output: u64) -> Result<()> {
        let now = now_ms();
        self.update(|map| {
            if let Some(entry) = map.get_mut(key) {
                entry.add_usage(input, output);
                entry.touch(now);
            }
            Ok(())
        })
        .await
    }

    pub async fn set_aborted(&self, key: &str, aborted: bool) -> Result<()> {
        self.update(|map| {
            if let Some(entry) = map.get_mut(key) {
                entry.aborted_last_run = aborted;
            }
            Ok(())
        })
        .await
    }

    /// Find or create the session for an inbound message, applying idle
    /// expiry and reset triggers.
    ///
    /// When `key` is absent but `legacy_key` holds an entry, that entry is
    /// moved to `key` in the same write.
    pub async fn resolve_for_inbound(
        &self,
        key: &str,
        legacy_key: Option<&str>,
        body: &str,
        meta: &InboundMeta,
        policy: &ResetPolicy,
        now: u64,
    ) -> Result<ResolvedSession> {
        let trigger = policy.match_trigger(body);
        let legacy_key = legacy_key.filter(|legacy| *legacy != key);
        let resolved = self
            .update(|map| {
                let mut adopted_from = None;
                let existing = match map.get(key) {
                    Some(entry) => Some(entry.clone()),
                    None => legacy_key.and_then(|legacy| {
                        let entry = map.remove(legacy)?;
                        adopted_from = Some(legacy.to_string());
                        Some(entry)
                    }),
                };
                let (mut entry, is_new) = match existing {
                    Some(entry) => (entry, false),
                    None => {
                        let mut entry = SessionEntry::new();
                        entry.updated_at = now;
                        (entry, true)
                    },
                };
                let reset = if is_new {
                    None
                } else if trigger.is_some() {
                    Some(ResetReason::Trigger)
                } else if policy.is_expired(&entry, now) {
                    Some(ResetReason::Idle)
                } else {
                    None
                };
                if reset.is_some() {
                    entry.reset(now);
                }
                meta.apply(&mut entry);
                entry.touch(now);
                map.insert(key.to_string(), entry.clone());
                Ok(ResolvedSession {
                    entry,
                    is_new,
                    reset,
                    adopted_from,
                    body: trigger.clone().unwrap_or_else(|| body.to_string()),
                })
            })
            .await?;

        if let Some(legacy) = &resolved.adopted_from {
            debug!(session_key = key, legacy_key = %legacy, "session moved from legacy key");
        }
        if resolved.is_new {
            debug!(session_key = key, session_id = %resolved.entry.session_id, "session created");
            #[cfg(feature = "metrics")]
            counter!(session_metrics::CREATED_TOTAL).increment(1);
        }
        if let Some(reason) = resolved.reset {
            debug!(session_key = key, reason = reason.as_str(), "session reset");
            #[cfg(feature = "metrics")]
            counter!(session_metrics::RESETS_TOTAL, labels::REASON => reason.as_str()).increment(1);
        }
        Ok(resolved)
    }

    /// Entries sorted by `updatedAt` descending.
    pub async fn list(&self, filter: &SessionListFilter) -> Vec<SessionRow> {
        let now = now_ms();
        let cutoff = filter
            .active_minutes
            .map(|m| now.saturating_sub(m.saturating_mul(60_000)));
        let mut rows: Vec<SessionRow> = self
            .load()
            .await
            .into_iter()
            .filter_map(|(key, entry)| {
                let kind = SessionKind::classify(&key, entry.chat_type);
                match kind {
                    SessionKind::Global if !filter.include_global => return None,
                    SessionKind::Unknown if !filter.include_unknown => return None,
                    _ => {},
                }
                if cutoff.is_some_and(|c| entry.updated_at < c) {
                    return None;
                }
                Some(SessionRow {
                    kind: kind.as_str(),
                    key,
                    entry,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.entry
                .updated_at
                .cmp(&a.entry.updated_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        rows
    }

    /// Raw bytes (for the optimistic check), the parsed and migrated map, and
    /// the entries that failed to parse.
    async fn snapshot(&self) -> Result<(Option<Vec<u8>>, SessionMap, Unparsed)> {
        let path = self.path.clone();
        let raw = tokio::task::spawn_blocking(move || read_bytes(&path)).await??;
        let (map, unparsed) = match &raw {
            Some(bytes) => self.parse_document(bytes),
            None => (SessionMap::new(), Unparsed::new()),
        };
        Ok((raw, map, unparsed))
    }

    fn parse_document(&self, bytes: &[u8]) -> (SessionMap, Unparsed) {
        let text = String::from_utf8_lossy(bytes);
        if text.trim().is_empty() {
            return (SessionMap::new(), Unparsed::new());
        }
        let doc: serde_json::Value = match json5::from_str(&text) {
            Ok(doc) => doc,
            Err(e) => {
                if self.notices.first("corrupt-store") {
                    warn!(path = %self.path.display(), error = %e, "session store is not valid JSON, treating as empty");
                }
                return (SessionMap::new(), Unparsed::new());
            },
        };
        let serde_json::Value::Object(entries) = doc else {
            if self.notices.first("corrupt-store") {
                warn!(path = %self.path.display(), "session store is not an object, treating as empty");
            }
            return (SessionMap::new(), Unparsed::new());
        };

        let mut map = SessionMap::new();
        let mut unparsed = Unparsed::new();
        for (key, value) in entries {
            if key.trim().is_empty() {
                continue;
            }
            match serde_json::from_value::<SessionEntry>(value.clone()) {
                Ok(entry) => {
                    map.insert(key, entry);
                },
                Err(e) => {
                    if self.notices.first(&format!("bad-entry:{key}")) {
                        warn!(session_key = %key, error = %e, "keeping malformed session entry as-is");
                    }
                    unparsed.insert(key, value);
                },
            }
        }

        let (map, rewrites) = migrate_keys(map);
        if !rewrites.is_empty() {
            self.notices.report(&rewrites);
            #[cfg(feature = "metrics")]
            counter!(session_metrics::KEYS_MIGRATED_TOTAL).increment(rewrites.len() as u64);
        }
        (map, unparsed)
    }
}

/// Serialize `map`, carrying over unparsed entries whose key it does not use.
fn encode_document(map: &SessionMap, unparsed: &Unparsed) -> Result<Vec<u8>> {
    let mut doc = match serde_json::to_value(map)? {
        serde_json::Value::Object(doc) => doc,
        _ => Unparsed::new(),
    };
    for (key, value) in unparsed {
        if !doc.contains_key(key) {
            doc.insert(key.clone(), value.clone());
        }
    }
    Ok(serde_json::to_vec_pretty(&doc)?)
}

fn read_bytes(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write via a uniquely named temp file in the same directory, then rename.
/// If the directory has vanished, recreate it and write the target directly.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| STORE_FILENAME.to_string());
    let tmp = dir.join(format!(
        ".{name}.{}.{}.tmp",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));

    match fs::write(&tmp, bytes) {
        Ok(()) => {},
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(dir)?;
            return fs::write(path, bytes);
        },
        Err(e) => return Err(e),
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
