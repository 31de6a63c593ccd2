use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use {
    fd_lock::RwLock,
    serde::Serialize,
    switchboard_common::time::now_ms,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, sessions as session_metrics};

use crate::error::{Error, Result};

/// Result of [`TranscriptStore::compact`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactOutcome {
    pub compacted: bool,
    pub kept: usize,
    pub removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Append-only JSONL transcripts, one file per session id.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    pub base_dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Sanitize a session id for use as a filename.
    pub fn id_to_filename(session_id: &str) -> String {
        session_id.replace([':', '/', '\\'], "_")
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl", Self::id_to_filename(session_id)))
    }

    /// Append one turn (JSON value) as a single line.
    pub async fn append(&self, session_id: &str, turn: &serde_json::Value) -> Result<()> {
        let path = self.path_for(session_id);
        let line = serde_json::to_string(turn)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut lock = RwLock::new(file);
            let mut guard = lock
                .write()
                .map_err(|e| Error::lock_failed(e.to_string()))?;
            writeln!(*guard, "{line}")?;
            Ok(())
        })
        .await?
    }

    /// Last `n` parseable turns, oldest first.
    pub async fn read_last_n(&self, session_id: &str, n: usize) -> Result<Vec<serde_json::Value>> {
        let path = self.path_for(session_id);

        tokio::task::spawn_blocking(move || -> Result<Vec<serde_json::Value>> {
            let lines = read_lines(&path)?;
            let start = lines.len().saturating_sub(n);
            Ok(lines[start..]
                .iter()
                .filter_map(|line| match serde_json::from_str(line) {
                    Ok(val) => Some(val),
                    Err(e) => {
                        warn!("skipping malformed JSONL line: {e}");
                        None
                    },
                })
                .collect())
        })
        .await?
    }

    pub async fn count(&self, session_id: &str) -> Result<usize> {
        let path = self.path_for(session_id);
        tokio::task::spawn_blocking(move || -> Result<usize> { Ok(read_lines(&path)?.len()) })
            .await?
    }

    /// Keep only the last `max_lines` lines. The full original is copied to
    /// `<name>.bak.<ts>` first; nothing happens when the file is short enough.
    ///
    /// The file is rewritten in place under its lock, so an append blocked on
    /// the same lock lands after the kept tail.
    pub async fn compact(&self, session_id: &str, max_lines: usize) -> Result<CompactOutcome> {
        let path = self.path_for(session_id);

        let outcome = tokio::task::spawn_blocking(move || -> Result<CompactOutcome> {
            let file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Ok(CompactOutcome {
                        reason: Some("no transcript".into()),
                        ..Default::default()
                    });
                },
                Err(e) => return Err(e.into()),
            };
            let mut lock = RwLock::new(file);
            let mut guard = lock
                .write()
                .map_err(|e| Error::lock_failed(e.to_string()))?;

            let lines = read_lines(&path)?;
            if lines.len() <= max_lines {
                return Ok(CompactOutcome {
                    kept: lines.len(),
                    ..Default::default()
                });
            }

            let backup = unique_sibling(&path, "bak");
            fs::copy(&path, &backup)?;
            let start = lines.len() - max_lines;
            let mut body = lines[start..].join("\n");
            body.push('\n');
            guard.set_len(0)?;
            guard.seek(SeekFrom::Start(0))?;
            guard.write_all(body.as_bytes())?;
            guard.sync_all()?;

            Ok(CompactOutcome {
                compacted: true,
                kept: max_lines,
                removed: start,
                backup: Some(backup),
                reason: None,
            })
        })
        .await??;

        if outcome.compacted {
            debug!(session_id, kept = outcome.kept, removed = outcome.removed, "transcript compacted");
            #[cfg(feature = "metrics")]
            counter!(session_metrics::COMPACTIONS_TOTAL).increment(1);
        }
        Ok(outcome)
    }

    /// Rename the transcript to `<name>.deleted.<ts>`. Returns the new path,
    /// or `None` when there was no transcript.
    pub async fn archive(&self, session_id: &str) -> Result<Option<PathBuf>> {
        let path = self.path_for(session_id);

        tokio::task::spawn_blocking(move || -> Result<Option<PathBuf>> {
            if !path.exists() {
                return Ok(None);
            }
            let target = unique_sibling(&path, "deleted");
            fs::rename(&path, &target)?;
            Ok(Some(target))
        })
        .await?
    }
}

/// Non-empty lines, trimmed. A missing file has none.
fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}

/// `<path>.<tag>.<ts>`, bumping the timestamp until the name is free.
fn unique_sibling(path: &Path, tag: &str) -> PathBuf {
    let mut ts = now_ms();
    loop {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{tag}.{ts}"));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        ts += 1;
    }
}
