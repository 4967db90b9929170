//! Dialog ID & Journal (component A).
//!
//! Append-only per-`(dialogId, round)` JSONL event log, tolerant of a
//! truncated tail (invariant 7) but hard-erroring on any earlier malformed
//! record (corruption). Grounded on
//! `sa-sessions::transcript::{TranscriptWriter, TranscriptLine}`'s
//! single-`write_all` append discipline and JSONL shape, adapted with a
//! per-key mutual-exclusion primitive (§5) and a deliberate divergence:
//! `transcript.rs` skips *every* malformed line on read, while this
//! journal's invariant 7 only tolerates the final one — an earlier
//! malformed record is a hard [`Error::JournalCorrupt`].

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::DialogId;

/// One journaled record. `genseq` is strictly increasing per dialog per
/// round (invariant 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub genseq: u64,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

/// Serializes concurrent appends to the same `(dialogId, round)` pair so
/// individual JSON records are never interleaved (§4.A, §5).
#[derive(Default)]
pub struct AppendLockMap {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppendLockMap {
    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Journal handle rooted at a dialog's on-disk directory.
pub struct Journal {
    dir: PathBuf,
    locks: AppendLockMap,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: AppendLockMap::default(),
        }
    }

    fn round_path(&self, round: u64) -> PathBuf {
        self.dir.join(format!("round-{round}.jsonl"))
    }

    fn lock_key(dialog_id: &DialogId, round: u64) -> String {
        format!("{}#{round}", dialog_id.key())
    }

    /// Append one event to `round-<N>.jsonl`, serialized against any other
    /// appender on the same `(dialogId, round)`.
    pub fn append_event(
        &self,
        dialog_id: &DialogId,
        round: u64,
        kind: &str,
        genseq: u64,
        payload: serde_json::Value,
    ) -> Result<()> {
        let record = JournalRecord {
            ts: Utc::now(),
            kind: kind.to_owned(),
            genseq,
            payload,
        };
        let line = serde_json::to_string(&record)?;

        let guard = self.locks.lock_for(&Self::lock_key(dialog_id, round));
        let _held = guard.lock();

        std::fs::create_dir_all(&self.dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.round_path(round))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        tracing::debug!(dialog = %dialog_id, round, kind, genseq, "journal append");
        Ok(())
    }

    /// Read back the successfully-parsed records for one round. A trailing
    /// line that fails to parse is silently discarded (invariant 7); any
    /// earlier malformed line is a hard [`Error::JournalCorrupt`].
    pub fn read_round_events(&self, dialog_id: &DialogId, round: u64) -> Result<Vec<JournalRecord>> {
        read_round_events_at(&self.round_path(round), dialog_id)
    }

    /// Highest round number with an existing journal file, or 0 if none.
    pub fn latest_round(&self) -> Result<u64> {
        latest_round_in(&self.dir)
    }
}

fn read_round_events_at(path: &Path, dialog_id: &DialogId) -> Result<Vec<JournalRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = raw.lines().collect();
    let mut out = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalRecord>(line) {
            Ok(record) => out.push(record),
            Err(e) => {
                let is_last = idx == lines.len() - 1;
                if is_last {
                    tracing::warn!(
                        dialog = %dialog_id,
                        path = %path.display(),
                        error = %e,
                        "discarding truncated trailing journal line"
                    );
                } else {
                    return Err(Error::JournalCorrupt {
                        dialog: dialog_id.clone(),
                        detail: format!("malformed record at line {} of {}: {e}", idx + 1, path.display()),
                    });
                }
            }
        }
    }
    Ok(out)
}

fn latest_round_in(dir: &Path) -> Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut max_round = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(rest) = name.strip_prefix("round-") {
            if let Some(num) = rest.strip_suffix(".jsonl") {
                if let Ok(n) = num.parse::<u64>() {
                    max_round = max_round.max(n);
                }
            }
        }
    }
    Ok(max_round)
}
