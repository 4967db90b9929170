//! The subdialog mutex (component E).
//!
//! Keyed `(agentId, topicId)` registry governing Type-B teammate call
//! resumption. Structurally grounded on
//! `sa-gateway::runtime::session_lock::SessionLockMap`'s
//! `Mutex<HashMap<String, _>>` keyed-registry shape, but the release
//! semantics diverge: the teacher's semaphore permit releases by `drop`
//! and forgets who held it, whereas an entry here is a durable record that
//! survives `unlock` so a later Type-B call with the same key resumes the
//! same `subdialogId` (invariant 4).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::id::DialogId;

/// One `(agentId, topicId)` mutex record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexEntry {
    pub agent_id: String,
    pub topic_id: String,
    pub subdialog_id: DialogId,
    pub locked: bool,
}

impl MutexEntry {
    pub fn key(&self) -> String {
        format_key(&self.agent_id, &self.topic_id)
    }
}

fn format_key(agent_id: &str, topic_id: &str) -> String {
    format!("{agent_id}!{topic_id}")
}

/// Error returned when a lock attempt races an already-locked key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("key {0} is already locked")]
pub struct AlreadyLocked(pub String);

/// The `(agentId, topicId) -> MutexEntry` table. Persisted with the root
/// dialog (`registry.yaml`) and reloaded on revival.
#[derive(Default)]
pub struct SubdialogMutex {
    entries: RwLock<HashMap<String, MutexEntry>>,
}

impl SubdialogMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted entry list (used by revival, §4.H).
    pub fn from_entries(entries: Vec<MutexEntry>) -> Self {
        let map = entries.into_iter().map(|e| (e.key(), e)).collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    /// Lock `(agentId, topicId)` for `subdialogId`.
    ///
    /// Creates a new entry if the key is unseen. If the key exists and is
    /// currently unlocked, relocks it, updating the `subdialogId` pointer
    /// to the caller's value (a caller that wants to *resume* the prior
    /// subdialog must pass the `subdialogId` it already read via
    /// [`lookup`](Self::lookup)). Fails with [`AlreadyLocked`] if the
    /// entry is already locked — callers MUST consult
    /// [`is_locked`](Self::is_locked) first (§5).
    pub fn lock(
        &self,
        agent_id: &str,
        topic_id: &str,
        subdialog_id: DialogId,
    ) -> Result<MutexEntry, AlreadyLocked> {
        let key = format_key(agent_id, topic_id);
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            if existing.locked {
                return Err(AlreadyLocked(key));
            }
        }
        let entry = MutexEntry {
            agent_id: agent_id.to_owned(),
            topic_id: topic_id.to_owned(),
            subdialog_id,
            locked: true,
        };
        entries.insert(key, entry.clone());
        tracing::debug!(agent_id, topic_id, "subdialog mutex locked");
        Ok(entry)
    }

    /// Clear the lock bit without deleting the entry, preserving the
    /// `subdialogId` pointer for a future resume.
    pub fn unlock(&self, agent_id: &str, topic_id: &str) -> bool {
        let key = format_key(agent_id, topic_id);
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&key) {
            entry.locked = false;
            tracing::debug!(agent_id, topic_id, "subdialog mutex unlocked");
            true
        } else {
            false
        }
    }

    /// Delete the entry irrespective of lock state (explicit teardown).
    pub fn remove(&self, agent_id: &str, topic_id: &str) -> bool {
        let key = format_key(agent_id, topic_id);
        self.entries.write().remove(&key).is_some()
    }

    pub fn is_locked(&self, agent_id: &str, topic_id: &str) -> bool {
        let key = format_key(agent_id, topic_id);
        self.entries
            .read()
            .get(&key)
            .map(|e| e.locked)
            .unwrap_or(false)
    }

    pub fn lookup(&self, agent_id: &str, topic_id: &str) -> Option<MutexEntry> {
        let key = format_key(agent_id, topic_id);
        self.entries.read().get(&key).cloned()
    }

    pub fn get_all(&self) -> Vec<MutexEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn get_locked(&self) -> Vec<MutexEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| e.locked)
            .cloned()
            .collect()
    }

    pub fn get_unlocked(&self) -> Vec<MutexEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| !e.locked)
            .cloned()
            .collect()
    }

    /// Force-unlock every entry. Called once on clean process startup
    /// (§9 open question (a) — resolved: a locked entry at load implies a
    /// driver was mid-flight at crash, and no driver can survive a
    /// process boundary in this single-process model).
    pub fn force_unlock_all(&self) {
        let mut entries = self.entries.write();
        for entry in entries.values_mut() {
            entry.locked = false;
        }
    }
}
