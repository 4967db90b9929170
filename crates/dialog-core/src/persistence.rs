//! Persistence & Revival (component H).
//!
//! Disk layout rooted at a configured store root (§6: `.dialogs/run/`):
//! one directory per dialog, keyed by `selfId`, holding `meta.json`,
//! `reminders.json`, `pending-summaries.json`, `registry.yaml` (root only),
//! and `round-<N>.jsonl` event logs. Subdialogs are siblings of their root,
//! not nested underneath it, distinguished only by `meta.json.parent_id`.
//!
//! Grounded on `sa-sessions::store::SessionStore::new`'s load-or-init-on-open
//! pattern for the meta/registry files, and on
//! `sa-gateway::runtime::runs::RunStore::load_recent`'s tolerant-parse-and-skip
//! loop for revival enumeration (a directory with an unreadable or corrupt
//! `meta.json` is logged and skipped, never a hard error for the whole scan).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialog::{CallType, Dialog, OriginRole, PendingSummary, RootDialog, SubDialog};
use crate::error::{Error, Result};
use crate::id::DialogId;
use crate::journal::Journal;
use crate::mutex::{MutexEntry, SubdialogMutex};
use crate::reminders::{Reminder, ReminderStore};
use crate::state::RunState;

/// `meta.json` contents for one dialog (root or sub).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogMeta {
    pub root_id: String,
    pub self_id: String,
    pub agent_id: String,
    pub task_doc_path: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// `selfId` of the parent root, present iff this dialog is a SubDialog.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub origin_role: Option<OriginRole>,
    #[serde(default)]
    pub origin_member_id: Option<String>,
    #[serde(default)]
    pub caller_dialog_id: Option<DialogId>,
    #[serde(default)]
    pub call_id: Option<String>,
    pub round: u64,
    pub run_state: RunState,
    #[serde(default)]
    pub diligence_push_max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Incomplete,
    Complete,
    Failed,
}

/// §4.H revival return shape: `{rootDialog, subdialogs, summary}`.
pub struct RevivedRoot {
    pub root: Arc<RootDialog>,
    pub subdialogs: HashMap<String, Arc<SubDialog>>,
    pub total_messages: usize,
    pub total_rounds: u64,
    pub completion_status: CompletionStatus,
}

/// Disk-backed store for dialog state, rooted at `store_root`
/// (`.dialogs/run/` by convention, §6).
pub struct Persistence {
    store_root: PathBuf,
}

impl Persistence {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
        }
    }

    pub fn dialog_dir(&self, self_id: &str) -> PathBuf {
        self.store_root.join(self_id)
    }

    pub fn journal_for(&self, self_id: &str) -> Journal {
        Journal::new(self.dialog_dir(self_id))
    }

    pub fn reminder_store(&self, self_id: &str) -> ReminderStore {
        ReminderStore::new(self.dialog_dir(self_id))
    }

    fn meta_path(&self, self_id: &str) -> PathBuf {
        self.dialog_dir(self_id).join("meta.json")
    }

    fn registry_path(&self, self_id: &str) -> PathBuf {
        self.dialog_dir(self_id).join("registry.yaml")
    }

    fn pending_summaries_path(&self, self_id: &str) -> PathBuf {
        self.dialog_dir(self_id).join("pending-summaries.json")
    }

    /// Write `path` via the write-to-temp-then-rename idiom (§4.H ambient
    /// note): never a direct truncate-and-write, so a crash mid-write
    /// leaves either the old file or the new one, never a half-written one.
    fn atomic_write(path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
        ));
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn save_meta(&self, meta: &DialogMeta) -> Result<()> {
        let json = serde_json::to_string_pretty(meta)?;
        Self::atomic_write(&self.meta_path(&meta.self_id), &json)?;
        Ok(())
    }

    pub fn load_meta(&self, self_id: &str) -> Result<Option<DialogMeta>> {
        let path = self.meta_path(self_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save_registry(&self, self_id: &str, mutex: &SubdialogMutex) -> Result<()> {
        let entries = mutex.get_all();
        let yaml = serde_yaml::to_string(&entries)?;
        Self::atomic_write(&self.registry_path(self_id), &yaml)?;
        Ok(())
    }

    pub fn load_registry(&self, self_id: &str) -> Result<SubdialogMutex> {
        let path = self.registry_path(self_id);
        if !path.exists() {
            return Ok(SubdialogMutex::new());
        }
        let raw = fs::read_to_string(&path)?;
        let entries: Vec<MutexEntry> = serde_yaml::from_str(&raw)?;
        Ok(SubdialogMutex::from_entries(entries))
    }

    pub fn save_pending_summaries(&self, self_id: &str, summaries: &[PendingSummary]) -> Result<()> {
        let json = serde_json::to_string_pretty(summaries)?;
        Self::atomic_write(&self.pending_summaries_path(self_id), &json)?;
        Ok(())
    }

    pub fn load_pending_summaries(&self, self_id: &str) -> Result<Vec<PendingSummary>> {
        let path = self.pending_summaries_path(self_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist a freshly-created root dialog's `meta.json` (registry and
    /// pending-summaries start empty, written lazily on first mutation).
    pub fn persist_new_root(&self, root: &RootDialog) -> Result<()> {
        let now = Utc::now();
        self.save_meta(&DialogMeta {
            root_id: root.base.id.root_id.clone(),
            self_id: root.base.id.self_id.clone(),
            agent_id: root.base.agent_id.clone(),
            task_doc_path: root.base.task_doc_path.clone(),
            created_at: now,
            last_modified: now,
            parent_id: None,
            topic_id: None,
            origin_role: None,
            origin_member_id: None,
            caller_dialog_id: None,
            call_id: None,
            round: root.base.round(),
            run_state: root.base.run_state(),
            diligence_push_max: root.remaining_budget(),
        })
    }

    /// Persist a freshly-created child dialog's `meta.json` (invariant 1:
    /// `parent_id` always names a root whose `selfId == rootId`).
    pub fn persist_new_child(&self, child: &SubDialog) -> Result<()> {
        let parent = child
            .supdialog()
            .ok_or_else(|| Error::InvariantViolation(format!("{} has no live parent to persist under", child.base.id)))?;
        let now = Utc::now();
        self.save_meta(&DialogMeta {
            root_id: child.base.id.root_id.clone(),
            self_id: child.base.id.self_id.clone(),
            agent_id: child.base.agent_id.clone(),
            task_doc_path: child.base.task_doc_path.clone(),
            created_at: now,
            last_modified: now,
            parent_id: Some(parent.base.id.self_id.clone()),
            topic_id: child.topic_id.clone(),
            origin_role: Some(child.origin_role),
            origin_member_id: child.origin_member_id.clone(),
            caller_dialog_id: child.caller_dialog_id.clone(),
            call_id: child.call_id.clone(),
            round: child.base.round(),
            run_state: child.base.run_state(),
            diligence_push_max: 0,
        })
    }

    /// Re-save a dialog's `meta.json` to reflect its current round/state
    /// (called after each driving step so `lastModified` and `runState`
    /// on disk never lag the in-memory dialog for long).
    pub fn touch_meta(&self, dialog: &impl Dialog, parent_self_id: Option<&str>) -> Result<()> {
        let existing = self.load_meta(dialog.id().self_id.as_str())?;
        let created_at = existing.as_ref().map(|m| m.created_at).unwrap_or_else(Utc::now);
        let (topic_id, origin_role, origin_member_id, caller_dialog_id, call_id) = existing
            .map(|m| (m.topic_id, m.origin_role, m.origin_member_id, m.caller_dialog_id, m.call_id))
            .unwrap_or((None, None, None, None, None));
        self.save_meta(&DialogMeta {
            root_id: dialog.id().root_id.clone(),
            self_id: dialog.id().self_id.clone(),
            agent_id: dialog.agent_id().to_owned(),
            task_doc_path: dialog.base().task_doc_path.clone(),
            created_at,
            last_modified: Utc::now(),
            parent_id: parent_self_id.map(|s| s.to_owned()),
            topic_id,
            origin_role,
            origin_member_id,
            caller_dialog_id,
            call_id,
            round: dialog.round(),
            run_state: dialog.run_state(),
            diligence_push_max: 0,
        })
    }

    /// Enumerate every dialog directory under the store root and revive
    /// each root dialog tree (§4.H revival algorithm, steps 1-3). A
    /// directory whose `meta.json` is missing or unreadable is logged and
    /// skipped rather than aborting the whole scan.
    pub fn revive_all(&self) -> Result<Vec<RevivedRoot>> {
        if !self.store_root.exists() {
            return Ok(Vec::new());
        }
        let mut metas: HashMap<String, DialogMeta> = HashMap::new();
        for entry in fs::read_dir(&self.store_root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let self_id = entry.file_name().to_string_lossy().into_owned();
            match self.load_meta(&self_id) {
                Ok(Some(meta)) => {
                    metas.insert(self_id, meta);
                }
                Ok(None) => {
                    tracing::warn!(self_id, "dialog directory has no meta.json; skipping");
                }
                Err(e) => {
                    tracing::warn!(self_id, error = %e, "failed to load meta.json; skipping");
                }
            }
        }

        let mut revived = Vec::new();
        let root_ids: Vec<String> = metas
            .values()
            .filter(|m| m.parent_id.is_none())
            .map(|m| m.self_id.clone())
            .collect();

        for self_id in root_ids {
            let meta = metas.get(&self_id).expect("just collected").clone();
            match self.revive_root_from_meta(&meta, &metas) {
                Ok(r) => revived.push(r),
                Err(e) => tracing::warn!(self_id = %self_id, error = %e, "failed to revive root dialog; skipping"),
            }
        }
        Ok(revived)
    }

    /// Revive a single root dialog by `selfId` (the "open-dialog" half of
    /// §4.H's "at process start or on open-dialog").
    pub fn revive_root(&self, self_id: &str) -> Result<RevivedRoot> {
        let meta = self
            .load_meta(self_id)?
            .ok_or_else(|| Error::NotFound(DialogId { root_id: self_id.to_owned(), self_id: self_id.to_owned() }))?;
        if meta.parent_id.is_some() {
            return Err(Error::InvariantViolation(format!("{self_id} is a subdialog, not a root")));
        }
        let mut all_metas = HashMap::new();
        if self.store_root.exists() {
            for entry in fs::read_dir(&self.store_root)? {
                let entry = entry?;
                if !entry.path().is_dir() {
                    continue;
                }
                let id = entry.file_name().to_string_lossy().into_owned();
                if let Ok(Some(m)) = self.load_meta(&id) {
                    all_metas.insert(id, m);
                }
            }
        }
        self.revive_root_from_meta(&meta, &all_metas)
    }

    fn revive_root_from_meta(&self, meta: &DialogMeta, all_metas: &HashMap<String, DialogMeta>) -> Result<RevivedRoot> {
        let id = DialogId {
            root_id: meta.root_id.clone(),
            self_id: meta.self_id.clone(),
        };
        let journal = self.journal_for(&meta.self_id);
        let reminders = self.reminder_store(&meta.self_id).load()?;
        let mutex = self.load_registry(&meta.self_id)?;
        // §4.H step 4 / §9 open question (a): every driver died with the
        // process, so any entry left `locked=true` is force-unlocked on
        // this clean startup rather than trusted as still mid-flight.
        mutex.force_unlock_all();
        let pending_summaries = self.load_pending_summaries(&meta.self_id)?;

        let latest_round = journal.latest_round()?;
        let round = meta.round.max(latest_round.max(1));

        let root = RootDialog::from_revival(
            id,
            meta.task_doc_path.clone(),
            meta.agent_id.clone(),
            journal,
            round,
            meta.run_state.clone(),
            reminders,
            mutex,
            pending_summaries,
            meta.diligence_push_max.max(1),
        )?;

        let mut subdialogs = HashMap::new();
        let mut total_messages = 0usize;
        for n in 1..=latest_round.max(1) {
            if let Ok(events) = root.base.journal.read_round_events(&root.base.id, n) {
                total_messages += events.len();
            }
        }

        for (child_self_id, child_meta) in all_metas {
            if child_meta.parent_id.as_deref() != Some(meta.self_id.as_str()) {
                continue;
            }
            let child_id = DialogId {
                root_id: child_meta.root_id.clone(),
                self_id: child_self_id.clone(),
            };
            let child_journal = self.journal_for(child_self_id);
            let child_reminders = self.reminder_store(child_self_id).load()?;
            let child_round = child_meta.round.max(child_journal.latest_round()?.max(1));
            let child = SubDialog::from_revival(
                child_id,
                child_meta.task_doc_path.clone(),
                child_meta.agent_id.clone(),
                child_journal,
                child_round,
                child_meta.run_state.clone(),
                child_reminders,
                &root,
                child_meta.topic_id.clone(),
                child_meta.origin_role.unwrap_or(OriginRole::Assistant),
                child_meta.origin_member_id.clone(),
                child_meta.caller_dialog_id.clone(),
                child_meta.call_id.clone(),
            );
            root.attach_child(child.clone());
            if let Some(topic) = &child_meta.topic_id {
                root.register_child_topic(&child_meta.agent_id, topic, child_self_id);
            }
            for n in 1..=child_round {
                if let Ok(events) = child.base.journal.read_round_events(&child.base.id, n) {
                    total_messages += events.len();
                }
            }
            subdialogs.insert(child_self_id.clone(), child);
        }

        let completion_status = match meta.run_state {
            RunState::Terminal => CompletionStatus::Complete,
            RunState::Dead => CompletionStatus::Failed,
            _ => CompletionStatus::Incomplete,
        };

        Ok(RevivedRoot {
            total_rounds: round,
            completion_status,
            total_messages,
            subdialogs,
            root,
        })
    }

    /// `continueDialogWithHumanResponse` (§4.H): mark the matching Q4H
    /// answered, append the `user_prompt`/`q4h_answered` events, reset the
    /// diligence budget, and move the root back to `proceeding`. Does not
    /// itself invoke the Driver — that is the caller's job once this
    /// returns successfully.
    pub fn continue_with_human_response(&self, root: &Arc<RootDialog>, call_id: &str, answer: &str) -> Result<()> {
        let was_open = root.base.answer_question(call_id);
        if !was_open {
            tracing::warn!(call_id, "human response for a call id with no open question");
        }
        let round = root.base.round();
        let genseq = root.base.next_genseq();
        root.base.journal.append_event(
            &root.base.id,
            round,
            "q4h_answered",
            genseq,
            serde_json::json!({"call_id": call_id, "answer": answer}),
        )?;
        let genseq = root.base.next_genseq();
        root.base.journal.append_event(
            &root.base.id,
            round,
            "user_prompt",
            genseq,
            serde_json::json!({"text": answer, "in_reply_to": call_id}),
        )?;
        root.reset_budget();
        root.base.with_state(|sm| {
            if !root.base.has_open_questions() {
                sm.unblock()
            } else {
                Ok(())
            }
        }).map_err(|e| Error::WrongState(root.base.id.clone(), e.to_string()))?;
        Ok(())
    }
}
