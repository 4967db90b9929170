//! Dialog data model (§3): `Dialog` (abstract base), `RootDialog`,
//! `SubDialog`, `PendingSubdialog`.
//!
//! Grounded on `sa-gateway::runtime::agent::{AgentContext, AgentRuntime}`'s
//! struct-of-handles shape for threading per-agent overrides through a
//! turn, adapted to the root/sub dialog split. The cyclic-ownership note
//! of §9 is modeled exactly as prescribed: the root owns its children as
//! `Arc<SubDialog>` keyed by `selfId`; each child holds a non-owning
//! `Weak<RootDialog>` back-reference used only for lookup, never for
//! deletion cascade.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::DialogId;
use crate::journal::Journal;
use crate::mutex::SubdialogMutex;
use crate::persistence::Persistence;
use crate::reminders::Reminder;
use crate::state::{RunState, StateMachine};

/// A = self/human question, B = `@agent !topic` (mutex-tracked,
/// resumable), C = `@agent` (transient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginRole {
    User,
    Assistant,
}

/// In-memory record of a child driving while the parent awaits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSubdialog {
    pub subdialog_id: DialogId,
    pub created_at: DateTime<Utc>,
    pub head_line: String,
    pub target_agent_id: String,
    pub call_type: CallType,
}

/// A completed child's summary, queued for the parent's next driving step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSummary {
    pub subdialog_id: DialogId,
    pub summary: String,
    pub completed_at: DateTime<Utc>,
}

/// Fields and operations shared by `RootDialog` and `SubDialog` (§3's
/// "Dialog (abstract base)"). Composed by value, not inherited — Rust has
/// no struct inheritance — and exposed uniformly via the [`Dialog`] trait.
pub struct DialogBase {
    pub id: DialogId,
    pub task_doc_path: String,
    pub agent_id: String,
    round: AtomicU64,
    genseq: AtomicU64,
    state: Mutex<StateMachine>,
    reminders: RwLock<Vec<Reminder>>,
    /// Open (unanswered) Q4H questions keyed by `call_id`. A dialog is
    /// blocked on `needs_human_input` exactly while this is non-empty.
    open_questions: RwLock<HashMap<String, String>>,
    pub journal: Journal,
}

impl DialogBase {
    pub fn new(id: DialogId, task_doc_path: impl Into<String>, agent_id: impl Into<String>, journal: Journal) -> Self {
        Self {
            id,
            task_doc_path: task_doc_path.into(),
            agent_id: agent_id.into(),
            round: AtomicU64::new(1),
            genseq: AtomicU64::new(0),
            state: Mutex::new(StateMachine::new()),
            reminders: RwLock::new(Vec::new()),
            open_questions: RwLock::new(HashMap::new()),
            journal,
        }
    }

    /// Record a newly-asked Q4H as open.
    pub fn ask_question(&self, call_id: impl Into<String>, question: impl Into<String>) {
        self.open_questions.write().insert(call_id.into(), question.into());
    }

    /// Mark a Q4H answered; returns `true` if it was open.
    pub fn answer_question(&self, call_id: &str) -> bool {
        self.open_questions.write().remove(call_id).is_some()
    }

    pub fn has_open_questions(&self) -> bool {
        !self.open_questions.read().is_empty()
    }

    pub fn open_question_ids(&self) -> Vec<String> {
        self.open_questions.read().keys().cloned().collect()
    }

    pub fn round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    pub fn genseq(&self) -> u64 {
        self.genseq.load(Ordering::SeqCst)
    }

    /// Allocate the next strictly-increasing genseq for the current round
    /// (invariant 6).
    pub fn next_genseq(&self) -> u64 {
        self.genseq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Close out the current round and start the next one with a fresh
    /// genseq counter.
    pub fn advance_round(&self) -> u64 {
        self.genseq.store(0, Ordering::SeqCst);
        self.round.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn run_state(&self) -> RunState {
        self.state.lock().current().clone()
    }

    /// Run a transition (or any other mutation) against the state machine
    /// under its lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut StateMachine) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn reminders(&self) -> Vec<Reminder> {
        self.reminders.read().clone()
    }

    pub fn set_reminders(&self, reminders: Vec<Reminder>) {
        *self.reminders.write() = reminders;
    }
}

/// Shared accessors over `RootDialog`/`SubDialog`.
pub trait Dialog {
    fn base(&self) -> &DialogBase;

    fn id(&self) -> &DialogId {
        &self.base().id
    }

    fn agent_id(&self) -> &str {
        &self.base().agent_id
    }

    fn round(&self) -> u64 {
        self.base().round()
    }

    fn run_state(&self) -> RunState {
        self.base().run_state()
    }
}

/// The top-level dialog of a tree. Owns the mutex registry, pending-child
/// bookkeeping, the diligence budget, and the live child index.
pub struct RootDialog {
    pub base: DialogBase,
    pub subdialog_mutex: SubdialogMutex,
    pending_subdialogs: RwLock<HashMap<String, PendingSubdialog>>,
    pending_summaries: Mutex<Vec<PendingSummary>>,
    diligence_push_remaining_budget: AtomicU32,
    diligence_push_max: u32,
    /// Live children keyed by `selfId`.
    children: RwLock<HashMap<String, Arc<SubDialog>>>,
    /// `(agentId, topicId)` key -> child `selfId`; a live index distinct
    /// from `subdialog_mutex` (which tracks lock state, not the object).
    registered_subdialogs: RwLock<HashMap<String, String>>,
}

impl RootDialog {
    /// Build a root dialog whose journal is pre-constructed by the caller.
    /// The caller is responsible for keeping `journal` rooted at the same
    /// `selfId` the minted [`DialogId`] will carry; prefer
    /// [`create`](Self::create), which derives the journal from
    /// [`Persistence`] so that invariant can't be broken by construction.
    pub fn new(
        task_doc_path: impl Into<String>,
        agent_id: impl Into<String>,
        journal: Journal,
        diligence_push_max: u32,
    ) -> Arc<Self> {
        let id = DialogId::new_root();
        Self::new_with_id(id, task_doc_path, agent_id, journal, diligence_push_max)
    }

    /// Mint a fresh root id and derive its journal from `persistence`, so
    /// the on-disk journal directory always matches the persisted `meta.json`
    /// location used by revival (§4.H).
    pub fn create(
        persistence: &Persistence,
        task_doc_path: impl Into<String>,
        agent_id: impl Into<String>,
        diligence_push_max: u32,
    ) -> Arc<Self> {
        let id = DialogId::new_root();
        let journal = persistence.journal_for(&id.self_id);
        Self::new_with_id(id, task_doc_path, agent_id, journal, diligence_push_max)
    }

    fn new_with_id(
        id: DialogId,
        task_doc_path: impl Into<String>,
        agent_id: impl Into<String>,
        journal: Journal,
        diligence_push_max: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: DialogBase::new(id, task_doc_path, agent_id, journal),
            subdialog_mutex: SubdialogMutex::new(),
            pending_subdialogs: RwLock::new(HashMap::new()),
            pending_summaries: Mutex::new(Vec::new()),
            diligence_push_remaining_budget: AtomicU32::new(diligence_push_max),
            diligence_push_max,
            children: RwLock::new(HashMap::new()),
            registered_subdialogs: RwLock::new(HashMap::new()),
        })
    }

    /// Reconstruct a root dialog from revived state (§4.H). The returned
    /// root has no children yet — the caller wires them with
    /// [`attach_child`](Self::attach_child) after reviving each.
    #[allow(clippy::too_many_arguments)]
    pub fn from_revival(
        id: DialogId,
        task_doc_path: impl Into<String>,
        agent_id: impl Into<String>,
        journal: Journal,
        round: u64,
        state: RunState,
        reminders: Vec<Reminder>,
        mutex: SubdialogMutex,
        pending_summaries: Vec<PendingSummary>,
        diligence_push_max: u32,
    ) -> Result<Arc<Self>> {
        if !id.is_root() {
            return Err(Error::InvariantViolation(format!(
                "{id} revived as a root dialog but selfId != rootId"
            )));
        }
        let base = DialogBase::new(id, task_doc_path, agent_id, journal);
        base.round.store(round, Ordering::SeqCst);
        base.set_reminders(reminders);
        *base.state.lock() = StateMachine::from_state(state);

        Ok(Arc::new(Self {
            base,
            subdialog_mutex: mutex,
            pending_subdialogs: RwLock::new(HashMap::new()),
            pending_summaries: Mutex::new(pending_summaries),
            diligence_push_remaining_budget: AtomicU32::new(diligence_push_max),
            diligence_push_max,
            children: RwLock::new(HashMap::new()),
            registered_subdialogs: RwLock::new(HashMap::new()),
        }))
    }

    /// Create and register a new child dialog (invariant 1: shares
    /// `rootId`). `topic_id` present registers a Type-B-capable child;
    /// `None` is a transient Type-C child (invariant 5: never mutexed).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_subdialog(
        self: &Arc<Self>,
        persistence: &Persistence,
        target_agent_id: impl Into<String>,
        topic_id: Option<String>,
        origin_role: OriginRole,
        origin_member_id: Option<String>,
        caller_dialog_id: Option<DialogId>,
        call_id: Option<String>,
    ) -> Arc<SubDialog> {
        let agent_id = target_agent_id.into();
        let id = DialogId::new_child(&self.base.id.root_id);
        let journal = persistence.journal_for(&id.self_id);
        let child = Arc::new(SubDialog {
            base: DialogBase::new(id.clone(), self.base.task_doc_path.clone(), agent_id.clone(), journal),
            supdialog: Arc::downgrade(self),
            topic_id: topic_id.clone(),
            origin_role,
            origin_member_id,
            caller_dialog_id,
            call_id,
        });
        self.attach_child(child.clone());
        if let Some(topic) = topic_id {
            self.registered_subdialogs
                .write()
                .insert(format!("{agent_id}!{topic}"), id.self_id.clone());
        }
        child
    }

    /// Wire an already-constructed child into the live index (used both
    /// by `spawn_subdialog` and by revival).
    pub fn attach_child(&self, child: Arc<SubDialog>) {
        self.children.write().insert(child.base.id.self_id.clone(), child);
    }

    pub fn child(&self, self_id: &str) -> Option<Arc<SubDialog>> {
        self.children.read().get(self_id).cloned()
    }

    pub fn children(&self) -> Vec<Arc<SubDialog>> {
        self.children.read().values().cloned().collect()
    }

    /// Wire a Type-B key to an already-attached child's `selfId` (used by
    /// revival to rebuild the live index alongside the persisted mutex;
    /// distinct from the mutex itself, which only tracks lock state).
    pub fn register_child_topic(&self, agent_id: &str, topic_id: &str, self_id: &str) {
        self.registered_subdialogs
            .write()
            .insert(format!("{agent_id}!{topic_id}"), self_id.to_owned());
    }

    pub fn registered_subdialog(&self, agent_id: &str, topic_id: &str) -> Option<Arc<SubDialog>> {
        let self_id = self
            .registered_subdialogs
            .read()
            .get(&format!("{agent_id}!{topic_id}"))
            .cloned()?;
        self.child(&self_id)
    }

    pub fn add_pending(&self, pending: PendingSubdialog) {
        self.pending_subdialogs
            .write()
            .insert(pending.subdialog_id.key(), pending);
    }

    pub fn remove_pending(&self, subdialog_id: &DialogId) -> Option<PendingSubdialog> {
        self.pending_subdialogs.write().remove(&subdialog_id.key())
    }

    pub fn pending_subdialog_ids(&self) -> Vec<DialogId> {
        self.pending_subdialogs
            .read()
            .values()
            .map(|p| p.subdialog_id.clone())
            .collect()
    }

    /// Full pending records (including the head line the child should be
    /// seeded with), for a caller that's about to drive each of them.
    pub fn pending_subdialogs(&self) -> Vec<PendingSubdialog> {
        self.pending_subdialogs.read().values().cloned().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_subdialogs.read().is_empty()
    }

    /// Atomically add a completed child's summary.
    pub fn push_summary(&self, summary: PendingSummary) {
        self.pending_summaries.lock().push(summary);
    }

    /// Atomically read-and-clear all pending summaries (§4.H
    /// "Incorporation of subdialog responses").
    pub fn take_summaries(&self) -> Vec<PendingSummary> {
        std::mem::take(&mut *self.pending_summaries.lock())
    }

    pub fn peek_summaries(&self) -> Vec<PendingSummary> {
        self.pending_summaries.lock().clone()
    }

    /// Clear pending summaries without returning them (on terminal
    /// transition — §9 open question (b), resolved to clear).
    pub fn clear_summaries(&self) {
        self.pending_summaries.lock().clear();
    }

    /// Accept the task as done: transition to `terminal` and clear any
    /// unconsumed pending-child summaries in one step, so the two never
    /// drift apart (§9 open question (b)).
    pub fn accept_as_done(&self) -> Result<()> {
        self.base
            .with_state(|sm| sm.finish_terminal())
            .map_err(|e| Error::WrongState(self.base.id.clone(), e.to_string()))?;
        self.clear_summaries();
        Ok(())
    }

    pub fn remaining_budget(&self) -> u32 {
        self.diligence_push_remaining_budget.load(Ordering::SeqCst)
    }

    /// Reset to the configured max at the start of each user-initiated
    /// turn (invariant 8).
    pub fn reset_budget(&self) {
        self.diligence_push_remaining_budget
            .store(self.diligence_push_max, Ordering::SeqCst);
    }

    /// Consume one unit of budget for an auto-continue. Returns the new
    /// remaining count. Saturates at zero — callers must check
    /// `remaining_budget() > 0` before calling.
    pub fn decrement_budget(&self) -> u32 {
        let prev = self.diligence_push_remaining_budget.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |v| v.checked_sub(1),
        );
        match prev {
            Ok(before) => before - 1,
            Err(_) => 0,
        }
    }
}

impl Dialog for RootDialog {
    fn base(&self) -> &DialogBase {
        &self.base
    }
}

/// A child dialog spawned by a teammate tellask. Always two levels deep —
/// a `SubDialog` never itself owns further subdialogs (§3).
pub struct SubDialog {
    pub base: DialogBase,
    pub supdialog: Weak<RootDialog>,
    pub topic_id: Option<String>,
    pub origin_role: OriginRole,
    pub origin_member_id: Option<String>,
    pub caller_dialog_id: Option<DialogId>,
    pub call_id: Option<String>,
}

impl SubDialog {
    /// Reconstruct a child dialog from revived state (§4.H), wiring its
    /// `supdialog` back-reference to the given root. The caller still owes
    /// `root.attach_child` (and, for Type-B children, `register_child_topic`)
    /// to make the child reachable from the root's live index.
    #[allow(clippy::too_many_arguments)]
    pub fn from_revival(
        id: DialogId,
        task_doc_path: impl Into<String>,
        agent_id: impl Into<String>,
        journal: Journal,
        round: u64,
        state: RunState,
        reminders: Vec<Reminder>,
        supdialog: &Arc<RootDialog>,
        topic_id: Option<String>,
        origin_role: OriginRole,
        origin_member_id: Option<String>,
        caller_dialog_id: Option<DialogId>,
        call_id: Option<String>,
    ) -> Arc<Self> {
        let base = DialogBase::new(id, task_doc_path, agent_id, journal);
        base.round.store(round, Ordering::SeqCst);
        base.set_reminders(reminders);
        *base.state.lock() = StateMachine::from_state(state);
        Arc::new(Self {
            base,
            supdialog: Arc::downgrade(supdialog),
            topic_id,
            origin_role,
            origin_member_id,
            caller_dialog_id,
            call_id,
        })
    }

    /// `true` for Type-B (mutex-tracked, resumable) children.
    pub fn is_type_b(&self) -> bool {
        self.topic_id.is_some()
    }

    /// Look up the owning root, if it is still alive. Upgrading a `Weak`
    /// can only fail if the root was already dropped — this crate never
    /// drops a live root out from under a child, so in practice this is
    /// infallible during normal operation, but callers must still handle
    /// the `None` case (e.g. mid-teardown).
    pub fn supdialog(&self) -> Option<Arc<RootDialog>> {
        self.supdialog.upgrade()
    }

    /// Invariant 1/5 check: this child's `rootId` equals its parent's, and
    /// the parent is indeed a root (`selfId == rootId`).
    pub fn check_ownership_invariant(&self) -> Result<()> {
        let parent = self.supdialog().ok_or_else(|| {
            Error::InvariantViolation(format!("{} has no live parent", self.base.id))
        })?;
        if self.base.id.root_id != parent.base.id.root_id {
            return Err(Error::InvariantViolation(format!(
                "{} rootId does not match parent rootId {}",
                self.base.id, parent.base.id.root_id
            )));
        }
        if !parent.base.id.is_root() {
            return Err(Error::InvariantViolation(format!(
                "parent {} of {} is not itself a root",
                parent.base.id, self.base.id
            )));
        }
        Ok(())
    }
}

impl Dialog for SubDialog {
    fn base(&self) -> &DialogBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn journal_at(dir: &std::path::Path, name: &str) -> Journal {
        Journal::new(dir.join(name))
    }

    #[test]
    fn root_dialog_starts_idle_with_full_budget() {
        let dir = tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 3);
        assert_eq!(root.run_state(), RunState::IdleWaitingUser);
        assert_eq!(root.remaining_budget(), 3);
        assert!(root.id().is_root());
    }

    #[test]
    fn s5_ownership_invariant_holds_for_spawned_children() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 3);
        let child = root.spawn_subdialog(
            &persistence,
            "researcher",
            Some("survey".into()),
            OriginRole::Assistant,
            None,
            None,
            None,
        );
        assert_eq!(child.base.id.root_id, root.base.id.root_id);
        assert!(child.supdialog().unwrap().base.id.is_root());
        child.check_ownership_invariant().unwrap();
    }

    #[test]
    fn type_b_child_is_registered_by_agent_and_topic() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 3);
        let child = root.spawn_subdialog(
            &persistence,
            "researcher",
            Some("survey".into()),
            OriginRole::Assistant,
            None,
            None,
            None,
        );
        assert!(child.is_type_b());
        let found = root.registered_subdialog("researcher", "survey").unwrap();
        assert_eq!(found.base.id, child.base.id);
    }

    #[test]
    fn type_c_child_is_not_registered() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 3);
        root.spawn_subdialog(
            &persistence,
            "researcher",
            None,
            OriginRole::Assistant,
            None,
            None,
            None,
        );
        assert!(root.registered_subdialog("researcher", "anything").is_none());
    }

    #[test]
    fn pending_summaries_take_is_atomic_read_and_clear() {
        let dir = tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 3);
        root.push_summary(PendingSummary {
            subdialog_id: DialogId::new_child(&root.base.id.root_id),
            summary: "done".into(),
            completed_at: Utc::now(),
        });
        let taken = root.take_summaries();
        assert_eq!(taken.len(), 1);
        assert!(root.take_summaries().is_empty());
    }

    #[test]
    fn accept_as_done_goes_terminal_and_drops_pending_summaries() {
        let dir = tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 3);
        root.push_summary(PendingSummary {
            subdialog_id: DialogId::new_child(&root.base.id.root_id),
            summary: "done".into(),
            completed_at: Utc::now(),
        });
        root.base.with_state(|sm| sm.begin_proceeding()).unwrap();

        root.accept_as_done().unwrap();

        assert_eq!(root.run_state(), RunState::Terminal);
        assert!(root.peek_summaries().is_empty());
    }

    #[test]
    fn s6_budget_decrements_monotonically_to_zero() {
        let dir = tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 2);
        let mut seen = Vec::new();
        seen.push(root.decrement_budget());
        seen.push(root.decrement_budget());
        assert_eq!(seen, vec![1, 0]);
        // Saturates; a third decrement never goes negative.
        assert_eq!(root.decrement_budget(), 0);
    }

    #[test]
    fn budget_resets_to_configured_max() {
        let dir = tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 5);
        root.decrement_budget();
        root.decrement_budget();
        assert_eq!(root.remaining_budget(), 3);
        root.reset_budget();
        assert_eq!(root.remaining_budget(), 5);
    }

    #[test]
    fn pending_subdialog_tracking() {
        let dir = tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 3);
        let sid = DialogId::new_child(&root.base.id.root_id);
        root.add_pending(PendingSubdialog {
            subdialog_id: sid.clone(),
            created_at: Utc::now(),
            head_line: "@researcher !survey go".into(),
            target_agent_id: "researcher".into(),
            call_type: CallType::B,
        });
        assert!(root.has_pending());
        assert_eq!(root.pending_subdialog_ids(), vec![sid.clone()]);
        root.remove_pending(&sid);
        assert!(!root.has_pending());
    }

    #[test]
    fn genseq_strictly_increases_within_a_round_then_resets_on_advance() {
        let dir = tempdir().unwrap();
        let root = RootDialog::new("task.md", "cmdr", journal_at(dir.path(), "root"), 3);
        assert_eq!(root.base.next_genseq(), 1);
        assert_eq!(root.base.next_genseq(), 2);
        root.base.advance_round();
        assert_eq!(root.base.round(), 2);
        assert_eq!(root.base.next_genseq(), 1);
    }

    #[test]
    fn from_revival_rejects_non_root_id() {
        let dir = tempdir().unwrap();
        let bad_id = DialogId::new_child("some-root");
        let result = RootDialog::from_revival(
            bad_id,
            "task.md",
            "cmdr",
            journal_at(dir.path(), "root"),
            1,
            RunState::IdleWaitingUser,
            Vec::new(),
            SubdialogMutex::new(),
            Vec::new(),
            3,
        );
        assert!(result.is_err());
    }
}
