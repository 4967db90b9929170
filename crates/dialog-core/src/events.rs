//! The wire event vocabulary (component C payload, §6 of SPEC_FULL.md).
//!
//! Every event that crosses the bus is a [`DialogEvent`] variant. The bus
//! (`bus.rs`) wraps these in an [`Envelope`] carrying dialog context and a
//! timestamp before fan-out; individual components never construct an
//! `Envelope` themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::DialogId;
use crate::tellask::MentionValidation;

/// `{selfId, rootId}` context attached to every delivered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogContext {
    pub self_id: String,
    pub root_id: String,
}

impl From<&DialogId> for DialogContext {
    fn from(id: &DialogId) -> Self {
        Self {
            self_id: id.self_id.clone(),
            root_id: id.root_id.clone(),
        }
    }
}

/// Reason a dialog is `blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    NeedsHumanInput,
    WaitingForSubdialogs,
    NeedsHumanInputAndSubdialogs,
}

/// The tagged union of every event kind the core emits, per §6's exact
/// naming. Exhaustiveness at dispatch sites is enforced by the compiler
/// (no wildcard arm at any `match` over this enum in this crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DialogEvent {
    #[serde(rename = "generating_start_evt")]
    GeneratingStart,
    #[serde(rename = "generating_finish_evt")]
    GeneratingFinish,

    #[serde(rename = "thinking_start_evt")]
    ThinkingStart,
    #[serde(rename = "thinking_chunk_evt")]
    ThinkingChunk { text: String },
    #[serde(rename = "thinking_finish_evt")]
    ThinkingFinish,

    #[serde(rename = "saying_start_evt")]
    SayingStart,
    #[serde(rename = "saying_chunk_evt")]
    SayingChunk { text: String },
    #[serde(rename = "saying_finish_evt")]
    SayingFinish,

    #[serde(rename = "calling_start_evt")]
    CallingStart {
        call_id: String,
        validation: MentionValidation,
    },
    #[serde(rename = "calling_headline_chunk_evt")]
    CallingHeadlineChunk { call_id: String, text: String },
    #[serde(rename = "calling_headline_finish_evt")]
    CallingHeadlineFinish { call_id: String },
    #[serde(rename = "calling_body_start_evt")]
    CallingBodyStart { call_id: String },
    #[serde(rename = "calling_body_chunk_evt")]
    CallingBodyChunk { call_id: String, text: String },
    #[serde(rename = "calling_body_finish_evt")]
    CallingBodyFinish { call_id: String },
    #[serde(rename = "calling_finish_evt")]
    CallingFinish { call_id: String },

    #[serde(rename = "func_call_requested_evt")]
    FuncCallRequested {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    #[serde(rename = "func_result_evt")]
    FuncResult {
        call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    #[serde(rename = "markdown_start_evt")]
    MarkdownStart,
    #[serde(rename = "markdown_chunk_evt")]
    MarkdownChunk { text: String },
    #[serde(rename = "markdown_finish_evt")]
    MarkdownFinish,

    #[serde(rename = "stream_error_evt")]
    StreamError { reason: String },

    #[serde(rename = "diligence_budget_evt")]
    DiligenceBudget { remaining_count: u32 },

    #[serde(rename = "new_q4h_asked")]
    NewQ4hAsked { call_id: String, question: String },
    #[serde(rename = "q4h_answered")]
    Q4hAnswered { call_id: String, answer: String },

    #[serde(rename = "subdialog_created_evt")]
    SubdialogCreated {
        subdialog_id: DialogId,
        target_agent_id: String,
        call_type: crate::dialog::CallType,
    },
    #[serde(rename = "subdialog_done")]
    SubdialogDone { subdialog_id: DialogId, summary: String },

    #[serde(rename = "dlg_run_state_evt")]
    DlgRunState { state: String },

    #[serde(rename = "dlg_touched_evt")]
    DlgTouched { source_type: String },

    #[serde(rename = "stream_overflow_evt")]
    StreamOverflow { dropped: u64 },

    /// Journal-only record kinds from §3 that have no dedicated live-bus
    /// rendering but are still journaled as-is (e.g. `user_prompt`,
    /// `round_advance`, `reminder_update`). Carried generically so the
    /// journal (component A) never needs a variant per journal-only kind.
    #[serde(rename = "journal_record")]
    JournalRecord {
        kind: String,
        payload: serde_json::Value,
    },
}

impl DialogEvent {
    /// The bare `type` discriminant, used to build `dlg_touched_evt.source_type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            DialogEvent::GeneratingStart => "generating_start_evt",
            DialogEvent::GeneratingFinish => "generating_finish_evt",
            DialogEvent::ThinkingStart => "thinking_start_evt",
            DialogEvent::ThinkingChunk { .. } => "thinking_chunk_evt",
            DialogEvent::ThinkingFinish => "thinking_finish_evt",
            DialogEvent::SayingStart => "saying_start_evt",
            DialogEvent::SayingChunk { .. } => "saying_chunk_evt",
            DialogEvent::SayingFinish => "saying_finish_evt",
            DialogEvent::CallingStart { .. } => "calling_start_evt",
            DialogEvent::CallingHeadlineChunk { .. } => "calling_headline_chunk_evt",
            DialogEvent::CallingHeadlineFinish { .. } => "calling_headline_finish_evt",
            DialogEvent::CallingBodyStart { .. } => "calling_body_start_evt",
            DialogEvent::CallingBodyChunk { .. } => "calling_body_chunk_evt",
            DialogEvent::CallingBodyFinish { .. } => "calling_body_finish_evt",
            DialogEvent::CallingFinish { .. } => "calling_finish_evt",
            DialogEvent::FuncCallRequested { .. } => "func_call_requested_evt",
            DialogEvent::FuncResult { .. } => "func_result_evt",
            DialogEvent::MarkdownStart => "markdown_start_evt",
            DialogEvent::MarkdownChunk { .. } => "markdown_chunk_evt",
            DialogEvent::MarkdownFinish => "markdown_finish_evt",
            DialogEvent::StreamError { .. } => "stream_error_evt",
            DialogEvent::DiligenceBudget { .. } => "diligence_budget_evt",
            DialogEvent::NewQ4hAsked { .. } => "new_q4h_asked",
            DialogEvent::Q4hAnswered { .. } => "q4h_answered",
            DialogEvent::SubdialogCreated { .. } => "subdialog_created_evt",
            DialogEvent::SubdialogDone { .. } => "subdialog_done",
            DialogEvent::DlgRunState { .. } => "dlg_run_state_evt",
            DialogEvent::DlgTouched { .. } => "dlg_touched_evt",
            DialogEvent::StreamOverflow { .. } => "stream_overflow_evt",
            DialogEvent::JournalRecord { .. } => "journal_record",
        }
    }

    /// `true` for `dlg_touched_evt` itself — the bus never synthesizes a
    /// touched-event for a touched-event (§4.C).
    pub fn is_touched(&self) -> bool {
        matches!(self, DialogEvent::DlgTouched { .. })
    }
}

/// The enriched record delivered to subscribers and the global broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub dialog: DialogContext,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DialogEvent,
}
