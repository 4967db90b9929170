//! Error types for the dialog driving core.

use crate::id::DialogId;

/// Errors produced by dialog-core operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// A journal file contained a malformed record before its final line.
    #[error("journal corrupt for {dialog}: {detail}")]
    JournalCorrupt { dialog: DialogId, detail: String },

    /// The first head line of a tellask call failed mention validation.
    #[error("invalid mention on call: {0}")]
    InvalidMention(String),

    /// A Type-B call targeted a `(agentId, topicId)` key locked by another driver.
    #[error("ERR_MUTEX_BUSY\nkey {0} is locked by another driver")]
    MutexBusy(String),

    /// A call's head mention did not classify as human/self/tool/teammate.
    #[error("ERR_UNKNOWN_CALL\n{0}")]
    UnknownCall(String),

    /// A structural invariant (e.g. rootId/selfId mismatch) was violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The upstream LLM provider failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// A tool invocation failed.
    #[error("ERR_TOOL_EXECUTION\n{0}")]
    Tool(String),

    /// A dialog was referenced that is not registered.
    #[error("dialog not found: {0}")]
    NotFound(DialogId),

    /// An operation was attempted on a dialog in the wrong run state.
    #[error("dialog {0} is in state {1}, cannot perform this operation")]
    WrongState(DialogId, String),
}

pub type Result<T> = std::result::Result<T, Error>;
