//! The dialog driving core: per-dialog state machine, streaming tellask
//! parser, subdialog mutex registry, diligence-budget auto-continuation,
//! append-only event journal, and the reconstruction protocol that
//! revives a live dialog tree from disk.
//!
//! See `SPEC_FULL.md` at the workspace root for the full component
//! breakdown (A–I). This crate implements all of them; LLM provider
//! adapters, tool implementations, and the HTTP/WebSocket surface are
//! external collaborators referenced only through [`contract`].

pub mod bus;
pub mod cancel;
pub mod config;
pub mod contract;
pub mod dialog;
pub mod driver;
pub mod error;
pub mod events;
pub mod id;
pub mod journal;
pub mod mutex;
pub mod persistence;
pub mod registry;
pub mod reminders;
pub mod state;
pub mod tellask;

pub use bus::{EventBus, GlobalDialogListener, Pulled, SubChan};
pub use cancel::{CancelRegistry, CancelToken};
pub use config::DialogCoreConfig;
pub use dialog::{CallType, Dialog, DialogBase, OriginRole, PendingSubdialog, PendingSummary, RootDialog, SubDialog};
pub use driver::{Driver, DriveOutcome, DrivenNode};
pub use error::{Error, Result};
pub use events::{BlockedReason, DialogContext, DialogEvent, Envelope};
pub use id::DialogId;
pub use journal::{Journal, JournalRecord};
pub use mutex::{MutexEntry, SubdialogMutex};
pub use persistence::{CompletionStatus, DialogMeta, Persistence, RevivedRoot};
pub use registry::DialogRegistry;
pub use reminders::{Reminder, ReminderStore};
pub use state::{RunState, StateMachine};
pub use tellask::{MentionValidation, ParserEvent, TellaskParser};
