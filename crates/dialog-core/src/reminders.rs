//! Reminder Store (component B).
//!
//! Named, owner-tagged reminders persisted per dialog as `reminders.json`.
//! Save is atomic (write-to-temp + rename), grounded on
//! `sa-gateway::runtime::runs::RunStore::rewrite_jsonl`'s temp-file-then-
//! `fs::rename` idiom.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single reminder. `owner` is rebound at load time from the
/// process-wide owner registry by `owner_name`; an unrecognized name is
/// retained with `owner = None` rather than dropped, keeping user data
/// forward-compatible across tool (de)registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub content: String,
    pub owner_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Resolves an `owner_name` to a live owner handle at load time. The core
/// itself has no notion of what an "owner" is beyond this name — tools
/// register themselves against a process-wide table the host wires up.
pub trait OwnerRegistry {
    fn is_registered(&self, owner_name: &str) -> bool;
}

/// A reminder rehydrated from disk, with the rebind outcome recorded.
#[derive(Debug, Clone)]
pub struct RehydratedReminder {
    pub reminder: Reminder,
    pub owner_bound: bool,
}

/// Loads/saves a dialog's `reminders.json`.
pub struct ReminderStore {
    path: PathBuf,
}

impl ReminderStore {
    pub fn new(dialog_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dialog_dir.into().join("reminders.json"),
        }
    }

    /// Atomic save: write to `reminders.json.tmp`, then rename over the
    /// original so a crash mid-write can never leave a half-written file.
    pub fn save(&self, reminders: &[Reminder]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(reminders)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), count = reminders.len(), "reminders saved");
        Ok(())
    }

    /// Plain load: reminders as persisted, with no owner rebinding.
    pub fn load(&self) -> Result<Vec<Reminder>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load and rebind each reminder's owner against `registry`. Unknown
    /// `owner_name`s are retained (`owner_bound = false`) rather than
    /// pruned — the owning tool may re-register on a later startup.
    pub fn load_rehydrated(&self, registry: &dyn OwnerRegistry) -> Result<Vec<RehydratedReminder>> {
        let reminders = self.load()?;
        Ok(reminders
            .into_iter()
            .map(|reminder| {
                let owner_bound = registry.is_registered(&reminder.owner_name);
                if !owner_bound {
                    tracing::warn!(
                        owner_name = %reminder.owner_name,
                        "reminder references an unregistered owner; retaining with owner=null"
                    );
                }
                RehydratedReminder {
                    reminder,
                    owner_bound,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRegistry {
        known: Vec<&'static str>,
    }
    impl OwnerRegistry for FakeRegistry {
        fn is_registered(&self, owner_name: &str) -> bool {
            self.known.contains(&owner_name)
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path());
        let reminders = vec![Reminder {
            content: "renew cert".into(),
            owner_name: "cert_tool".into(),
            meta: Some(serde_json::json!({"days": 30})),
        }];
        store.save(&reminders).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "renew cert");
    }

    #[test]
    fn load_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_is_atomic_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path());
        store.save(&[]).unwrap();
        assert!(!dir.path().join("reminders.json.tmp").exists());
        assert!(dir.path().join("reminders.json").exists());
    }

    #[test]
    fn unknown_owner_retained_with_owner_unbound() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path());
        store
            .save(&[Reminder {
                content: "x".into(),
                owner_name: "ghost_tool".into(),
                meta: None,
            }])
            .unwrap();

        let registry = FakeRegistry { known: vec!["other_tool"] };
        let rehydrated = store.load_rehydrated(&registry).unwrap();
        assert_eq!(rehydrated.len(), 1);
        assert!(!rehydrated[0].owner_bound);
    }

    #[test]
    fn known_owner_binds() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::new(dir.path());
        store
            .save(&[Reminder {
                content: "x".into(),
                owner_name: "cert_tool".into(),
                meta: None,
            }])
            .unwrap();

        let registry = FakeRegistry { known: vec!["cert_tool"] };
        let rehydrated = store.load_rehydrated(&registry).unwrap();
        assert!(rehydrated[0].owner_bound);
    }
}
