//! Dialog-core configuration and validation.
//!
//! Grounded on `sa_domain::config::Config::validate`'s severity-tagged
//! issue-list pattern (`Vec<ConfigError>`, never a hard early-return on
//! the first problem) so a host can surface every misconfiguration at
//! once rather than one-at-a-time.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level dialog-core configuration. Team/LLM/MCP config (`.minds/*`)
/// is out of scope (§6) and loaded by the host; this only covers what
/// the core itself needs to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogCoreConfig {
    /// Root directory under which `.dialogs/run/<selfId>/...` is stored.
    #[serde(default = "d_store_root")]
    pub store_root: PathBuf,

    /// Default diligence-push-max budget for a new root dialog, absent a
    /// per-member override from team config.
    #[serde(default = "d_diligence_push_max")]
    pub diligence_push_max: u32,

    /// How long a bus subscriber waits for the next event before
    /// returning a timeout (§5 "every long-running read accepts a
    /// timeout").
    #[serde(default = "d_subscriber_timeout_ms")]
    pub subscriber_timeout_ms: u64,

    /// Cap on the number of complete rounds folded into an LLM context
    /// window before trimming oldest-first (§4.G step 1).
    #[serde(default = "d_max_context_rounds")]
    pub max_context_rounds: u32,
}

impl Default for DialogCoreConfig {
    fn default() -> Self {
        Self {
            store_root: d_store_root(),
            diligence_push_max: d_diligence_push_max(),
            subscriber_timeout_ms: d_subscriber_timeout_ms(),
            max_context_rounds: d_max_context_rounds(),
        }
    }
}

fn d_store_root() -> PathBuf {
    PathBuf::from(".dialogs")
}

fn d_diligence_push_max() -> u32 {
    3
}

fn d_subscriber_timeout_ms() -> u64 {
    30_000
}

fn d_max_context_rounds() -> u32 {
    50
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl DialogCoreConfig {
    /// Validate and return every issue found; an empty vec means the
    /// config is usable as-is. The driver never starts with a config
    /// carrying an `Error`-severity issue (§7 "driver never starts with
    /// a bad team/llm config").
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.store_root.as_os_str().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "store_root".into(),
                message: "store_root must not be empty".into(),
            });
        }

        if self.diligence_push_max == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "diligence_push_max".into(),
                message: "a budget of 0 disables all auto-continuation; every turn will block or idle after one step".into(),
            });
        }

        if self.subscriber_timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "subscriber_timeout_ms".into(),
                message: "a zero timeout would make every pull a busy-loop".into(),
            });
        }

        if self.max_context_rounds == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "max_context_rounds".into(),
                message: "max_context_rounds must be at least 1".into(),
            });
        }

        errors
    }

    pub fn has_errors(errors: &[ConfigError]) -> bool {
        errors.iter().any(|e| e.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let cfg = DialogCoreConfig::default();
        let errors = cfg.validate();
        assert!(!DialogCoreConfig::has_errors(&errors));
    }

    #[test]
    fn zero_budget_is_a_warning_not_an_error() {
        let mut cfg = DialogCoreConfig::default();
        cfg.diligence_push_max = 0;
        let errors = cfg.validate();
        assert!(!DialogCoreConfig::has_errors(&errors));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, ConfigSeverity::Warning);
    }

    #[test]
    fn zero_timeout_is_an_error() {
        let mut cfg = DialogCoreConfig::default();
        cfg.subscriber_timeout_ms = 0;
        let errors = cfg.validate();
        assert!(DialogCoreConfig::has_errors(&errors));
    }

    #[test]
    fn empty_store_root_is_an_error() {
        let mut cfg = DialogCoreConfig::default();
        cfg.store_root = PathBuf::new();
        let errors = cfg.validate();
        assert!(DialogCoreConfig::has_errors(&errors));
    }
}
