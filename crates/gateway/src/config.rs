//! This host's own configuration surface: just the sections
//! [`ConfigAgentDirectory`](crate::directory::ConfigAgentDirectory) and
//! [`GatewayToolExecutor`](crate::tool_adapter::GatewayToolExecutor)
//! actually consume. Grounded on `sa_domain::config::Config::validate`'s
//! issue-list shape, narrowed to `llm`/`tools`/`agents` — the teacher's
//! full `Config` also carries `server`/`sessions`/`mcp`/`tasks`/`admin`/
//! `pruning`/`compaction`/`memory_lifecycle`/`skills`/`workspace` sections
//! for an HTTP/scheduling surface this binary doesn't have (§1, §2).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use sa_domain::config::{AgentConfig, AuthMode, ConfigError, ConfigSeverity, LlmConfig, ToolsConfig};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Sub-agent definitions (key = agent_id).
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

impl GatewayConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Warn when no LLM providers are configured.
        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            }

            if !provider.base_url.is_empty()
                && !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }

            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }

            let needs_credentials = matches!(provider.auth.mode, AuthMode::ApiKey | AuthMode::QueryParam);
            if needs_credentials {
                let has_env = provider.auth.env.as_ref().is_some_and(|v| !v.is_empty());
                let has_key = provider.auth.key.as_ref().is_some_and(|v| !v.is_empty());
                let has_keys = !provider.auth.keys.is_empty();
                if !has_env && !has_key && !has_keys {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("llm.providers[{i}].auth"),
                        message: format!(
                            "provider \"{}\" uses {:?} auth mode but has no auth.env, auth.key, or auth.keys configured",
                            provider.id, provider.auth.mode
                        ),
                    });
                }
            }
        }

        for (i, pattern) in self.tools.exec_security.denied_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("tools.exec_security.denied_patterns[{i}]"),
                    message: format!("invalid regex \"{pattern}\": {e}"),
                });
            }
        }

        errors
    }
}
