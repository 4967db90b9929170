//! The `AgentDirectory` seam, backed by `Config.agents` and `Config.llm`.
//! Grounded on `sa-gateway::runtime::agent::AgentContext`'s per-agent
//! override shape and `resolve_provider`'s resolution order (explicit
//! override -> role default -> any available provider), narrowed to what
//! the driver needs: registration, a provider handle, a system prompt,
//! and a diligence budget.

use std::collections::HashMap;
use std::sync::Arc;

use sa_dialog_core::contract::{AgentDirectory, DialogLlmProvider};
use sa_domain::config::AgentConfig;
use sa_domain::tool::ToolDefinition;
use sa_providers::registry::ProviderRegistry;

use crate::config::GatewayConfig;
use crate::provider_adapter::ProviderAdapter;
use crate::tool_adapter;

pub struct ConfigAgentDirectory {
    agents: HashMap<String, AgentConfig>,
    providers: Arc<ProviderRegistry>,
    default_diligence_push_max: u32,
}

impl ConfigAgentDirectory {
    pub fn new(config: &GatewayConfig, providers: Arc<ProviderRegistry>, default_diligence_push_max: u32) -> Self {
        Self {
            agents: config.agents.clone(),
            providers,
            default_diligence_push_max,
        }
    }

    /// The model role an agent resolves against absent its own
    /// per-role override in `AgentConfig::models`.
    fn role_for(&self, agent_id: &str) -> String {
        self.agents
            .get(agent_id)
            .and_then(|a| a.models.get("executor"))
            .cloned()
            .unwrap_or_else(|| "executor".into())
    }
}

impl AgentDirectory for ConfigAgentDirectory {
    fn is_registered_agent(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    fn provider_for(&self, agent_id: &str) -> Option<Arc<dyn DialogLlmProvider>> {
        let role = self.role_for(agent_id);
        let provider = self
            .providers
            .get(&role)
            .or_else(|| self.providers.for_role(&role))
            .or_else(|| self.providers.for_role("executor"))
            .or_else(|| self.providers.iter().next().map(|(_, p)| p.clone()))?;
        Some(Arc::new(ProviderAdapter::new(provider)))
    }

    /// No config field carries an explicit system prompt for an agent
    /// (`AgentConfig` only has workspace/skills/tool-policy/model/limits
    /// fields); synthesize a minimal one from the agent id, the same
    /// shape the crate's own `contract::fakes::FakeAgentDirectory` uses.
    fn system_prompt_for(&self, agent_id: &str) -> String {
        format!("you are {agent_id}")
    }

    fn diligence_push_max_for(&self, _agent_id: &str) -> u32 {
        self.default_diligence_push_max
    }

    fn tool_defs(&self) -> Vec<ToolDefinition> {
        tool_adapter::tool_defs()
    }
}
