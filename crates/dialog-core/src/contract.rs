//! External contracts the driver (component G) depends on (§6 AMBIENT).
//!
//! `sa-providers` and `sa-tools` are the out-of-scope concrete
//! implementations; this module only defines the seams and ships a
//! deterministic in-memory fake of each for this crate's own tests.

use async_trait::async_trait;
use sa_domain::stream::{BoxStream, StreamEvent};
use sa_domain::tool::Message;
use sa_providers::traits::ChatRequest;

use crate::id::DialogId;

/// The provider seam the driver streams against. `sa_providers::LlmProvider`
/// already has the right shape (one streaming method returning
/// `StreamEvent`s); this trait exists so dialog-core does not hard-depend
/// on any one provider crate's error type, only on `sa_domain`'s.
#[async_trait]
pub trait DialogLlmProvider: Send + Sync {
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> sa_domain::error::Result<BoxStream<'static, sa_domain::error::Result<StreamEvent>>>;
}

/// Context passed to a tool call: which dialog is calling, and the raw
/// call id from the tellask parse, so a tool can correlate its own
/// `func_result_evt`.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    pub dialog_id: DialogId,
    pub call_id: String,
}

/// Resolves a teammate `agentId` to the pieces the driver needs to hand a
/// tellask call off to them: whether the id names a real teammate at all,
/// their provider, their system prompt, and their diligence budget.
/// Grounded on `sa-gateway::runtime::{agent::AgentContext, resolve_provider}`'s
/// per-agent override shape, narrowed to what dialog-core itself needs
/// (team/llm config loading stays the host's job, §1 out-of-scope).
pub trait AgentDirectory: Send + Sync {
    fn is_registered_agent(&self, agent_id: &str) -> bool;
    fn provider_for(&self, agent_id: &str) -> Option<std::sync::Arc<dyn DialogLlmProvider>>;
    fn system_prompt_for(&self, agent_id: &str) -> String;
    fn diligence_push_max_for(&self, agent_id: &str) -> u32;
    fn tool_defs(&self) -> Vec<sa_domain::tool::ToolDefinition>;
}

/// `async fn call(...) -> String`, the tool-error protocol of §6/§7 baked
/// into the return value: a result starting with `ERR_UNKNOWN_CALL` or
/// `ERR_TOOL_EXECUTION` is an error, everything else is success.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call(&self, name: &str, args: serde_json::Value, ctx: ToolCallContext) -> String;

    /// `true` when `name` names a tool this executor knows how to run.
    /// The driver consults this during call classification (§4.D): a
    /// tellask head mention that names a registered tool is a tool call,
    /// not an unrecognized teammate.
    fn is_registered(&self, name: &str) -> bool;
}

/// `true` when a tool result string is the error protocol's first line.
pub fn is_tool_error(result: &str) -> bool {
    let first_line = result.lines().next().unwrap_or("");
    first_line == "ERR_UNKNOWN_CALL" || first_line == "ERR_TOOL_EXECUTION"
}

pub fn tool_execution_error(detail: impl std::fmt::Display) -> String {
    format!("ERR_TOOL_EXECUTION\n{detail}")
}

pub fn unknown_call_error(detail: impl std::fmt::Display) -> String {
    format!("ERR_UNKNOWN_CALL\n{detail}")
}

/// Build the user/assistant/tool message history the provider call needs
/// from a plain transcript of prior turns. Kept free-standing so the
/// driver and tests can share it without depending on a particular
/// session-history representation.
pub fn system_and_messages(system_prompt: &str, history: Vec<Message>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend(history);
    messages
}
