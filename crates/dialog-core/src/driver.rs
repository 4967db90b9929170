//! The Driver (component G) — the kernel that turns one stream of
//! provider output into bus events, journal records, and state-machine
//! transitions (§4.G).
//!
//! Grounded on `sa-gateway::runtime::turn::{run_turn, run_turn_inner}`'s
//! shape: assemble context from persisted history, open a provider stream,
//! fold deltas into a live transcript while dispatching tool calls inline,
//! then decide the next state once the stream ends. The tool-call loop
//! is generalized here into two distinct resumes: a same-step tool/FBR
//! loop that never touches the diligence budget, capped by
//! [`MAX_TOOL_LOOPS`] (the same hard ceiling `turn.rs` keeps beneath its
//! own budget), and a budget-gated auto-continue loop across whole
//! generations (§4.G step 5). Cancellation is grounded on
//! `sa-gateway::runtime::cancel::{CancelToken, CancelMap}`, narrowed to
//! dialog-core's own [`crate::cancel::CancelRegistry`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::OnceLock;

use futures_util::StreamExt;
use regex::Regex;
use sa_domain::stream::StreamEvent;
use sa_domain::tool::{ContentPart, Message, MessageContent, Role};
use sa_providers::traits::ChatRequest;

use crate::bus::EventBus;
use crate::cancel::CancelRegistry;
use crate::contract::{self, AgentDirectory, ToolCallContext, ToolExecutor};
use crate::dialog::{CallType, Dialog, OriginRole, PendingSubdialog, PendingSummary, RootDialog, SubDialog};
use crate::error::{Error, Result};
use crate::events::{BlockedReason, DialogEvent};
use crate::id::DialogId;
use crate::journal::JournalRecord;
use crate::persistence::Persistence;
use crate::tellask::{MentionValidation, ParserEvent, TellaskParser};

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Hard ceiling on same-step tool/FBR resumes within one generation, below
/// the diligence budget (which only governs whole-generation auto-continue).
/// A call-happy or adversarial model otherwise spins `run_one_generation`
/// forever without ever touching the budget the driver decides on.
const MAX_TOOL_LOOPS: usize = 25;

/// Either half of the two-level dialog tree, driven uniformly.
#[derive(Clone)]
pub enum DrivenNode {
    Root(Arc<RootDialog>),
    Sub(Arc<SubDialog>),
}

impl DrivenNode {
    fn is_root(&self) -> bool {
        matches!(self, DrivenNode::Root(_))
    }

    fn parent_self_id(&self) -> Option<String> {
        match self {
            DrivenNode::Root(_) => None,
            DrivenNode::Sub(s) => s.supdialog().map(|p| p.base.id.self_id.clone()),
        }
    }
}

impl Dialog for DrivenNode {
    fn base(&self) -> &crate::dialog::DialogBase {
        match self {
            DrivenNode::Root(r) => r.base(),
            DrivenNode::Sub(s) => s.base(),
        }
    }
}

/// Outcome of driving a node through one full call to [`Driver::drive_node`]
/// (a whole budget-gated turn, not one generation).
#[derive(Debug, Clone)]
pub enum DriveOutcome {
    Idle,
    Blocked(BlockedReason),
    Interrupted,
    Stopped,
}

enum Generation {
    Stopped,
    Errored,
    Completed { tool_loop_again: bool },
}

struct CurrentCall {
    call_id: String,
    validation: MentionValidation,
    headline: String,
    body: String,
}

enum CallKind {
    Q4H,
    Fbr,
    Tool { name: String },
    TypeB { agent_id: String, topic: String },
    TypeC { agent_id: String },
    Unknown { reason: String },
}

/// The driver itself: a thin bundle of the seams it needs (§6's out-of-scope
/// boundary — team/LLM config resolution, tool execution, and persistence
/// are the host's concrete implementations of these traits).
pub struct Driver<'a> {
    bus: &'a EventBus,
    directory: &'a dyn AgentDirectory,
    tools: &'a dyn ToolExecutor,
    cancel: &'a CancelRegistry,
    persistence: &'a Persistence,
    max_context_rounds: u32,
}

impl<'a> Driver<'a> {
    pub fn new(
        bus: &'a EventBus,
        directory: &'a dyn AgentDirectory,
        tools: &'a dyn ToolExecutor,
        cancel: &'a CancelRegistry,
        persistence: &'a Persistence,
        max_context_rounds: u32,
    ) -> Self {
        Self {
            bus,
            directory,
            tools,
            cancel,
            persistence,
            max_context_rounds,
        }
    }

    /// Drive the root dialog for one user-initiated turn (§4.G entry point,
    /// invariant 8: budget resets here).
    pub async fn drive_turn(&self, root: &Arc<RootDialog>, user_text: &str) -> Result<DriveOutcome> {
        self.drive_node(root.clone(), DrivenNode::Root(root.clone()), Some(user_text.to_owned()))
            .await
    }

    /// Resume an idle/interrupted/blocked node without a fresh user prompt —
    /// used to progress a pending Type-B/Type-C child once the host decides
    /// it is the child's turn to run (§4.D, handoff is async from the
    /// parent's perspective).
    pub async fn drive_pending_child(&self, root: &Arc<RootDialog>, child: &Arc<SubDialog>, seed_text: &str) -> Result<DriveOutcome> {
        let outcome = self
            .drive_node(root.clone(), DrivenNode::Sub(child.clone()), Some(seed_text.to_owned()))
            .await?;
        self.fold_child_completion(root, child, &outcome)?;
        Ok(outcome)
    }

    /// Drive every currently pending Type-B/Type-C child exactly once,
    /// seeded with the head line its delegating call left behind, folding
    /// each one's summary back as it finishes (§4.G step 4 "hand off
    /// driving to that child"). Does not re-drive the parent itself —
    /// callers loop on the parent's `DriveOutcome` to decide whether
    /// another pass is needed (a child may itself re-block, or spawn a
    /// fresh pending entry for the same key via a later resume).
    pub async fn drive_pending_children(&self, root: &Arc<RootDialog>) -> Result<()> {
        for pending in root.pending_subdialogs() {
            let Some(child) = root.child(&pending.subdialog_id.self_id) else {
                continue;
            };
            self.drive_pending_child(root, &child, &pending.head_line).await?;
        }
        Ok(())
    }

    fn fold_child_completion(&self, root: &Arc<RootDialog>, child: &Arc<SubDialog>, outcome: &DriveOutcome) -> Result<()> {
        if matches!(outcome, DriveOutcome::Blocked(_)) {
            return Ok(());
        }
        let summary = self.last_visible_text(child)?;
        root.remove_pending(&child.base.id);
        if let Some(topic) = &child.topic_id {
            root.subdialog_mutex.unlock(&child.base.agent_id, topic);
        }
        root.push_summary(PendingSummary {
            subdialog_id: child.base.id.clone(),
            summary,
            completed_at: chrono::Utc::now(),
        });
        self.bus.post_by_id(
            root.id(),
            DialogEvent::SubdialogDone {
                subdialog_id: child.base.id.clone(),
                summary: self.last_visible_text(child)?,
            },
        );
        self.persistence.save_pending_summaries(&root.base.id.self_id, &root.peek_summaries())?;
        Ok(())
    }

    fn last_visible_text(&self, node: &impl Dialog) -> Result<String> {
        let round = node.base().round();
        for record in node.base().journal.read_round_events(node.id(), round)?.into_iter().rev() {
            if record.kind == "agent_words_record" {
                if let Some(saying) = record.payload.get("saying").and_then(|v| v.as_str()) {
                    if !saying.trim().is_empty() {
                        return Ok(saying.trim().to_owned());
                    }
                }
            }
        }
        Ok(String::new())
    }

    /// Drive one node (root or child) through a full budget-gated turn.
    /// Boxed because the Type-A "FBR" call recurses into driving a
    /// transient self-subdialog inline.
    pub fn drive_node<'f>(&'f self, root: Arc<RootDialog>, node: DrivenNode, seed_text: Option<String>) -> BoxFut<'f, Result<DriveOutcome>> {
        Box::pin(async move {
            if let Some(text) = &seed_text {
                let round = node.base().round();
                let genseq = node.base().next_genseq();
                node.base()
                    .journal
                    .append_event(node.id(), round, "user_prompt", genseq, serde_json::json!({ "text": text }))?;
                if node.is_root() {
                    root.reset_budget();
                }
            }

            if node.is_root() {
                self.fold_pending_summaries(&root)?;
            }

            node.base()
                .with_state(|sm| sm.begin_proceeding())
                .map_err(|e| Error::WrongState(node.id().clone(), e.to_string()))?;
            self.bus.post_by_id(node.id(), DialogEvent::DlgRunState { state: "proceeding".into() });
            self.cancel.register(node.id());

            let mut tool_loop_count: usize = 0;
            let outcome = loop {
                if self.cancel.is_cancelled(node.id()) || matches!(node.run_state(), crate::state::RunState::ProceedingStopRequested) {
                    self.finish_stop(&node)?;
                    break DriveOutcome::Stopped;
                }

                match self.run_one_generation(&root, &node).await? {
                    Generation::Stopped => break DriveOutcome::Stopped,
                    Generation::Errored => break DriveOutcome::Interrupted,
                    Generation::Completed { tool_loop_again } => {
                        if tool_loop_again {
                            tool_loop_count += 1;
                            if tool_loop_count < MAX_TOOL_LOOPS {
                                continue;
                            }
                            tracing::warn!(
                                dialog = %node.id(),
                                limit = MAX_TOOL_LOOPS,
                                "same-step tool/FBR loop hit its ceiling; forcing a state decision"
                            );
                        }
                        tool_loop_count = 0;
                        if let Some(outcome) = self.decide_next_state(&root, &node)? {
                            break outcome;
                        }
                        // auto-continue: loop straight back into step 1.
                    }
                }
            };

            self.cancel.remove(node.id());
            self.persistence.touch_meta(&node, node.parent_self_id().as_deref())?;
            if node.is_root() {
                self.persistence.save_registry(&root.base.id.self_id, &root.subdialog_mutex)?;
            }
            Ok(outcome)
        })
    }

    fn fold_pending_summaries(&self, root: &Arc<RootDialog>) -> Result<()> {
        for summary in root.take_summaries() {
            let round = root.base.round();
            let genseq = root.base.next_genseq();
            root.base.journal.append_event(
                root.id(),
                round,
                "subdialog_done",
                genseq,
                serde_json::json!({ "subdialog_id": summary.subdialog_id, "summary": summary.summary }),
            )?;
        }
        Ok(())
    }

    /// §4.G step 5: decide the state to transition to once a generation
    /// ends clean with no further tool/FBR work queued. Returns `None` to
    /// signal "stay proceeding, auto-continue" (budget consumed as a side
    /// effect in that branch).
    fn decide_next_state(&self, root: &Arc<RootDialog>, node: &DrivenNode) -> Result<Option<DriveOutcome>> {
        let needs_human = node.base().has_open_questions();
        let needs_subdialogs = node.is_root() && root.has_pending();

        let reason = match (needs_human, needs_subdialogs) {
            (true, true) => Some(BlockedReason::NeedsHumanInputAndSubdialogs),
            (true, false) => Some(BlockedReason::NeedsHumanInput),
            (false, true) => Some(BlockedReason::WaitingForSubdialogs),
            (false, false) => None,
        };

        if let Some(reason) = reason {
            node.base()
                .with_state(|sm| sm.block(reason))
                .map_err(|e| Error::WrongState(node.id().clone(), e.to_string()))?;
            self.bus.post_by_id(node.id(), DialogEvent::DlgRunState { state: "blocked".into() });
            return Ok(Some(DriveOutcome::Blocked(reason)));
        }

        if node.is_root() && root.remaining_budget() > 0 {
            let remaining = root.decrement_budget();
            self.bus.post_by_id(node.id(), DialogEvent::DiligenceBudget { remaining_count: remaining });
            return Ok(None);
        }

        node.base()
            .with_state(|sm| sm.return_to_idle())
            .map_err(|e| Error::WrongState(node.id().clone(), e.to_string()))?;
        self.bus.post_by_id(node.id(), DialogEvent::DlgRunState { state: "idle_waiting_user".into() });
        Ok(Some(DriveOutcome::Idle))
    }

    fn finish_stop(&self, node: &DrivenNode) -> Result<()> {
        node.base().with_state(|sm| {
            if matches!(sm.current(), crate::state::RunState::Proceeding) {
                let _ = sm.request_stop();
            }
        });
        node.base()
            .with_state(|sm| sm.finish_stop())
            .map_err(|e| Error::WrongState(node.id().clone(), e.to_string()))?;
        self.bus.post_by_id(node.id(), DialogEvent::StreamError { reason: "user_stop".into() });
        self.bus.post_by_id(node.id(), DialogEvent::DlgRunState { state: "interrupted".into() });
        Ok(())
    }

    /// §4.G steps 1-4: assemble context, open a stream, consume it,
    /// dispatching tellask calls and native tool calls as they complete.
    async fn run_one_generation(&self, root: &Arc<RootDialog>, node: &DrivenNode) -> Result<Generation> {
        let messages = self.assemble_context(node)?;
        let system_prompt = self.directory.system_prompt_for(node.agent_id());
        let provider = match self.directory.provider_for(node.agent_id()) {
            Some(p) => p,
            None => {
                node.base()
                    .with_state(|sm| sm.interrupt_on_error())
                    .map_err(|e| Error::WrongState(node.id().clone(), e.to_string()))?;
                self.bus.post_by_id(
                    node.id(),
                    DialogEvent::StreamError { reason: format!("no provider registered for agent {}", node.agent_id()) },
                );
                return Ok(Generation::Errored);
            }
        };

        let request = ChatRequest {
            messages: contract::system_and_messages(&system_prompt, messages),
            tools: self.directory.tool_defs(),
            ..Default::default()
        };

        self.bus.post_by_id(node.id(), DialogEvent::GeneratingStart);
        let mut stream = match provider.stream_chat(request).await {
            Ok(s) => s,
            Err(e) => {
                node.base()
                    .with_state(|sm| sm.interrupt_on_error())
                    .map_err(|e2| Error::WrongState(node.id().clone(), e2.to_string()))?;
                self.bus.post_by_id(node.id(), DialogEvent::StreamError { reason: e.to_string() });
                return Ok(Generation::Errored);
            }
        };

        let mut parser = TellaskParser::new();
        let mut thinking_started = false;
        let mut saying_started = false;
        let mut thinking_buf = String::new();
        let mut saying_buf = String::new();
        let mut tc_bufs: HashMap<String, (String, String)> = HashMap::new();
        let mut current_call: Option<CurrentCall> = None;
        let mut call_counter: u64 = 0;
        let mut tool_loop_again = false;

        while let Some(event) = stream.next().await {
            if self.cancel.is_cancelled(node.id()) {
                self.finish_stop(node)?;
                return Ok(Generation::Stopped);
            }

            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    node.base()
                        .with_state(|sm| sm.interrupt_on_error())
                        .map_err(|e2| Error::WrongState(node.id().clone(), e2.to_string()))?;
                    self.bus.post_by_id(node.id(), DialogEvent::StreamError { reason: e.to_string() });
                    return Ok(Generation::Errored);
                }
            };

            match event {
                StreamEvent::Thinking { text } => {
                    if !thinking_started {
                        self.bus.post_by_id(node.id(), DialogEvent::ThinkingStart);
                        thinking_started = true;
                    }
                    thinking_buf.push_str(&text);
                    self.bus.post_by_id(node.id(), DialogEvent::ThinkingChunk { text });
                }
                StreamEvent::Token { text } => {
                    if !saying_started {
                        self.bus.post_by_id(node.id(), DialogEvent::SayingStart);
                        saying_started = true;
                    }
                    saying_buf.push_str(&text);
                    self.bus.post_by_id(node.id(), DialogEvent::SayingChunk { text: text.clone() });
                    let events = parser.feed(&text);
                    self.handle_parser_events(root, node, events, &mut current_call, &mut call_counter, &mut tool_loop_again)
                        .await?;
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    tc_bufs.insert(call_id, (tool_name, String::new()));
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    if let Some(buf) = tc_bufs.get_mut(&call_id) {
                        buf.1.push_str(&delta);
                    }
                }
                StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                    let args = if arguments.is_null() {
                        tc_bufs
                            .remove(&call_id)
                            .and_then(|(_, raw)| serde_json::from_str(&raw).ok())
                            .unwrap_or_else(|| serde_json::json!({}))
                    } else {
                        tc_bufs.remove(&call_id);
                        arguments
                    };
                    self.execute_tool(node, &call_id, &tool_name, args).await?;
                    tool_loop_again = true;
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { message } => {
                    node.base()
                        .with_state(|sm| sm.interrupt_on_error())
                        .map_err(|e2| Error::WrongState(node.id().clone(), e2.to_string()))?;
                    self.bus.post_by_id(node.id(), DialogEvent::StreamError { reason: message });
                    return Ok(Generation::Errored);
                }
            }
        }

        let trailing = parser.finish();
        self.handle_parser_events(root, node, trailing, &mut current_call, &mut call_counter, &mut tool_loop_again)
            .await?;

        if saying_started {
            self.bus.post_by_id(node.id(), DialogEvent::SayingFinish);
        }
        if thinking_started {
            self.bus.post_by_id(node.id(), DialogEvent::ThinkingFinish);
        }
        self.bus.post_by_id(node.id(), DialogEvent::GeneratingFinish);

        let round = node.base().round();
        let genseq = node.base().next_genseq();
        node.base().journal.append_event(
            node.id(),
            round,
            "agent_words_record",
            genseq,
            serde_json::json!({ "thinking": thinking_buf, "saying": saying_buf }),
        )?;

        Ok(Generation::Completed { tool_loop_again })
    }

    async fn handle_parser_events(
        &self,
        root: &Arc<RootDialog>,
        node: &DrivenNode,
        events: Vec<ParserEvent>,
        current_call: &mut Option<CurrentCall>,
        call_counter: &mut u64,
        tool_loop_again: &mut bool,
    ) -> Result<()> {
        for ev in events {
            match ev {
                ParserEvent::MarkdownStart => self.bus.post_by_id(node.id(), DialogEvent::MarkdownStart),
                ParserEvent::MarkdownChunk(text) => self.bus.post_by_id(node.id(), DialogEvent::MarkdownChunk { text }),
                ParserEvent::MarkdownFinish => self.bus.post_by_id(node.id(), DialogEvent::MarkdownFinish),
                ParserEvent::CallStart(validation) => {
                    *call_counter += 1;
                    let call_id = format!("call-{call_counter}");
                    self.bus.post_by_id(node.id(), DialogEvent::CallingStart { call_id: call_id.clone(), validation: validation.clone() });
                    *current_call = Some(CurrentCall { call_id, validation, headline: String::new(), body: String::new() });
                }
                ParserEvent::CallHeadLineChunk(text) => {
                    if let Some(c) = current_call.as_mut() {
                        c.headline.push_str(&text);
                        self.bus.post_by_id(node.id(), DialogEvent::CallingHeadlineChunk { call_id: c.call_id.clone(), text });
                    }
                }
                ParserEvent::CallHeadLineFinish => {
                    if let Some(c) = current_call.as_ref() {
                        self.bus.post_by_id(node.id(), DialogEvent::CallingHeadlineFinish { call_id: c.call_id.clone() });
                    }
                }
                ParserEvent::CallBodyStart => {
                    if let Some(c) = current_call.as_ref() {
                        self.bus.post_by_id(node.id(), DialogEvent::CallingBodyStart { call_id: c.call_id.clone() });
                    }
                }
                ParserEvent::CallBodyChunk(text) => {
                    if let Some(c) = current_call.as_mut() {
                        c.body.push_str(&text);
                        self.bus.post_by_id(node.id(), DialogEvent::CallingBodyChunk { call_id: c.call_id.clone(), text });
                    }
                }
                ParserEvent::CallBodyFinish => {
                    if let Some(c) = current_call.as_ref() {
                        self.bus.post_by_id(node.id(), DialogEvent::CallingBodyFinish { call_id: c.call_id.clone() });
                    }
                }
                ParserEvent::CallFinish(_generated_id) => {
                    if let Some(c) = current_call.take() {
                        self.bus.post_by_id(node.id(), DialogEvent::CallingFinish { call_id: c.call_id.clone() });
                        self.dispatch_call(root, node, c, tool_loop_again).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch_call(&self, root: &Arc<RootDialog>, node: &DrivenNode, call: CurrentCall, tool_loop_again: &mut bool) -> Result<()> {
        let mention = match &call.validation {
            MentionValidation::Valid { first_mention } => first_mention.clone(),
            MentionValidation::Malformed { reason } => {
                self.journal_call_result(node, &call.call_id, "(malformed)", &contract::unknown_call_error(reason), true)?;
                self.bus.post_by_id(
                    node.id(),
                    DialogEvent::FuncResult {
                        call_id: call.call_id,
                        tool_name: "(malformed)".into(),
                        result: contract::unknown_call_error(reason),
                        is_error: true,
                    },
                );
                *tool_loop_again = true;
                return Ok(());
            }
        };

        match classify_mention(&mention, &call.headline, node.is_root(), self.directory, self.tools) {
            CallKind::Q4H => self.handle_q4h(node, call, &mention)?,
            CallKind::Fbr => self.handle_fbr(root, node, call, tool_loop_again).await?,
            CallKind::Tool { name } => self.handle_tool(node, call, name, tool_loop_again).await?,
            CallKind::TypeB { agent_id, topic } => self.handle_type_b(root, node, call, agent_id, topic, tool_loop_again)?,
            CallKind::TypeC { agent_id } => self.handle_type_c(root, node, call, agent_id)?,
            CallKind::Unknown { reason } => self.handle_unknown(node, call, &mention, reason, tool_loop_again)?,
        }
        Ok(())
    }

    fn call_text(call: &CurrentCall) -> String {
        format!("{}\n{}", call.headline.trim_end(), call.body.trim_end()).trim().to_owned()
    }

    fn journal_call_result(&self, node: &DrivenNode, call_id: &str, tool_name: &str, result: &str, is_error: bool) -> Result<()> {
        let round = node.base().round();
        let genseq = node.base().next_genseq();
        node.base().journal.append_event(
            node.id(),
            round,
            "func_result",
            genseq,
            serde_json::json!({ "call_id": call_id, "tool_name": tool_name, "result": result, "is_error": is_error }),
        )
    }

    fn handle_q4h(&self, node: &DrivenNode, call: CurrentCall, _mention: &str) -> Result<()> {
        let question = Self::call_text(&call);
        node.base().ask_question(call.call_id.clone(), question.clone());
        let round = node.base().round();
        let genseq = node.base().next_genseq();
        node.base().journal.append_event(
            node.id(),
            round,
            "q4h_asked",
            genseq,
            serde_json::json!({ "call_id": call.call_id, "question": question }),
        )?;
        self.bus
            .post_by_id(node.id(), DialogEvent::NewQ4hAsked { call_id: call.call_id, question });
        Ok(())
    }

    async fn handle_fbr(&self, root: &Arc<RootDialog>, node: &DrivenNode, call: CurrentCall, tool_loop_again: &mut bool) -> Result<()> {
        let seed = Self::call_text(&call);
        let agent_id = node.agent_id().to_owned();
        let fbr_child = root.spawn_subdialog(
            self.persistence,
            agent_id,
            None,
            OriginRole::Assistant,
            None,
            Some(node.id().clone()),
            Some(call.call_id.clone()),
        );
        self.persistence.persist_new_child(&fbr_child)?;

        self.drive_node(root.clone(), DrivenNode::Sub(fbr_child.clone()), Some(seed)).await?;
        let summary = self.last_visible_text(&*fbr_child)?;

        let round = node.base().round();
        let genseq = node.base().next_genseq();
        node.base().journal.append_event(
            node.id(),
            round,
            "subdialog_done",
            genseq,
            serde_json::json!({ "subdialog_id": fbr_child.base.id, "summary": summary }),
        )?;
        self.bus.post_by_id(
            node.id(),
            DialogEvent::SubdialogDone { subdialog_id: fbr_child.base.id.clone(), summary },
        );
        *tool_loop_again = true;
        Ok(())
    }

    async fn handle_tool(&self, node: &DrivenNode, call: CurrentCall, name: String, tool_loop_again: &mut bool) -> Result<()> {
        let args: serde_json::Value = serde_json::from_str(call.body.trim()).unwrap_or_else(|_| serde_json::json!({ "raw": call.body }));
        self.execute_tool_call(node, &call.call_id, &name, args).await?;
        *tool_loop_again = true;
        Ok(())
    }

    /// Shared by native provider function calls and tellask-text tool
    /// calls: both end up executing through [`ToolExecutor`] the same way.
    async fn execute_tool(&self, node: &DrivenNode, call_id: &str, name: &str, args: serde_json::Value) -> Result<()> {
        self.execute_tool_call(node, call_id, name, args).await
    }

    async fn execute_tool_call(&self, node: &DrivenNode, call_id: &str, name: &str, args: serde_json::Value) -> Result<()> {
        let round = node.base().round();
        let genseq = node.base().next_genseq();
        node.base().journal.append_event(
            node.id(),
            round,
            "func_call_requested",
            genseq,
            serde_json::json!({ "call_id": call_id, "tool_name": name, "arguments": args }),
        )?;
        self.bus.post_by_id(
            node.id(),
            DialogEvent::FuncCallRequested { call_id: call_id.to_owned(), tool_name: name.to_owned(), arguments: args.clone() },
        );

        let ctx = ToolCallContext { dialog_id: node.id().clone(), call_id: call_id.to_owned() };
        let result = self.tools.call(name, args, ctx).await;
        let is_error = contract::is_tool_error(&result);

        self.journal_call_result(node, call_id, name, &result, is_error)?;
        self.bus.post_by_id(
            node.id(),
            DialogEvent::FuncResult { call_id: call_id.to_owned(), tool_name: name.to_owned(), result, is_error },
        );
        Ok(())
    }

    fn handle_type_b(
        &self,
        root: &Arc<RootDialog>,
        node: &DrivenNode,
        call: CurrentCall,
        agent_id: String,
        topic: String,
        tool_loop_again: &mut bool,
    ) -> Result<()> {
        let tool_name = format!("{agent_id}!{topic}");
        if root.subdialog_mutex.is_locked(&agent_id, &topic) {
            let result = contract::tool_execution_error(format!("ERR_MUTEX_BUSY\nkey {tool_name} is locked by another driver"));
            self.journal_call_result(node, &call.call_id, &tool_name, &result, true)?;
            self.bus.post_by_id(
                node.id(),
                DialogEvent::FuncResult { call_id: call.call_id, tool_name, result, is_error: true },
            );
            *tool_loop_again = true;
            return Ok(());
        }

        let child = match root.registered_subdialog(&agent_id, &topic) {
            Some(existing) => {
                root.subdialog_mutex
                    .lock(&agent_id, &topic, existing.base.id.clone())
                    .map_err(|e| Error::MutexBusy(e.0))?;
                existing
            }
            None => {
                let child = root.spawn_subdialog(
                    self.persistence,
                    agent_id.clone(),
                    Some(topic.clone()),
                    OriginRole::Assistant,
                    None,
                    Some(node.id().clone()),
                    Some(call.call_id.clone()),
                );
                self.persistence.persist_new_child(&child)?;
                root.subdialog_mutex
                    .lock(&agent_id, &topic, child.base.id.clone())
                    .map_err(|e| Error::MutexBusy(e.0))?;
                child
            }
        };

        let head_line = Self::call_text(&call);
        root.add_pending(PendingSubdialog {
            subdialog_id: child.base.id.clone(),
            created_at: chrono::Utc::now(),
            head_line,
            target_agent_id: agent_id.clone(),
            call_type: CallType::B,
        });

        let round = node.base().round();
        let genseq = node.base().next_genseq();
        node.base().journal.append_event(
            node.id(),
            round,
            "subdialog_created",
            genseq,
            serde_json::json!({ "subdialog_id": child.base.id, "target_agent_id": agent_id, "call_type": "B" }),
        )?;
        self.bus.post_by_id(
            node.id(),
            DialogEvent::SubdialogCreated { subdialog_id: child.base.id.clone(), target_agent_id: agent_id, call_type: CallType::B },
        );
        Ok(())
    }

    fn handle_type_c(&self, root: &Arc<RootDialog>, node: &DrivenNode, call: CurrentCall, agent_id: String) -> Result<()> {
        let child = root.spawn_subdialog(
            self.persistence,
            agent_id.clone(),
            None,
            OriginRole::Assistant,
            None,
            Some(node.id().clone()),
            Some(call.call_id.clone()),
        );
        self.persistence.persist_new_child(&child)?;

        let head_line = Self::call_text(&call);
        root.add_pending(PendingSubdialog {
            subdialog_id: child.base.id.clone(),
            created_at: chrono::Utc::now(),
            head_line,
            target_agent_id: agent_id.clone(),
            call_type: CallType::C,
        });

        let round = node.base().round();
        let genseq = node.base().next_genseq();
        node.base().journal.append_event(
            node.id(),
            round,
            "subdialog_created",
            genseq,
            serde_json::json!({ "subdialog_id": child.base.id, "target_agent_id": agent_id, "call_type": "C" }),
        )?;
        self.bus.post_by_id(
            node.id(),
            DialogEvent::SubdialogCreated { subdialog_id: child.base.id.clone(), target_agent_id: agent_id, call_type: CallType::C },
        );
        Ok(())
    }

    fn handle_unknown(&self, node: &DrivenNode, call: CurrentCall, mention: &str, reason: String, tool_loop_again: &mut bool) -> Result<()> {
        let result = contract::unknown_call_error(reason);
        self.journal_call_result(node, &call.call_id, mention, &result, true)?;
        self.bus.post_by_id(
            node.id(),
            DialogEvent::FuncResult { call_id: call.call_id, tool_name: mention.to_owned(), result, is_error: true },
        );
        *tool_loop_again = true;
        Ok(())
    }

    /// §4.G step 1: task doc reference, active reminders, then every
    /// journaled record of the last `max_context_rounds` complete rounds
    /// (never splitting a round), folded into provider messages.
    fn assemble_context(&self, node: &DrivenNode) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        messages.push(Message::user(format!("Task document: {}", node.base().task_doc_path)));

        let reminders = node.base().reminders();
        if !reminders.is_empty() {
            let text = reminders.iter().map(|r| format!("- {}", r.content)).collect::<Vec<_>>().join("\n");
            messages.push(Message::user(format!("Active reminders:\n{text}")));
        }

        let current_round = node.base().round();
        let first_round = current_round.saturating_sub(self.max_context_rounds as u64).max(1);
        for round in first_round..=current_round {
            for record in node.base().journal.read_round_events(node.id(), round)? {
                if let Some(message) = record_to_message(&record) {
                    messages.push(message);
                }
            }
        }
        Ok(messages)
    }
}

fn record_to_message(record: &JournalRecord) -> Option<Message> {
    match record.kind.as_str() {
        "user_prompt" => record.payload.get("text").and_then(|v| v.as_str()).map(Message::user),
        "agent_words_record" => record
            .payload
            .get("saying")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(Message::assistant),
        "func_call_requested" => {
            let call_id = record.payload.get("call_id")?.as_str()?.to_owned();
            let name = record.payload.get("tool_name")?.as_str()?.to_owned();
            let input = record.payload.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));
            Some(Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![ContentPart::ToolUse { id: call_id, name, input }]),
            })
        }
        "func_result" => {
            let call_id = record.payload.get("call_id")?.as_str()?.to_owned();
            let result = record.payload.get("result")?.as_str()?.to_owned();
            let is_error = record.payload.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
            Some(Message {
                role: Role::Tool,
                content: MessageContent::Parts(vec![ContentPart::ToolResult { tool_use_id: call_id, content: result, is_error }]),
            })
        }
        "subdialog_done" => {
            let summary = record.payload.get("summary")?.as_str()?.to_owned();
            Some(Message::user(format!("[subdialog summary] {summary}")))
        }
        _ => None,
    }
}

/// §4.D call classification. Precedence: human/self sentinels first, then
/// registered tools, then registered teammates — a name that happens to
/// collide across categories resolves to the earlier one. A subdialog
/// cannot itself delegate further (§3: "always two levels deep"), so Fbr/
/// TypeB/TypeC only ever classify for a root node.
fn classify_mention(mention: &str, headline: &str, is_root: bool, directory: &dyn AgentDirectory, tools: &dyn ToolExecutor) -> CallKind {
    if mention.eq_ignore_ascii_case("human") {
        return CallKind::Q4H;
    }
    if mention.eq_ignore_ascii_case("self") {
        return if is_root {
            CallKind::Fbr
        } else {
            CallKind::Unknown { reason: "a subdialog cannot spawn a further self-reflection subdialog".into() }
        };
    }
    if tools.is_registered(mention) {
        return CallKind::Tool { name: mention.to_owned() };
    }
    if directory.is_registered_agent(mention) {
        if !is_root {
            return CallKind::Unknown { reason: format!("a subdialog cannot delegate to teammate '{mention}'") };
        }
        return match extract_topic(headline) {
            Some(topic) => CallKind::TypeB { agent_id: mention.to_owned(), topic },
            None => CallKind::TypeC { agent_id: mention.to_owned() },
        };
    }
    CallKind::Unknown { reason: format!("'{mention}' is not human, self, a registered tool, or a registered teammate") }
}

/// A Type-B headline carries a `!topic` token after the mention, e.g.
/// `@cmdr !review`. Anything else with a registered teammate mention is
/// Type-C.
fn extract_topic(headline: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?:^|\s)!([A-Za-z][A-Za-z0-9_-]*)").expect("static regex"));
    re.captures(headline).map(|c| c[1].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::cancel::CancelRegistry;
    use crate::contract::fakes::{FakeAgentDirectory, FakeToolExecutor, ScriptedProvider};
    use crate::dialog::RootDialog;
    use sa_domain::stream::Usage;
    use tempfile::tempdir;

    fn root_for(dir: &std::path::Path, persistence: &Persistence, diligence_push_max: u32) -> Arc<RootDialog> {
        let root = RootDialog::create(persistence, "task.md", "cmdr", diligence_push_max);
        persistence.persist_new_root(&root).unwrap();
        let _ = dir;
        root
    }

    fn done() -> StreamEvent {
        StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) }
    }

    fn text(s: &str) -> StreamEvent {
        StreamEvent::Token { text: s.to_owned() }
    }

    #[tokio::test]
    async fn clean_reply_with_no_calls_returns_to_idle_without_spending_budget() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let provider = Arc::new(ScriptedProvider::new(vec![vec![text("hello there\n"), done()]]));
        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();

        assert!(matches!(outcome, DriveOutcome::Idle));
        assert_eq!(root.run_state(), crate::state::RunState::IdleWaitingUser);
        assert_eq!(root.remaining_budget(), 3);
    }

    #[tokio::test]
    async fn q4h_call_blocks_on_needs_human_input() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let provider = Arc::new(ScriptedProvider::new(vec![vec![text("!?@human what next?\n"), done()]]));
        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();

        assert!(matches!(outcome, DriveOutcome::Blocked(BlockedReason::NeedsHumanInput)));
        assert!(root.base.has_open_questions());
    }

    #[tokio::test]
    async fn diligence_budget_auto_continues_then_idles() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 1);

        // Two generations in a row, each with plain text and no calls: the
        // first consumes the one unit of budget, the second idles.
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![text("second\n"), done()],
            vec![text("first\n"), done()],
        ]));
        let directory = FakeAgentDirectory::new(1).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();

        assert!(matches!(outcome, DriveOutcome::Idle));
        assert_eq!(root.remaining_budget(), 0);
    }

    #[tokio::test]
    async fn tool_call_executes_and_loops_within_the_same_budget() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![text("all done\n"), done()],
            vec![text("!?@search find it\n"), done()],
        ]));
        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new().with_response("search", "3 results");
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();

        assert!(matches!(outcome, DriveOutcome::Idle));
        assert_eq!(root.remaining_budget(), 3, "tool loop must not spend diligence budget");
    }

    #[tokio::test]
    async fn unknown_mention_gets_protocol_error_and_keeps_going() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![text("ok\n"), done()],
            vec![text("!?@nobody hello\n"), done()],
        ]));
        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Idle));
    }

    #[tokio::test]
    async fn type_b_creates_and_locks_a_child_then_blocks_on_subdialogs() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let provider = Arc::new(ScriptedProvider::new(vec![vec![text("!?@researcher !survey go look\n"), done()]]));
        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();

        assert!(matches!(outcome, DriveOutcome::Blocked(BlockedReason::WaitingForSubdialogs)));
        assert!(root.subdialog_mutex.is_locked("researcher", "survey"));
        assert!(root.registered_subdialog("researcher", "survey").is_some());
    }

    #[tokio::test]
    async fn type_b_second_call_on_locked_topic_gets_mutex_busy() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![text("!?@researcher !survey again\n"), done()],
            vec![text("!?@researcher !survey go\n"), done()],
        ]));
        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        driver.drive_turn(&root, "hi").await.unwrap();

        // Second turn while the topic is still locked.
        root.base.with_state(|sm| sm.return_to_idle().ok());
        let outcome = driver.drive_turn(&root, "again").await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Blocked(BlockedReason::WaitingForSubdialogs)));
    }

    #[tokio::test]
    async fn tool_loop_ceiling_forces_a_state_decision_instead_of_spinning_forever() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        struct AlwaysToolCall;

        #[async_trait::async_trait]
        impl crate::contract::DialogLlmProvider for AlwaysToolCall {
            async fn stream_chat(
                &self,
                _request: ChatRequest,
            ) -> sa_domain::error::Result<sa_domain::stream::BoxStream<'static, sa_domain::error::Result<StreamEvent>>> {
                let events: Vec<sa_domain::error::Result<StreamEvent>> = vec![Ok(text("!?@search find it again\n")), Ok(done())];
                Ok(Box::pin(futures_util::stream::iter(events)))
            }
        }

        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", Arc::new(AlwaysToolCall));
        let tools = FakeToolExecutor::new().with_response("search", "3 results");
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        // A provider that never stops emitting tool calls would spin
        // `run_one_generation` forever without the same-step ceiling; this
        // test hangs if `MAX_TOOL_LOOPS` regresses to no cap.
        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();

        assert!(matches!(outcome, DriveOutcome::Idle));
        assert_eq!(root.remaining_budget(), 0, "the ceiling forces a state decision each time it trips, spending budget");
    }

    #[tokio::test]
    async fn type_b_handoff_drives_child_to_completion_and_folds_summary_into_parent() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let cmdr_provider = Arc::new(ScriptedProvider::new(vec![vec![text("!?@researcher !survey go look\n"), done()]]));
        let researcher_provider = Arc::new(ScriptedProvider::new(vec![vec![text("survey complete: all clear\n"), done()]]));
        let directory = FakeAgentDirectory::new(3)
            .with_agent("cmdr", cmdr_provider)
            .with_agent("researcher", researcher_provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Blocked(BlockedReason::WaitingForSubdialogs)));

        let pending = root.pending_subdialogs();
        assert_eq!(pending.len(), 1);
        let child = root.child(&pending[0].subdialog_id.self_id).unwrap();

        let child_outcome = driver.drive_pending_child(&root, &child, &pending[0].head_line).await.unwrap();
        assert!(matches!(child_outcome, DriveOutcome::Idle));

        assert!(!root.subdialog_mutex.is_locked("researcher", "survey"));
        assert!(!root.has_pending());
        let summaries = root.peek_summaries();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].summary.contains("survey complete"));

        // Re-driving the parent with no new user text folds the summary in
        // and lets it resolve past `waiting_for_subdialogs`.
        let resumed = driver.drive_node(root.clone(), DrivenNode::Root(root.clone()), None).await.unwrap();
        assert!(matches!(resumed, DriveOutcome::Idle));
        assert!(root.peek_summaries().is_empty());
    }

    #[tokio::test]
    async fn fbr_call_drives_a_transient_self_subdialog_inline_and_folds_summary() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![text("reflection done, proceeding\n"), done()],
            vec![text("I reflected on this quietly\n"), done()],
            vec![text("!?@self let me think about this\n"), done()],
        ]));
        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();

        assert!(matches!(outcome, DriveOutcome::Idle));
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.remaining_budget(), 3, "an fbr round trip is a same-step loop, not a budget spend");
    }

    #[tokio::test]
    async fn provider_stream_error_interrupts_without_auto_continuing() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let provider = Arc::new(ScriptedProvider::new(vec![vec![StreamEvent::Error { message: "upstream exploded".into() }]]));
        let directory = FakeAgentDirectory::new(3).with_agent("cmdr", provider);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();

        assert!(matches!(outcome, DriveOutcome::Interrupted));
        assert_eq!(root.run_state(), crate::state::RunState::Interrupted);
        assert_eq!(root.remaining_budget(), 3, "an error never consumes diligence budget");
    }

    #[tokio::test]
    async fn no_provider_for_agent_interrupts_cleanly() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let root = root_for(dir.path(), &persistence, 3);

        let directory = FakeAgentDirectory::new(3);
        let tools = FakeToolExecutor::new();
        let bus = EventBus::new();
        let cancel = CancelRegistry::new();

        let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, 50);
        let outcome = driver.drive_turn(&root, "hi").await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Interrupted));
    }

    #[test]
    fn classify_mention_precedence() {
        let directory = FakeAgentDirectory::new(3).with_agent(
            "cmdr",
            Arc::new(ScriptedProvider::new(vec![])) as Arc<dyn crate::contract::DialogLlmProvider>,
        );
        let tools = FakeToolExecutor::new().with_response("cmdr", "shadowed");

        assert!(matches!(classify_mention("human", "@human hi", true, &directory, &tools), CallKind::Q4H));
        assert!(matches!(classify_mention("self", "@self hi", true, &directory, &tools), CallKind::Fbr));
        assert!(matches!(
            classify_mention("self", "@self hi", false, &directory, &tools),
            CallKind::Unknown { .. }
        ));
        // A tool-name collision with a teammate id resolves to the tool.
        assert!(matches!(classify_mention("cmdr", "@cmdr hi", true, &directory, &tools), CallKind::Tool { .. }));
        assert!(matches!(
            classify_mention("ghost", "@ghost hi", true, &directory, &tools),
            CallKind::Unknown { .. }
        ));
    }

    #[test]
    fn extract_topic_reads_bang_token_after_mention() {
        assert_eq!(extract_topic("@cmdr !review"), Some("review".to_owned()));
        assert_eq!(extract_topic("@cmdr go look into it"), None);
    }

    #[allow(dead_code)]
    fn unused_usage_reference(_u: Usage) {}
}
