//! Dialog State Machine (component F).
//!
//! Grounded on `sa-gateway::runtime::runs::RunStatus`/`Run`'s lifecycle
//! shape (`is_terminal()`, explicit enum, `finish()`), generalized to the
//! richer seven-state machine with a `blocked(reason)` payload that §4.F
//! requires.

use serde::{Deserialize, Serialize};

use crate::events::BlockedReason;

/// Per-dialog run-state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    IdleWaitingUser,
    Proceeding,
    ProceedingStopRequested,
    Interrupted,
    Blocked { reason: BlockedReason },
    Terminal,
    Dead,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Terminal | RunState::Dead)
    }

    pub fn is_driving(&self) -> bool {
        matches!(self, RunState::Proceeding | RunState::ProceedingStopRequested)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunState::IdleWaitingUser => "idle_waiting_user",
            RunState::Proceeding => "proceeding",
            RunState::ProceedingStopRequested => "proceeding_stop_requested",
            RunState::Interrupted => "interrupted",
            RunState::Blocked { .. } => "blocked",
            RunState::Terminal => "terminal",
            RunState::Dead => "dead",
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        RunState::IdleWaitingUser
    }
}

/// An attempted transition that the current state does not permit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: String,
    pub to: String,
}

/// A minimal state-machine wrapper enforcing the legal transitions of
/// §4.F. Holds no dialog data of its own — `dialog.rs` embeds one.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    state: RunState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: RunState) -> Self {
        Self { state }
    }

    pub fn current(&self) -> &RunState {
        &self.state
    }

    /// `idle_waiting_user -> proceeding`, or resume from `blocked`/
    /// `interrupted` — the only states a new driving step may start from.
    pub fn begin_proceeding(&mut self) -> Result<(), IllegalTransition> {
        match &self.state {
            RunState::IdleWaitingUser | RunState::Interrupted | RunState::Blocked { .. } => {
                self.set(RunState::Proceeding);
                Ok(())
            }
            other => Err(self.illegal(other, "proceeding")),
        }
    }

    /// `proceeding -> proceeding_stop_requested`, on a user stop request.
    pub fn request_stop(&mut self) -> Result<(), IllegalTransition> {
        match &self.state {
            RunState::Proceeding => {
                self.set(RunState::ProceedingStopRequested);
                Ok(())
            }
            other => Err(self.illegal(other, "proceeding_stop_requested")),
        }
    }

    /// `proceeding_stop_requested -> interrupted`, once the driver reaches
    /// the next chunk boundary and honors the stop.
    pub fn finish_stop(&mut self) -> Result<(), IllegalTransition> {
        match &self.state {
            RunState::ProceedingStopRequested => {
                self.set(RunState::Interrupted);
                Ok(())
            }
            other => Err(self.illegal(other, "interrupted")),
        }
    }

    /// Provider error mid-stream: `proceeding(_stop_requested) -> interrupted`,
    /// never auto-continues (§7).
    pub fn interrupt_on_error(&mut self) -> Result<(), IllegalTransition> {
        match &self.state {
            RunState::Proceeding | RunState::ProceedingStopRequested => {
                self.set(RunState::Interrupted);
                Ok(())
            }
            other => Err(self.illegal(other, "interrupted")),
        }
    }

    /// `proceeding -> blocked(reason)`.
    pub fn block(&mut self, reason: BlockedReason) -> Result<(), IllegalTransition> {
        match &self.state {
            RunState::Proceeding => {
                self.set(RunState::Blocked { reason });
                Ok(())
            }
            other => Err(self.illegal(other, "blocked")),
        }
    }

    /// `proceeding -> idle_waiting_user`, turn ended clean with no blocker
    /// and budget exhausted.
    pub fn return_to_idle(&mut self) -> Result<(), IllegalTransition> {
        match &self.state {
            RunState::Proceeding => {
                self.set(RunState::IdleWaitingUser);
                Ok(())
            }
            other => Err(self.illegal(other, "idle_waiting_user")),
        }
    }

    /// `blocked -> proceeding`, all open Q4H answered or pending summaries
    /// folded in.
    pub fn unblock(&mut self) -> Result<(), IllegalTransition> {
        match &self.state {
            RunState::Blocked { .. } => {
                self.set(RunState::Proceeding);
                Ok(())
            }
            other => Err(self.illegal(other, "proceeding")),
        }
    }

    /// Task accepted as done: any non-dead -> terminal.
    pub fn finish_terminal(&mut self) -> Result<(), IllegalTransition> {
        match &self.state {
            RunState::Dead => Err(self.illegal(&RunState::Dead, "terminal")),
            _ => {
                self.set(RunState::Terminal);
                Ok(())
            }
        }
    }

    /// Fatal error or explicit delete: any non-dead -> dead. Always legal.
    pub fn kill(&mut self) {
        self.set(RunState::Dead);
    }

    fn set(&mut self, new_state: RunState) {
        tracing::debug!(from = self.state.label(), to = new_state.label(), "dialog state transition");
        self.state = new_state;
    }

    fn illegal(&self, from: &RunState, to: &str) -> IllegalTransition {
        IllegalTransition {
            from: from.label().to_owned(),
            to: to.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), &RunState::IdleWaitingUser);
    }

    #[test]
    fn idle_to_proceeding_on_prompt() {
        let mut sm = StateMachine::new();
        sm.begin_proceeding().unwrap();
        assert_eq!(sm.current(), &RunState::Proceeding);
    }

    #[test]
    fn proceeding_to_blocked_needs_human_input() {
        let mut sm = StateMachine::new();
        sm.begin_proceeding().unwrap();
        sm.block(BlockedReason::NeedsHumanInput).unwrap();
        assert_eq!(
            sm.current(),
            &RunState::Blocked { reason: BlockedReason::NeedsHumanInput }
        );
    }

    #[test]
    fn blocked_unblocks_back_to_proceeding() {
        let mut sm = StateMachine::new();
        sm.begin_proceeding().unwrap();
        sm.block(BlockedReason::WaitingForSubdialogs).unwrap();
        sm.unblock().unwrap();
        assert_eq!(sm.current(), &RunState::Proceeding);
    }

    #[test]
    fn clean_finish_returns_to_idle() {
        let mut sm = StateMachine::new();
        sm.begin_proceeding().unwrap();
        sm.return_to_idle().unwrap();
        assert_eq!(sm.current(), &RunState::IdleWaitingUser);
    }

    #[test]
    fn stop_request_then_finish_goes_interrupted() {
        let mut sm = StateMachine::new();
        sm.begin_proceeding().unwrap();
        sm.request_stop().unwrap();
        assert_eq!(sm.current(), &RunState::ProceedingStopRequested);
        sm.finish_stop().unwrap();
        assert_eq!(sm.current(), &RunState::Interrupted);
    }

    #[test]
    fn interrupted_can_resume_proceeding() {
        let mut sm = StateMachine::new();
        sm.begin_proceeding().unwrap();
        sm.interrupt_on_error().unwrap();
        assert_eq!(sm.current(), &RunState::Interrupted);
        sm.begin_proceeding().unwrap();
        assert_eq!(sm.current(), &RunState::Proceeding);
    }

    #[test]
    fn terminal_from_idle_or_blocked() {
        let mut sm = StateMachine::new();
        sm.finish_terminal().unwrap();
        assert_eq!(sm.current(), &RunState::Terminal);
    }

    #[test]
    fn any_state_can_die() {
        let mut sm = StateMachine::new();
        sm.begin_proceeding().unwrap();
        sm.kill();
        assert_eq!(sm.current(), &RunState::Dead);
        assert!(sm.current().is_terminal());
    }

    #[test]
    fn dead_cannot_reach_terminal() {
        let mut sm = StateMachine::new();
        sm.kill();
        assert!(sm.finish_terminal().is_err());
    }

    #[test]
    fn illegal_transition_from_terminal_is_rejected() {
        let mut sm = StateMachine::new();
        sm.finish_terminal().unwrap();
        assert!(sm.begin_proceeding().is_err());
    }

    #[test]
    fn illegal_transition_message_names_states() {
        let mut sm = StateMachine::new();
        let err = sm.unblock().unwrap_err();
        assert_eq!(err.from, "idle_waiting_user");
        assert_eq!(err.to, "proceeding");
    }
}
