//! Per-agent state machine with guarded transitions.
//!
//! The machine owns the agent's current state. A trigger's handler only runs
//! when the current state satisfies the trigger's source guard, and the state
//! only changes when the handler asks for a command.

use crate::agent::AgentBuildError;
use crate::handler::{HandlerContext, HandlerError, HandlerResult, panic_message};
use crate::trigger_table::Trigger;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use swarm_proto::{AgentId, Command, SourceState, Span, StateId, now_seconds};
use tracing::{debug, info, warn};

/// Default number of transitions kept for introspection.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from: StateId,
    pub to: StateId,
    /// Pattern of the trigger that fired.
    pub trigger: String,
    /// Span that caused the transition.
    pub span_id: String,
    /// Command the handler emitted.
    pub command: String,
    pub at: f64,
}

/// What happened when a routed span reached the state machine.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// The current state did not satisfy the trigger's guard. The handler was not called.
    Skipped,
    /// The handler ran and asked for nothing.
    Observed,
    /// The handler emitted a command and the state moved to the declared destination.
    Transitioned {
        from: StateId,
        to: StateId,
        command: Command,
    },
    /// The handler failed, panicked or timed out. State is unchanged.
    HandlerFailed(HandlerError),
}

impl TransitionOutcome {
    pub fn command(&self) -> Option<&Command> {
        match self {
            TransitionOutcome::Transitioned { command, .. } => Some(command),
            _ => None,
        }
    }

    pub fn into_command(self) -> Option<Command> {
        match self {
            TransitionOutcome::Transitioned { command, .. } => Some(command),
            _ => None,
        }
    }

    pub fn is_transition(&self) -> bool {
        matches!(self, TransitionOutcome::Transitioned { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    states: Vec<StateId>,
    current: StateId,
    history: VecDeque<TransitionRecord>,
    history_limit: usize,
}

impl StateMachine {
    /// Creates a machine over a declared state set.
    ///
    /// # Errors
    ///
    /// Fails if the state set is empty, contains duplicates, or does not
    /// contain `initial`.
    pub fn new(states: Vec<StateId>, initial: StateId) -> Result<Self, AgentBuildError> {
        if states.is_empty() {
            return Err(AgentBuildError::NoStates);
        }
        for (i, state) in states.iter().enumerate() {
            if states[..i].contains(state) {
                return Err(AgentBuildError::DuplicateState(state.clone()));
            }
        }
        if !states.contains(&initial) {
            return Err(AgentBuildError::UnknownState {
                state: initial,
                context: "initial state".to_string(),
            });
        }

        Ok(Self {
            states,
            current: initial,
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        })
    }

    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        while self.history.len() > limit {
            self.history.pop_front();
        }
        self
    }

    pub fn current(&self) -> &StateId {
        &self.current
    }

    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    pub fn contains(&self, state: &StateId) -> bool {
        self.states.contains(state)
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Returns true if the current state satisfies `source`.
    pub fn admits(&self, source: &SourceState) -> bool {
        source.admits(&self.current)
    }

    /// Runs one routed span through the guard, the handler and the transition.
    ///
    /// The handler runs inline; a panic is caught and reported as a failure.
    pub fn apply(&mut self, agent: &AgentId, trigger: &Trigger, span: &Span) -> TransitionOutcome {
        if !self.admits(trigger.source()) {
            self.log_skip(agent, trigger, span);
            return TransitionOutcome::Skipped;
        }

        let ctx = HandlerContext {
            agent: agent.clone(),
            state: self.current.clone(),
        };
        let handler = trigger.handler();
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(span, &ctx)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))));

        self.settle(agent, trigger, span, result)
    }

    /// Applies a handler result that was produced outside the machine.
    ///
    /// Callers must have checked the guard with `admits` before running the
    /// handler.
    pub fn settle(
        &mut self,
        agent: &AgentId,
        trigger: &Trigger,
        span: &Span,
        result: HandlerResult,
    ) -> TransitionOutcome {
        match result {
            Err(error) => {
                warn!(
                    agent = %agent,
                    span = %span.name,
                    span_id = %span.span_id,
                    state = %self.current,
                    error = %error,
                    "Handler failed, state unchanged"
                );
                TransitionOutcome::HandlerFailed(error)
            }
            Ok(None) => {
                debug!(agent = %agent, span = %span.name, state = %self.current, "Observed without command");
                TransitionOutcome::Observed
            }
            Ok(Some(command)) => {
                let to = trigger.destination().clone();
                let from = std::mem::replace(&mut self.current, to.clone());

                info!(
                    agent = %agent,
                    from = %from,
                    to = %to,
                    trigger = %trigger.pattern(),
                    command = %command.fq_name,
                    "Transition"
                );

                self.record(TransitionRecord {
                    from: from.clone(),
                    to: to.clone(),
                    trigger: trigger.pattern().to_string(),
                    span_id: span.span_id.clone(),
                    command: command.fq_name.clone(),
                    at: now_seconds(),
                });

                TransitionOutcome::Transitioned { from, to, command }
            }
        }
    }

    pub(crate) fn log_skip(&self, agent: &AgentId, trigger: &Trigger, span: &Span) {
        debug!(
            agent = %agent,
            span = %span.name,
            required = %trigger.source(),
            current = %self.current,
            "Guard not satisfied, skipping"
        );
    }

    fn record(&mut self, record: TransitionRecord) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::trigger_table::TriggerTable;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn states(names: &[&str]) -> Vec<StateId> {
        names.iter().map(|s| StateId::new(*s)).collect()
    }

    fn machine() -> StateMachine {
        StateMachine::new(states(&["IDLE", "MOTION_OPEN", "VOTING"]), "IDLE".into()).unwrap()
    }

    fn single(source: &str, to: &str, handler: impl Handler + 'static) -> TriggerTable {
        TriggerTable::builder().on("*.motion.open", source, to, handler).build().unwrap()
    }

    #[test]
    fn test_rejects_bad_declarations() {
        assert!(matches!(StateMachine::new(vec![], "IDLE".into()), Err(AgentBuildError::NoStates)));
        assert!(matches!(
            StateMachine::new(states(&["A", "A"]), "A".into()),
            Err(AgentBuildError::DuplicateState(_))
        ));
        assert!(matches!(
            StateMachine::new(states(&["A"]), "B".into()),
            Err(AgentBuildError::UnknownState { .. })
        ));
    }

    #[test]
    fn test_transition_moves_to_declared_destination() {
        let table = single("IDLE", "MOTION_OPEN", |_: &Span, _: &HandlerContext| -> HandlerResult {
            Ok(Some(Command::new("governance.motion.vote")))
        });
        let trigger = table.route("governance.motion.open").unwrap();
        let mut sm = machine();

        let outcome = sm.apply(&"roberts".into(), trigger, &Span::new("governance.motion.open"));

        match outcome {
            TransitionOutcome::Transitioned { from, to, command } => {
                assert_eq!(from, "IDLE");
                assert_eq!(to, "MOTION_OPEN");
                assert_eq!(command.fq_name, "governance.motion.vote");
            }
            other => panic!("expected transition, got {other:?}"),
        }
        assert_eq!(sm.current(), &StateId::new("MOTION_OPEN"));
        assert_eq!(sm.history_len(), 1);
    }

    #[test]
    fn test_guard_failure_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let table = single("VOTING", "MOTION_OPEN", move |_: &Span, _: &HandlerContext| -> HandlerResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Command::new("never")))
        });
        let trigger = table.route("governance.motion.open").unwrap();
        let mut sm = machine();

        let outcome = sm.apply(&"roberts".into(), trigger, &Span::new("governance.motion.open"));

        assert!(matches!(outcome, TransitionOutcome::Skipped));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sm.current(), &StateId::new("IDLE"));
        assert_eq!(sm.history_len(), 0);
    }

    #[test]
    fn test_observe_keeps_state() {
        let table = single("*", "VOTING", |_: &Span, _: &HandlerContext| -> HandlerResult { Ok(None) });
        let trigger = table.route("x.motion.open").unwrap();
        let mut sm = machine();

        assert!(matches!(
            sm.apply(&"a".into(), trigger, &Span::new("x.motion.open")),
            TransitionOutcome::Observed
        ));
        assert_eq!(sm.current(), &StateId::new("IDLE"));
    }

    #[test]
    fn test_handler_error_and_panic_are_contained() {
        let mut sm = machine();

        let failing = single("IDLE", "VOTING", |_: &Span, _: &HandlerContext| -> HandlerResult {
            Err(HandlerError::MissingAttribute("motion_id".into()))
        });
        let outcome = sm.apply(&"a".into(), failing.route("a.motion.open").unwrap(), &Span::new("a.motion.open"));
        assert!(matches!(outcome, TransitionOutcome::HandlerFailed(HandlerError::MissingAttribute(_))));

        let panicking = single("IDLE", "VOTING", |_: &Span, _: &HandlerContext| -> HandlerResult {
            panic!("boom")
        });
        let outcome = sm.apply(&"a".into(), panicking.route("a.motion.open").unwrap(), &Span::new("a.motion.open"));
        match outcome {
            TransitionOutcome::HandlerFailed(HandlerError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected panic failure, got {other:?}"),
        }

        assert_eq!(sm.current(), &StateId::new("IDLE"));
        assert_eq!(sm.history_len(), 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let table = single("*", "IDLE", |_: &Span, _: &HandlerContext| -> HandlerResult {
            Ok(Some(Command::new("again")))
        });
        let trigger = table.route("x.motion.open").unwrap();
        let mut sm = machine().with_history_limit(3);

        for i in 0..5 {
            let span = Span::new("x.motion.open").with_attr("i", i);
            sm.apply(&"a".into(), trigger, &span);
        }

        assert_eq!(sm.history_len(), 3);
        assert_eq!(sm.history_limit(), 3);
    }
}
