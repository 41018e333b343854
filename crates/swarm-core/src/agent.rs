//! Agents: a trigger table composed with a state machine.

use crate::handler::{Handler, HandlerContext, HandlerError, panic_message};
use crate::state_machine::{DEFAULT_HISTORY_LIMIT, StateMachine, TransitionOutcome, TransitionRecord};
use crate::trigger_table::{TriggerTable, TriggerTableBuilder};
use std::sync::Arc;
use std::time::Duration;
use swarm_proto::{AgentId, SourceState, Span, StateId};
use tracing::trace;

/// Default upper bound on a single handler call.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Errors raised while declaring an agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentBuildError {
    #[error("agent declares no states")]
    NoStates,

    #[error("state '{0}' is declared twice")]
    DuplicateState(StateId),

    #[error("{context} refers to undeclared state '{state}'")]
    UnknownState { state: StateId, context: String },

    #[error("invalid trigger pattern: {0}")]
    InvalidPattern(#[from] swarm_proto::Error),

    #[error("no built-in agent named '{0}'")]
    UnknownAgent(String),

    #[error("agent '{agent}': {source}")]
    Agent {
        agent: AgentId,
        #[source]
        source: Box<AgentBuildError>,
    },
}

impl AgentBuildError {
    fn for_agent(self, agent: &AgentId) -> Self {
        AgentBuildError::Agent {
            agent: agent.clone(),
            source: Box::new(self),
        }
    }
}

/// A stateful reactor over the span log.
///
/// Given a span, an agent produces at most one command: the trigger table
/// picks the trigger, the state machine checks the guard, runs the handler
/// and applies the transition.
#[derive(Debug)]
pub struct Agent {
    id: AgentId,
    machine: StateMachine,
    table: TriggerTable,
    handler_timeout: Duration,
}

impl Agent {
    pub fn builder(id: impl Into<AgentId>) -> AgentBuilder {
        AgentBuilder::new(id)
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn state(&self) -> &StateId {
        self.machine.current()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn table(&self) -> &TriggerTable {
        &self.table
    }

    pub fn namespace(&self) -> Option<&str> {
        self.table.namespace()
    }

    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.machine.history()
    }

    /// Reacts to a span with the handler running inline.
    ///
    /// Returns `None` when no trigger matches the span's name.
    pub fn react(&mut self, span: &Span) -> Option<TransitionOutcome> {
        let Some(trigger) = self.table.route(&span.name) else {
            trace!(agent = %self.id, span = %span.name, "No route");
            return None;
        };
        Some(self.machine.apply(&self.id, trigger, span))
    }

    /// Reacts to a span with the handler on the blocking pool, bounded by the
    /// handler timeout.
    ///
    /// A handler that exceeds the timeout is reported as failed; its thread is
    /// left to finish on its own and its result is discarded.
    pub async fn react_async(&mut self, span: &Span) -> Option<TransitionOutcome> {
        let Some(trigger) = self.table.route(&span.name) else {
            trace!(agent = %self.id, span = %span.name, "No route");
            return None;
        };

        if !self.machine.admits(trigger.source()) {
            self.machine.log_skip(&self.id, trigger, span);
            return Some(TransitionOutcome::Skipped);
        }

        let handler = trigger.handler();
        let ctx = HandlerContext {
            agent: self.id.clone(),
            state: self.machine.current().clone(),
        };
        let owned = span.clone();
        let call = tokio::task::spawn_blocking(move || handler.handle(&owned, &ctx));

        let result = match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(if join_error.is_panic() {
                HandlerError::Panicked(panic_message(join_error.into_panic().as_ref()))
            } else {
                HandlerError::Failed(join_error.to_string())
            }),
            Err(_) => Err(HandlerError::TimedOut(self.handler_timeout)),
        };

        Some(self.machine.settle(&self.id, trigger, span, result))
    }
}

/// Declares an agent's states and triggers.
pub struct AgentBuilder {
    id: AgentId,
    states: Vec<StateId>,
    initial: Option<StateId>,
    triggers: TriggerTableBuilder,
    declared: Vec<(String, SourceState, StateId)>,
    history_limit: usize,
    handler_timeout: Duration,
}

impl AgentBuilder {
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            states: Vec::new(),
            initial: None,
            triggers: TriggerTable::builder(),
            declared: Vec::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Declares the agent's state set.
    #[must_use]
    pub fn states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.states = states.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn initial(mut self, state: impl Into<StateId>) -> Self {
        self.initial = Some(state.into());
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.triggers = self.triggers.namespace(namespace);
        self
    }

    /// Declares a trigger: on a span matching `pattern`, while in `source`,
    /// run `handler`; if it emits a command, move to `destination`.
    #[must_use]
    pub fn on(
        self,
        pattern: &str,
        source: impl Into<SourceState>,
        destination: impl Into<StateId>,
        handler: impl Handler + 'static,
    ) -> Self {
        self.on_shared(pattern, source, destination, Arc::new(handler))
    }

    #[must_use]
    pub fn on_shared(
        mut self,
        pattern: &str,
        source: impl Into<SourceState>,
        destination: impl Into<StateId>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        let source = source.into();
        let destination = destination.into();
        self.declared
            .push((pattern.to_string(), source.clone(), destination.clone()));
        self.triggers = self.triggers.on_shared(pattern, source, destination, handler);
        self
    }

    #[must_use]
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Builds the agent, checking every trigger against the declared states.
    pub fn build(self) -> Result<Agent, AgentBuildError> {
        let id = self.id;
        let initial = self
            .initial
            .or_else(|| self.states.first().cloned())
            .ok_or_else(|| AgentBuildError::NoStates.for_agent(&id))?;

        let machine = StateMachine::new(self.states, initial)
            .map_err(|e| e.for_agent(&id))?
            .with_history_limit(self.history_limit);

        for (pattern, source, destination) in &self.declared {
            if let Some(state) = source.states().iter().find(|s| !machine.contains(s)) {
                return Err(AgentBuildError::UnknownState {
                    state: state.clone(),
                    context: format!("source of trigger '{pattern}'"),
                }
                .for_agent(&id));
            }
            if !machine.contains(destination) {
                return Err(AgentBuildError::UnknownState {
                    state: destination.clone(),
                    context: format!("destination of trigger '{pattern}'"),
                }
                .for_agent(&id));
            }
        }

        let table = self.triggers.build().map_err(|e| e.for_agent(&id))?;

        Ok(Agent {
            id,
            machine,
            table,
            handler_timeout: self.handler_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerResult;
    use swarm_proto::Command;

    fn vote(span: &Span, _ctx: &HandlerContext) -> HandlerResult {
        let motion = crate::handler::require_attr(span, "motion_id")?;
        Ok(Some(Command::new("governance.motion.vote").arg("motion-id", motion)))
    }

    fn agent() -> Agent {
        Agent::builder("roberts")
            .states(["IDLE", "MOTION_OPEN"])
            .initial("IDLE")
            .on("*.motion.open", "IDLE", "MOTION_OPEN", vote)
            .build()
            .unwrap()
    }

    #[test]
    fn test_react_transitions() {
        let mut agent = agent();
        let span = Span::new("governance.motion.open").with_attr("motion_id", "m1");

        let outcome = agent.react(&span).unwrap();
        let command = outcome.into_command().unwrap();
        assert_eq!(command.args, vec!["--motion-id", "m1"]);
        assert_eq!(agent.state(), &StateId::new("MOTION_OPEN"));
    }

    #[test]
    fn test_no_route_leaves_agent_untouched() {
        let mut agent = agent();
        assert!(agent.react(&Span::new("scrum.sprint.plan")).is_none());
        assert_eq!(agent.state(), &StateId::new("IDLE"));
        assert_eq!(agent.history().count(), 0);
    }

    #[test]
    fn test_unknown_destination_is_rejected() {
        let result = Agent::builder("bad")
            .states(["IDLE"])
            .on("*.x", "IDLE", "NOWHERE", vote)
            .build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("NOWHERE"), "{err}");
        assert!(err.to_string().contains("bad"), "{err}");
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let result = Agent::builder("bad")
            .states(["IDLE"])
            .on("*.x", "VOTING", "IDLE", vote)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_initial_defaults_to_first_state() {
        let agent = Agent::builder("a").states(["FIRST", "SECOND"]).build().unwrap();
        assert_eq!(agent.state(), &StateId::new("FIRST"));
    }

    #[tokio::test]
    async fn test_react_async_missing_attribute_fails() {
        let mut agent = agent();
        let outcome = agent.react_async(&Span::new("governance.motion.open")).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::HandlerFailed(HandlerError::MissingAttribute(_))));
        assert_eq!(agent.state(), &StateId::new("IDLE"));
    }

    #[tokio::test]
    async fn test_react_async_times_out_slow_handler() {
        let mut agent = Agent::builder("slow")
            .states(["IDLE", "DONE"])
            .handler_timeout(Duration::from_millis(20))
            .on("*.go", "IDLE", "DONE", |_: &Span, _: &HandlerContext| -> HandlerResult {
                std::thread::sleep(Duration::from_millis(300));
                Ok(Some(Command::new("late")))
            })
            .build()
            .unwrap();

        let outcome = agent.react_async(&Span::new("x.go")).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::HandlerFailed(HandlerError::TimedOut(_))));
        assert_eq!(agent.state(), &StateId::new("IDLE"));
    }

    #[tokio::test]
    async fn test_react_async_contains_panics() {
        let mut agent = Agent::builder("fragile")
            .states(["IDLE", "DONE"])
            .on("*.go", "*", "DONE", |_: &Span, _: &HandlerContext| -> HandlerResult {
                panic!("handler exploded")
            })
            .build()
            .unwrap();

        let outcome = agent.react_async(&Span::new("x.go")).await.unwrap();
        match outcome {
            TransitionOutcome::HandlerFailed(HandlerError::Panicked(msg)) => {
                assert_eq!(msg, "handler exploded");
            }
            other => panic!("expected panic failure, got {other:?}"),
        }
    }
}
