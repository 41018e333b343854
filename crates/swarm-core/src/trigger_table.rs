//! Trigger table: routes span names to an agent's handlers.
//!
//! Built once through `TriggerTableBuilder` and immutable afterwards.
//! Routing picks the trigger with the longest matching suffix; among equally
//! specific triggers the one declared first wins.

use crate::agent::AgentBuildError;
use crate::handler::Handler;
use std::fmt;
use std::sync::Arc;
use swarm_proto::{SourceState, StateId, SuffixPattern};
use tracing::trace;

/// One routing entry: pattern, guard, destination and handler.
#[derive(Clone)]
pub struct Trigger {
    pattern: SuffixPattern,
    source: SourceState,
    destination: StateId,
    handler: Arc<dyn Handler>,
}

impl Trigger {
    pub fn pattern(&self) -> &SuffixPattern {
        &self.pattern
    }

    /// The state the agent must be in for the handler to run.
    pub fn source(&self) -> &SourceState {
        &self.source
    }

    /// The state the agent moves to when the handler emits a command.
    pub fn destination(&self) -> &StateId {
        &self.destination
    }

    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("pattern", &self.pattern.as_str())
            .field("source", &self.source.to_string())
            .field("destination", &self.destination.as_str())
            .finish_non_exhaustive()
    }
}

/// Immutable routing table for one agent.
#[derive(Debug, Clone, Default)]
pub struct TriggerTable {
    triggers: Vec<Trigger>,
    namespace: Option<String>,
}

impl TriggerTable {
    pub fn builder() -> TriggerTableBuilder {
        TriggerTableBuilder::default()
    }

    /// Finds the trigger for a span name, if any.
    ///
    /// With a namespace filter set, names outside the namespace never match.
    pub fn route(&self, name: &str) -> Option<&Trigger> {
        if let Some(ns) = &self.namespace
            && !name.starts_with(ns.as_str())
        {
            trace!(name, namespace = %ns, "Outside namespace");
            return None;
        }

        let mut best: Option<&Trigger> = None;
        for trigger in &self.triggers {
            if !trigger.pattern.matches(name) {
                continue;
            }
            // Strictly greater keeps the earliest declaration on ties.
            if best.is_none_or(|b| trigger.pattern.specificity() > b.pattern.specificity()) {
                best = Some(trigger);
            }
        }

        if best.is_none() {
            trace!(name, "No trigger matches");
        }
        best
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Triggers in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter()
    }
}

/// Accumulates triggers; pattern errors surface from `build()`.
#[derive(Default)]
pub struct TriggerTableBuilder {
    triggers: Vec<Trigger>,
    namespace: Option<String>,
    error: Option<AgentBuildError>,
}

impl TriggerTableBuilder {
    /// Restricts routing to span names starting with `namespace`.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    /// Declares a trigger.
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

    /// Declares a trigger with an already shared handler.
    #[must_use]
    pub fn on_shared(
        mut self,
        pattern: &str,
        source: impl Into<SourceState>,
        destination: impl Into<StateId>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        match SuffixPattern::parse(pattern) {
            Ok(pattern) => self.triggers.push(Trigger {
                pattern,
                source: source.into(),
                destination: destination.into(),
                handler,
            }),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(AgentBuildError::InvalidPattern(e));
                }
            }
        }
        self
    }

    pub fn build(self) -> Result<TriggerTable, AgentBuildError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(TriggerTable {
            triggers: self.triggers,
            namespace: self.namespace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerContext, HandlerResult};
    use swarm_proto::{Command, Span};

    fn emit(name: &'static str) -> impl Handler {
        move |_span: &Span, _ctx: &HandlerContext| -> HandlerResult { Ok(Some(Command::new(name))) }
    }

    fn emitted(trigger: &Trigger) -> String {
        let ctx = HandlerContext {
            agent: "t".into(),
            state: "IDLE".into(),
        };
        trigger
            .handler()
            .handle(&Span::new("x"), &ctx)
            .unwrap()
            .unwrap()
            .fq_name
    }

    #[test]
    fn test_longest_suffix_wins() {
        let table = TriggerTable::builder()
            .on("*.open", "*", "A", emit("short"))
            .on("*.motion.open", "*", "B", emit("long"))
            .build()
            .unwrap();

        let trigger = table.route("governance.motion.open").unwrap();
        assert_eq!(emitted(trigger), "long");
        assert_eq!(trigger.destination(), &StateId::new("B"));

        let trigger = table.route("door.open").unwrap();
        assert_eq!(emitted(trigger), "short");
    }

    #[test]
    fn test_tie_goes_to_first_declared() {
        let table = TriggerTable::builder()
            .on("*.vote", "*", "A", emit("first"))
            .on("*.vote", "*", "B", emit("second"))
            .build()
            .unwrap();
        for _ in 0..10 {
            assert_eq!(emitted(table.route("governance.motion.vote").unwrap()), "first");
        }
    }

    #[test]
    fn test_no_match_returns_none() {
        let table = TriggerTable::builder()
            .on("*.motion.open", "IDLE", "MOTION_OPEN", emit("vote"))
            .build()
            .unwrap();
        assert!(table.route("scrum.sprint.plan").is_none());
    }

    #[test]
    fn test_global_wildcard_is_least_specific() {
        let table = TriggerTable::builder()
            .on("*", "*", "SEEN", emit("any"))
            .on("*.ping.request", "*", "PINGED", emit("pong"))
            .build()
            .unwrap();
        assert_eq!(emitted(table.route("swarmsh.ping.request").unwrap()), "pong");
        assert_eq!(emitted(table.route("anything.else").unwrap()), "any");
    }

    #[test]
    fn test_namespace_filter() {
        let table = TriggerTable::builder()
            .namespace("governance.")
            .on("*.motion.open", "*", "OPEN", emit("vote"))
            .build()
            .unwrap();
        assert!(table.route("governance.motion.open").is_some());
        assert!(table.route("swarmsh.motion.open").is_none());
        assert_eq!(table.namespace(), Some("governance."));
    }

    #[test]
    fn test_invalid_pattern_fails_build() {
        let result = TriggerTable::builder()
            .on("task.*", "*", "A", emit("x"))
            .build();
        assert!(matches!(result, Err(AgentBuildError::InvalidPattern(_))));
    }
}
