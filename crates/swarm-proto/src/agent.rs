//! Agent and state identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named member of an agent's declared state set (e.g. `MOTION_OPEN`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(String);

impl StateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for StateId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StateId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The source state a trigger requires before its handler may run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceState {
    /// Any current state satisfies the guard.
    Any,
    /// Only this exact state satisfies the guard.
    Is(StateId),
    /// Any of these states satisfies the guard.
    OneOf(Vec<StateId>),
}

impl SourceState {
    /// Parses `"*"` as the wildcard, `"A|B"` as a set of states and anything
    /// else as a concrete state.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s == "*" {
            return SourceState::Any;
        }
        let mut states: Vec<StateId> = s
            .split('|')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(StateId::new)
            .collect();
        if states.len() == 1 {
            SourceState::Is(states.remove(0))
        } else {
            SourceState::OneOf(states)
        }
    }

    /// Returns true if `current` satisfies this requirement.
    pub fn admits(&self, current: &StateId) -> bool {
        match self {
            SourceState::Any => true,
            SourceState::Is(required) => required == current,
            SourceState::OneOf(allowed) => allowed.contains(current),
        }
    }

    /// The concrete states named; empty for the wildcard.
    pub fn states(&self) -> &[StateId] {
        match self {
            SourceState::Any => &[],
            SourceState::Is(state) => std::slice::from_ref(state),
            SourceState::OneOf(states) => states,
        }
    }
}

impl From<StateId> for SourceState {
    fn from(state: StateId) -> Self {
        SourceState::Is(state)
    }
}

impl From<&str> for SourceState {
    fn from(s: &str) -> Self {
        SourceState::parse(s)
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Any => write!(f, "*"),
            SourceState::Is(state) => write!(f, "{state}"),
            SourceState::OneOf(states) => {
                let names: Vec<&str> = states.iter().map(StateId::as_str).collect();
                write!(f, "{}", names.join("|"))
            }
        }
    }
}
