//! Agent registry: a shared view of every running agent.
//!
//! Runners write snapshots of their agent after each poll; the health scorer
//! and the CLI read them. The registry holds copies, never the agents.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use swarm_proto::{AgentId, StateId, now_seconds};

/// Point-in-time copy of one agent's observable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub state: StateId,
    /// Last time the agent's runner completed a poll (seconds since epoch).
    pub last_seen: f64,
    pub spans_seen: u64,
    pub transitions: u64,
    pub skipped: u64,
    pub observed: u64,
    pub handler_failures: u64,
    pub commands_emitted: u64,
    pub malformed_lines: u64,
}

impl AgentSnapshot {
    pub fn new(id: AgentId, state: StateId) -> Self {
        Self {
            id,
            state,
            last_seen: now_seconds(),
            spans_seen: 0,
            transitions: 0,
            skipped: 0,
            observed: 0,
            handler_failures: 0,
            commands_emitted: 0,
            malformed_lines: 0,
        }
    }

    /// True if the agent was seen within `stale_after_secs` of `now`.
    pub fn is_active(&self, now: f64, stale_after_secs: f64) -> bool {
        now - self.last_seen <= stale_after_secs
    }
}

/// Cloneable handle to the shared snapshot map.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<RwLock<BTreeMap<AgentId, AgentSnapshot>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an agent, replacing any previous entry with the same id.
    pub fn register(&self, id: &AgentId, state: &StateId) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(id.clone(), AgentSnapshot::new(id.clone(), state.clone()));
    }

    /// Updates an agent's snapshot in place and refreshes `last_seen`.
    ///
    /// Unknown agents are registered on first update.
    pub fn update(&self, id: &AgentId, state: &StateId, f: impl FnOnce(&mut AgentSnapshot)) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = map
            .entry(id.clone())
            .or_insert_with(|| AgentSnapshot::new(id.clone(), state.clone()));
        entry.state = state.clone();
        entry.last_seen = now_seconds();
        f(entry);
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentSnapshot> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(id).cloned()
    }

    /// All snapshots, ordered by agent id.
    pub fn snapshots(&self) -> Vec<AgentSnapshot> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.values().cloned().collect()
    }

    /// Number of agents seen within `stale_after_secs` of `now`.
    pub fn active_count(&self, now: f64, stale_after_secs: f64) -> usize {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .filter(|s| s.is_active(now, stale_after_secs))
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
