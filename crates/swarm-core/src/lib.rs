//! # swarm-core
//!
//! Agent choreography over a shared append-only span log.
//!
//! Agents never call each other. Each one tails the log, routes every new
//! span through its trigger table, checks the trigger's state guard, runs the
//! handler and, if a command comes back, moves to the trigger's destination
//! and appends the command as a new span caused by the one it saw.
//!
//! This crate provides:
//! - The log itself, incremental readers and persisted cursors
//! - Trigger tables, guarded state machines and agents built from them
//! - The dispatcher that turns commands into spans
//! - Built-in and config-declared agents
//! - Health scoring, the decision engine and the runners that drive it all

mod agent;
mod agents;
mod config;
mod cursor_store;
mod decision;
mod declared;
mod dispatcher;
mod handler;
mod health;
mod provider;
mod registry;
mod runner;
mod span_log;
mod span_reader;
mod state_machine;
pub mod testing;
mod trigger_table;

pub use agent::{Agent, AgentBuildError, AgentBuilder, DEFAULT_HANDLER_TIMEOUT};
pub use agents::{BUILTIN_AGENTS, BuiltinOptions, build_builtin};
pub use config::{
    AgentsConfig, ConfigError, ConfigWarning, DecisionRules, DeclaredAgentConfig, DeclaredTrigger,
    ExecutorConfig, HealthBands, HealthConfig, HealthWeights, LogConfig, StartAt, SwarmConfig,
};
pub use cursor_store::CursorStore;
pub use decision::{Decision, DecisionEngine, DecisionKind, rank};
pub use declared::{EmitHandler, build_all, build_declared, render};
pub use dispatcher::{
    CommandExecutor, DESCRIPTION_ATTR, DispatchError, Dispatcher, PRODUCER_ATTR, RetryConfig,
};
pub use handler::{Handler, HandlerContext, HandlerError, HandlerResult, require_attr};
pub use health::{
    HEALTH_PRODUCER, HealthBand, HealthScorer, HealthSnapshot, SAMPLE_SPAN, WorkStats,
};
pub use provider::{ContentProvider, ProposalContext, ProviderError};
pub use registry::{AgentRegistry, AgentSnapshot};
pub use runner::{
    AgentRunner, HealthCycle, HealthRunner, LoopStats, MAX_CONSECUTIVE_POLL_FAILURES, RunnerError,
    RunnerReport, ShutdownSignal, Swarm,
};
pub use span_log::SpanLog;
pub use span_reader::{MalformedLine, PollResult, SpanReader, StartPosition};
pub use state_machine::{
    DEFAULT_HISTORY_LIMIT, StateMachine, TransitionOutcome, TransitionRecord,
};
pub use trigger_table::{Trigger, TriggerTable, TriggerTableBuilder};
