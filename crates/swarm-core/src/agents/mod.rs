//! Built-in agents.
//!
//! Each agent is a statically built trigger table over a fixed state set:
//!
//! - `ping`: answers `*.ping.request` once
//! - `roberts`: Robert's Rules motions (open, vote, close)
//! - `scrum`: sprint planning, dailies, review and retro
//! - `lean`: DMAIC improvement projects
//!
//! They chain through the log: a passed motion plans a sprint, a sprint
//! review with too many defects starts a lean project, and a validated lean
//! project asks the board for approval.

pub mod lean;
pub mod ping;
pub mod roberts;
pub mod scrum;

use crate::agent::{Agent, AgentBuildError, AgentBuilder, DEFAULT_HANDLER_TIMEOUT};
use crate::config::AgentsConfig;
use crate::handler::{Handler, HandlerContext, HandlerResult};
use crate::provider::{ContentProvider, ProposalContext};
use crate::state_machine::DEFAULT_HISTORY_LIMIT;
use std::sync::Arc;
use std::time::Duration;
use swarm_proto::{Command, Span};

/// Names accepted in `agents.enabled`.
pub const BUILTIN_AGENTS: &[&str] = &[ping::NAME, roberts::NAME, scrum::NAME, lean::NAME];

/// Settings shared by every built-in agent.
#[derive(Clone)]
pub struct BuiltinOptions {
    /// Consulted for command descriptions; `None` uses fixed text.
    pub provider: Option<Arc<dyn ContentProvider>>,
    pub handler_timeout: Duration,
    pub history_limit: usize,
}

impl Default for BuiltinOptions {
    fn default() -> Self {
        Self {
            provider: None,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl BuiltinOptions {
    pub fn from_config(config: &AgentsConfig) -> Self {
        Self {
            provider: None,
            handler_timeout: config.handler_timeout(),
            history_limit: config.history_limit,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn builder(&self, name: &str) -> AgentBuilder {
        Agent::builder(name)
            .handler_timeout(self.handler_timeout)
            .history_limit(self.history_limit)
    }

    fn describer(&self) -> Describer {
        Describer(self.provider.clone())
    }
}

/// Builds a built-in agent by name.
pub fn build_builtin(name: &str, options: &BuiltinOptions) -> Result<Agent, AgentBuildError> {
    match name {
        ping::NAME => ping::build(options),
        roberts::NAME => roberts::build(options),
        scrum::NAME => scrum::build(options),
        lean::NAME => lean::build(options),
        other => Err(AgentBuildError::UnknownAgent(other.to_string())),
    }
}

/// Attaches a description to outgoing commands, from the provider if any.
#[derive(Clone, Default)]
pub(crate) struct Describer(Option<Arc<dyn ContentProvider>>);

impl Describer {
    fn finish(&self, span: &Span, ctx: &HandlerContext, command: Command, fallback: &str) -> HandlerResult {
        let description = match &self.0 {
            Some(provider) => provider.propose(&ProposalContext {
                agent: ctx.agent.clone(),
                state: ctx.state.clone(),
                topic: span.name.clone(),
                command: command.fq_name.clone(),
                attributes: span.attributes.clone(),
            })?,
            None => fallback.to_string(),
        };
        Ok(Some(command.with_description(description)))
    }
}

type DescribedFn = fn(&Describer, &Span, &HandlerContext) -> HandlerResult;

/// Binds a handler function to a describer.
fn bind(describer: &Describer, f: DescribedFn) -> impl Handler + 'static {
    let describer = describer.clone();
    move |span: &Span, ctx: &HandlerContext| f(&describer, span, ctx)
}

/// Copies the listed attributes from `span` onto `command` as `--key value`.
fn carry(mut command: Command, span: &Span, keys: &[&str]) -> Command {
    for key in keys {
        if let Some(value) = span.attr_string(key) {
            command = command.arg(&key.replace('_', "-"), value);
        }
    }
    command
}
