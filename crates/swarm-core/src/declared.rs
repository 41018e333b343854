//! Agents declared in configuration.
//!
//! A declared agent is built from its YAML definition the same way built-in
//! agents are built in code: a state set, an initial state, and a trigger
//! table. Every trigger gets an `EmitHandler` that renders its command from
//! the triggering span.

use crate::agent::{Agent, AgentBuildError};
use crate::config::{AgentsConfig, DeclaredAgentConfig, DeclaredTrigger};
use crate::handler::{Handler, HandlerContext, HandlerError, HandlerResult};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use swarm_proto::{Command, Delivery, Span};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_.\-]+)\}").expect("placeholder pattern is valid"));

/// Renders a configured command from the triggering span.
///
/// `{key}` placeholders in the command name, arguments and description are
/// replaced with the span attribute `key`. `{span_id}`, `{trace_id}` and
/// `{name}` refer to the span itself. A placeholder with no value fails the
/// handler.
#[derive(Debug, Clone)]
pub struct EmitHandler {
    emit: Option<String>,
    args: Vec<String>,
    description: String,
    delivery: Delivery,
}

impl EmitHandler {
    pub fn new(emit: Option<String>, args: Vec<String>, description: String, delivery: Delivery) -> Self {
        Self {
            emit,
            args,
            description,
            delivery,
        }
    }

    pub fn from_trigger(trigger: &DeclaredTrigger) -> Self {
        Self::new(
            trigger.emit.clone(),
            trigger.args.clone(),
            trigger.description.clone(),
            trigger.delivery,
        )
    }
}

impl Handler for EmitHandler {
    fn handle(&self, span: &Span, _ctx: &HandlerContext) -> HandlerResult {
        let Some(emit) = &self.emit else {
            return Ok(None);
        };

        let args = self
            .args
            .iter()
            .map(|arg| render(arg, span))
            .collect::<Result<Vec<_>, _>>()?;

        let mut command = Command::new(render(emit, span)?)
            .with_args(args)
            .with_description(render(&self.description, span)?);
        command.delivery = self.delivery;
        Ok(Some(command))
    }
}

/// Substitutes `{key}` placeholders from the span.
pub fn render(template: &str, span: &Span) -> Result<String, HandlerError> {
    let mut missing: Option<String> = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let key = &caps[1];
        let value = match key {
            "span_id" => Some(span.span_id.clone()),
            "trace_id" => Some(span.trace_id.clone()),
            "name" => Some(span.name.clone()),
            _ => span.attr_string(key),
        };
        value.unwrap_or_else(|| {
            missing.get_or_insert_with(|| key.to_string());
            String::new()
        })
    });

    match missing {
        Some(key) => Err(HandlerError::MissingAttribute(key)),
        None => Ok(rendered.into_owned()),
    }
}

/// Builds one declared agent.
pub fn build_declared(
    name: &str,
    config: &DeclaredAgentConfig,
    agents: &AgentsConfig,
) -> Result<Agent, AgentBuildError> {
    let mut builder = Agent::builder(name)
        .states(config.states.iter().cloned())
        .handler_timeout(agents.handler_timeout())
        .history_limit(agents.history_limit);

    if let Some(initial) = &config.initial {
        builder = builder.initial(initial.as_str());
    }
    if let Some(namespace) = &config.namespace {
        builder = builder.namespace(namespace.as_str());
    }

    for trigger in &config.triggers {
        builder = builder.on(
            &trigger.on,
            trigger.from.as_str(),
            trigger.to.as_str(),
            EmitHandler::from_trigger(trigger),
        );
    }

    builder.build()
}

/// Builds every declared agent in name order.
pub fn build_all(agents: &AgentsConfig) -> Result<Vec<Agent>, AgentBuildError> {
    agents
        .declared
        .iter()
        .map(|(name, config)| build_declared(name, config, agents))
        .collect()
}
