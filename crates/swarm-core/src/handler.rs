//! Trigger handlers.
//!
//! A handler sees the triggering span and the agent's current state and
//! either asks for a follow-up command, asks for nothing, or fails. Handlers
//! never touch agent state; the state machine applies the declared
//! destination only after a handler returns a command.

use crate::provider::ProviderError;
use std::time::Duration;
use swarm_proto::{AgentId, Command, Span, StateId};

/// What a handler may know about the agent it runs for.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub agent: AgentId,
    pub state: StateId,
}

/// Errors raised by (or on behalf of) a handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    #[error("missing attribute '{0}'")]
    MissingAttribute(String),

    #[error("attribute '{key}' is invalid: {reason}")]
    InvalidAttribute { key: String, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0}")]
    Failed(String),
}

pub type HandlerResult = Result<Option<Command>, HandlerError>;

/// Reacts to one span.
pub trait Handler: Send + Sync {
    fn handle(&self, span: &Span, ctx: &HandlerContext) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&Span, &HandlerContext) -> HandlerResult + Send + Sync,
{
    fn handle(&self, span: &Span, ctx: &HandlerContext) -> HandlerResult {
        self(span, ctx)
    }
}

/// Reads a required attribute as text.
pub fn require_attr(span: &Span, key: &str) -> Result<String, HandlerError> {
    span.attr_string(key)
        .ok_or_else(|| HandlerError::MissingAttribute(key.to_string()))
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
