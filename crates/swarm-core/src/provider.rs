//! Content providers: the narrow seam to whatever writes human-facing text.
//!
//! Built-in agents ask a provider for the description attached to the
//! commands they emit. A provider may be slow or fail; the agent's handler
//! timeout covers it and a failure becomes a handler failure.

use swarm_proto::{AgentId, Attributes, StateId};

/// What the provider is asked to describe.
#[derive(Debug, Clone)]
pub struct ProposalContext {
    pub agent: AgentId,
    /// The agent's state when the trigger fired.
    pub state: StateId,
    /// Name of the triggering span.
    pub topic: String,
    /// The command about to be emitted.
    pub command: String,
    /// Attributes of the triggering span.
    pub attributes: Attributes,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

/// Produces text for a command.
pub trait ContentProvider: Send + Sync {
    fn propose(&self, ctx: &ProposalContext) -> Result<String, ProviderError>;
}
