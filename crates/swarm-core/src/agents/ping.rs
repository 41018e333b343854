//! Minimal agent: answers one ping.

use super::{BuiltinOptions, Describer, bind};
use crate::agent::{Agent, AgentBuildError};
use crate::handler::{HandlerContext, HandlerResult};
use swarm_proto::{Command, Span};

pub const NAME: &str = "ping";

pub fn build(options: &BuiltinOptions) -> Result<Agent, AgentBuildError> {
    let d = options.describer();
    options
        .builder(NAME)
        .states(["IDLE", "PINGED"])
        .initial("IDLE")
        .on("*.ping.request", "IDLE", "PINGED", bind(&d, pong))
        .build()
}

fn pong(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let ping_id = span
        .attr_string("ping_id")
        .unwrap_or_else(|| span.span_id.clone());
    let command = Command::new("swarmsh.ping.pong").arg("ping-id", ping_id);
    d.finish(span, ctx, command, "Reply to ping")
}
