//! Lean Six Sigma DMAIC projects.
//!
//! Each phase span advances the project and emits the next phase, so a
//! single `define` walks the project through to control. A validated project
//! in control asks governance to approve the change.

use super::{BuiltinOptions, Describer, bind, carry};
use crate::agent::{Agent, AgentBuildError};
use crate::handler::{Handler, HandlerContext, HandlerResult, require_attr};
use swarm_proto::{Command, Span};

pub const NAME: &str = "lean";

/// Attributes that follow a project through its phases.
const PROJECT_CONTEXT: &[&str] = &["validated", "sprint_number", "defect_rate"];

pub fn build(options: &BuiltinOptions) -> Result<Agent, AgentBuildError> {
    let d = options.describer();
    options
        .builder(NAME)
        .states(["DEFINE", "MEASURE", "ANALYZE", "IMPROVE", "CONTROL"])
        .initial("DEFINE")
        .on("*.project.define", "DEFINE", "MEASURE", advance(&d, "measure"))
        .on("*.project.measure", "MEASURE", "ANALYZE", advance(&d, "analyze"))
        .on("*.project.analyze", "ANALYZE", "IMPROVE", advance(&d, "improve"))
        .on("*.project.improve", "IMPROVE", "CONTROL", advance(&d, "control"))
        .on("*.project.control", "CONTROL", "DEFINE", bind(&d, request_approval))
        .build()
}

fn advance(d: &Describer, next: &'static str) -> impl Handler + 'static {
    let d = d.clone();
    move |span: &Span, ctx: &HandlerContext| -> HandlerResult {
        let project = require_attr(span, "project_id")?;
        let command = carry(
            Command::new(format!("lean.project.{next}")).arg("project-id", &project),
            span,
            PROJECT_CONTEXT,
        );
        d.finish(span, ctx, command, &format!("Move project {project} to {next}"))
    }
}

fn request_approval(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let project = require_attr(span, "project_id")?;
    let validated = span.attr("validated").and_then(|v| v.as_bool()).unwrap_or(false);
    if !validated {
        return Ok(None);
    }

    let command = Command::new("governance.motion.open")
        .arg("motion-id", format!("approve-{project}"))
        .arg("project-id", &project);
    d.finish(
        span,
        ctx,
        command,
        &format!("Request approval to standardize improvements from {project}"),
    )
}
