//! Scrum at scale: sprints move from planning to execution, review and retro.
//!
//! A sprint review whose defect rate exceeds the quality threshold starts a
//! lean improvement project instead of going straight to retro.

use super::{BuiltinOptions, Describer, bind, carry};
use crate::agent::{Agent, AgentBuildError};
use crate::handler::{HandlerContext, HandlerError, HandlerResult, require_attr};
use swarm_proto::{Command, Span};

pub const NAME: &str = "scrum";

/// Defect rate (percent) above which a review triggers a lean project.
pub const DEFECT_THRESHOLD: f64 = 3.0;

pub fn build(options: &BuiltinOptions) -> Result<Agent, AgentBuildError> {
    let d = options.describer();
    options
        .builder(NAME)
        .states(["PLANNING", "EXECUTING", "REVIEW", "RETRO"])
        .initial("PLANNING")
        .on("*.sprint.plan", "PLANNING", "EXECUTING", bind(&d, plan_sprint))
        .on("*.sprint.daily", "EXECUTING", "EXECUTING", bind(&d, daily))
        .on("*.sprint.review", "EXECUTING", "REVIEW", bind(&d, review))
        .on("*.sprint.retro", "REVIEW", "PLANNING", bind(&d, retro))
        .build()
}

fn plan_sprint(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let sprint = require_attr(span, "sprint_number")?;
    let command = carry(
        Command::new("scrum.backlog.populate").arg("sprint-number", &sprint),
        span,
        &["team_id", "capacity"],
    );
    d.finish(span, ctx, command, &format!("Populate the backlog for sprint {sprint}"))
}

fn daily(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let Some(blockers) = span.attr_string("blockers").filter(|b| has_blockers(b)) else {
        return Ok(None);
    };
    let command = carry(
        Command::new("scrum.blockers.escalate").arg("blockers", &blockers),
        span,
        &["sprint_number", "team_id"],
    );
    d.finish(span, ctx, command, "Escalate blockers raised at the daily")
}

fn review(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let sprint = require_attr(span, "sprint_number")?;
    let defect_rate = match span.attr("defect_rate") {
        None => 0.0,
        Some(value) => value.as_f64().ok_or_else(|| HandlerError::InvalidAttribute {
            key: "defect_rate".to_string(),
            reason: format!("expected a number, got '{value}'"),
        })?,
    };

    if defect_rate > DEFECT_THRESHOLD {
        let command = Command::new("lean.project.define")
            .arg("project-id", format!("defect-sprint{sprint}"))
            .arg("sprint-number", &sprint)
            .arg("defect-rate", defect_rate);
        return d.finish(
            span,
            ctx,
            command,
            &format!("Sprint {sprint} defect rate {defect_rate}% exceeds {DEFECT_THRESHOLD}%, start DMAIC"),
        );
    }

    let command = carry(
        Command::new("scrum.sprint.retro").arg("sprint-number", &sprint),
        span,
        &["velocity", "team_id"],
    );
    d.finish(span, ctx, command, &format!("Hold the retrospective for sprint {sprint}"))
}

fn retro(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let command = carry(Command::new("scrum.sprint.closed"), span, &["sprint_number", "team_id"]);
    d.finish(span, ctx, command, "Close the sprint")
}

/// Blockers arrive as text, or as a JSON list rendered to text.
fn has_blockers(raw: &str) -> bool {
    let trimmed = raw.trim();
    !(trimmed.is_empty() || trimmed == "[]" || trimmed.eq_ignore_ascii_case("none"))
}
