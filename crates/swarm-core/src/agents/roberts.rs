//! Robert's Rules of Order: motions are opened, voted on and closed.
//!
//! A passed motion that carries a `sprint_number` asks scrum to plan that
//! sprint. Once a motion is closed the floor accepts the next one.

use super::{BuiltinOptions, Describer, bind, carry};
use crate::agent::{Agent, AgentBuildError};
use crate::handler::{HandlerContext, HandlerError, HandlerResult, require_attr};
use swarm_proto::{Command, Span};

pub const NAME: &str = "roberts";

/// Attributes that follow a motion from opening to close. Votes cast before
/// the vote is called travel with the motion.
const MOTION_CONTEXT: &[&str] = &["meeting_id", "sprint_number", "team_id", "votes_yes", "votes_no"];

pub fn build(options: &BuiltinOptions) -> Result<Agent, AgentBuildError> {
    let d = options.describer();
    options
        .builder(NAME)
        .states(["IDLE", "MOTION_OPEN", "VOTING", "CLOSED"])
        .initial("IDLE")
        .on("*.motion.open", "IDLE|CLOSED", "MOTION_OPEN", bind(&d, open_motion))
        .on("*.motion.vote", "MOTION_OPEN", "VOTING", bind(&d, call_vote))
        .on("*.motion.close", "VOTING", "CLOSED", bind(&d, close_motion))
        .on("*.motion.reset", "*", "IDLE", bind(&d, reset))
        .build()
}

fn open_motion(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let motion = require_attr(span, "motion_id")?;
    let command = carry(
        Command::new("governance.motion.vote").arg("motion-id", &motion),
        span,
        MOTION_CONTEXT,
    );
    d.finish(span, ctx, command, &format!("Call the vote on motion {motion}"))
}

fn call_vote(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let motion = require_attr(span, "motion_id")?;
    let mut command = carry(
        Command::new("governance.motion.close").arg("motion-id", &motion),
        span,
        MOTION_CONTEXT,
    );
    if let Some(result) = tally(span)? {
        command = command.arg("result", result);
    }
    d.finish(span, ctx, command, &format!("Close voting on motion {motion}"))
}

fn close_motion(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let motion = require_attr(span, "motion_id")?;
    let passed = tally(span)? == Some("passed");
    let Some(sprint) = span.attr_string("sprint_number").filter(|_| passed) else {
        return Ok(None);
    };

    let command = carry(
        Command::new("scrum.sprint.plan")
            .arg("sprint-number", &sprint)
            .arg("motion-id", &motion),
        span,
        &["team_id"],
    );
    d.finish(span, ctx, command, &format!("Plan sprint {sprint} approved by motion {motion}"))
}

fn reset(d: &Describer, span: &Span, ctx: &HandlerContext) -> HandlerResult {
    let command = carry(Command::new("governance.motion.cleared"), span, &["motion_id"]);
    d.finish(span, ctx, command, "Clear the floor")
}

/// The motion's result: an explicit `result`, or `passed`/`failed` from
/// `votes_yes` and `votes_no`. `None` when neither is present.
fn tally(span: &Span) -> Result<Option<&'static str>, HandlerError> {
    if let Some(result) = span.attr_string("result") {
        return Ok(Some(if result.eq_ignore_ascii_case("passed") { "passed" } else { "failed" }));
    }

    let count = |key: &str| -> Result<Option<f64>, HandlerError> {
        span.attr(key)
            .map(|v| {
                v.as_f64().ok_or_else(|| HandlerError::InvalidAttribute {
                    key: key.to_string(),
                    reason: format!("expected a number, got '{v}'"),
                })
            })
            .transpose()
    };

    match (count("votes_yes")?, count("votes_no")?) {
        (Some(yes), Some(no)) => Ok(Some(if yes > no { "passed" } else { "failed" })),
        _ => Ok(None),
    }
}
