//! Decision engine: turns a health snapshot into ranked coordination decisions.

use crate::config::DecisionRules;
use crate::health::{HealthBand, HealthSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use swarm_proto::{AttrValue, Attributes, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    ScaleUp,
    ScaleDown,
    CoordinationImprove,
    Optimize,
    TelemetryEnhance,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::ScaleUp => "scale_up",
            DecisionKind::ScaleDown => "scale_down",
            DecisionKind::CoordinationImprove => "coordination_improve",
            DecisionKind::Optimize => "optimize",
            DecisionKind::TelemetryEnhance => "telemetry_enhance",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub id: String,
    pub kind: DecisionKind,
    /// Higher runs first.
    pub priority: u8,
    pub confidence: f64,
    pub reason: String,
    pub parameters: Attributes,
    /// Band of the snapshot that produced the decision.
    pub band: HealthBand,
}

impl Decision {
    pub fn new(kind: DecisionKind, band: HealthBand, priority: u8, confidence: f64, reason: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("decision_{}", &id[..12]),
            kind,
            priority,
            confidence,
            reason: reason.into(),
            parameters: Attributes::new(),
            band,
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// `swarm.decision.<kind>`
    pub fn command_name(&self) -> String {
        format!("swarm.decision.{}", self.kind)
    }

    /// The command that carries this decision onto the log.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(self.command_name())
            .arg("decision-id", &self.id)
            .arg("priority", self.priority)
            .arg("confidence", format!("{:.2}", self.confidence))
            .arg("band", self.band);
        for (key, value) in &self.parameters {
            command = command.arg(&key.replace('_', "-"), value);
        }
        command.with_description(self.reason.clone())
    }
}

/// Rule-based decision maker.
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    rules: DecisionRules,
}

impl DecisionEngine {
    pub fn new(rules: DecisionRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &DecisionRules {
        &self.rules
    }

    /// All decisions the snapshot's band calls for, best first.
    ///
    /// Ordered by priority, then confidence, then the order rules generated them.
    pub fn decide(&self, snapshot: &HealthSnapshot) -> Vec<Decision> {
        let r = &self.rules;
        let band = snapshot.band;
        let agents = snapshot.active_agents;
        let queue = snapshot.queue_depth();
        let completion = snapshot.completion_rate;
        let mut decisions = Vec::new();

        match band {
            HealthBand::Critical => {
                if agents < r.min_agents || completion < r.low_completion {
                    let target = r.min_agents.max(agents + 1).min(r.max_agents.max(r.min_agents));
                    decisions.push(
                        Decision::new(
                            DecisionKind::ScaleUp,
                            band,
                            10,
                            0.95,
                            format!(
                                "Emergency scale up: {agents} agents active, completion {completion:.2}"
                            ),
                        )
                        .with_param("target_agents", target),
                    );
                }
                if queue > r.max_queue {
                    decisions.push(
                        Decision::new(
                            DecisionKind::CoordinationImprove,
                            band,
                            9,
                            0.8,
                            format!("Critical queue size: {queue} items"),
                        )
                        .with_param("action", "clear_old_work")
                        .with_param("max_age_hours", 2i64),
                    );
                }
            }
            HealthBand::Degraded => {
                if completion < r.low_completion {
                    decisions.push(
                        Decision::new(
                            DecisionKind::ScaleUp,
                            band,
                            7,
                            0.8,
                            format!("Low completion rate: {completion:.2}"),
                        )
                        .with_param("target_agents", agents + 1),
                    );
                }
                if queue > r.degraded_queue {
                    decisions.push(
                        Decision::new(
                            DecisionKind::CoordinationImprove,
                            band,
                            6,
                            0.75,
                            format!("Queue building up: {queue} items"),
                        )
                        .with_param("action", "optimize_distribution"),
                    );
                }
            }
            HealthBand::Healthy => {
                if completion < r.high_completion {
                    decisions.push(
                        Decision::new(
                            DecisionKind::Optimize,
                            band,
                            4,
                            0.7,
                            format!("Room for improvement: {completion:.2} completion rate"),
                        )
                        .with_param("focus", "completion_rate"),
                    );
                }
            }
            HealthBand::Optimal => {
                if agents > r.max_agents || (agents > 3 && queue == 0) {
                    decisions.push(
                        Decision::new(
                            DecisionKind::ScaleDown,
                            band,
                            2,
                            0.8,
                            format!("System over-provisioned: {agents} agents, {queue} queued"),
                        )
                        .with_param("target_agents", 2.max(agents.saturating_sub(1))),
                    );
                }
                if snapshot.volume() < r.low_volume {
                    decisions.push(
                        Decision::new(
                            DecisionKind::TelemetryEnhance,
                            band,
                            1,
                            0.6,
                            "Opportunity to enhance telemetry collection",
                        )
                        .with_param("action", "increase_sampling"),
                    );
                }
            }
        }

        rank(&mut decisions);
        decisions
    }

    /// Keeps confident decisions, at most `max_decisions_per_cycle` of them.
    pub fn select(&self, decisions: Vec<Decision>) -> Vec<Decision> {
        decisions
            .into_iter()
            .filter(|d| d.confidence >= self.rules.confidence_threshold)
            .take(self.rules.max_decisions_per_cycle)
            .collect()
    }

    /// `decide` followed by `select`.
    pub fn plan(&self, snapshot: &HealthSnapshot) -> Vec<Decision> {
        self.select(self.decide(snapshot))
    }
}

/// Orders decisions by priority, then confidence, both descending.
///
/// The sort is stable, so full ties keep generation order.
pub fn rank(decisions: &mut [Decision]) {
    decisions.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::WorkStats;

    fn snapshot(band: HealthBand, agents: usize, pending: usize, completion: f64, volume: usize) -> HealthSnapshot {
        HealthSnapshot {
            taken_at: 0.0,
            window_secs: 300,
            stats: WorkStats {
                volume,
                pending,
                ..WorkStats::default()
            },
            active_agents: agents,
            completion_rate: completion,
            agent_score: 0.0,
            queue_score: 0.0,
            telemetry_score: 0.0,
            score: 0.0,
            band,
        }
    }

    fn kinds(decisions: &[Decision]) -> Vec<DecisionKind> {
        decisions.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_critical_scale_up_and_queue() {
        let engine = DecisionEngine::default();
        let decisions = engine.decide(&snapshot(HealthBand::Critical, 1, 20, 0.1, 30));

        assert_eq!(kinds(&decisions), vec![DecisionKind::ScaleUp, DecisionKind::CoordinationImprove]);
        assert_eq!(decisions[0].priority, 10);
        assert_eq!(decisions[0].parameters.get("target_agents"), Some(&AttrValue::Int(2)));
        assert_eq!(decisions[1].priority, 9);
    }

    #[test]
    fn test_critical_low_completion_alone_scales_up() {
        let engine = DecisionEngine::default();
        let decisions = engine.decide(&snapshot(HealthBand::Critical, 4, 0, 0.2, 30));
        assert_eq!(kinds(&decisions), vec![DecisionKind::ScaleUp]);
        assert_eq!(decisions[0].parameters.get("target_agents"), Some(&AttrValue::Int(5)));
    }

    #[test]
    fn test_degraded_rules() {
        let engine = DecisionEngine::default();
        let decisions = engine.decide(&snapshot(HealthBand::Degraded, 3, 6, 0.3, 30));
        assert_eq!(kinds(&decisions), vec![DecisionKind::ScaleUp, DecisionKind::CoordinationImprove]);

        let decisions = engine.decide(&snapshot(HealthBand::Degraded, 3, 5, 0.5, 30));
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_healthy_optimize() {
        let engine = DecisionEngine::default();
        let decisions = engine.decide(&snapshot(HealthBand::Healthy, 5, 1, 0.7, 30));
        assert_eq!(kinds(&decisions), vec![DecisionKind::Optimize]);
        assert!(engine.decide(&snapshot(HealthBand::Healthy, 5, 1, 0.85, 30)).is_empty());
    }

    #[test]
    fn test_optimal_scale_down_and_telemetry() {
        let engine = DecisionEngine::default();
        let decisions = engine.decide(&snapshot(HealthBand::Optimal, 6, 0, 1.0, 5));
        assert_eq!(kinds(&decisions), vec![DecisionKind::ScaleDown, DecisionKind::TelemetryEnhance]);
        assert_eq!(decisions[0].parameters.get("target_agents"), Some(&AttrValue::Int(5)));

        // Telemetry enhancement is below the default confidence threshold.
        let selected = engine.select(decisions);
        assert_eq!(kinds(&selected), vec![DecisionKind::ScaleDown]);
    }

    #[test]
    fn test_rank_orders_by_priority_then_confidence() {
        let band = HealthBand::Degraded;
        let mut decisions = vec![
            Decision::new(DecisionKind::Optimize, band, 4, 0.7, "low"),
            Decision::new(DecisionKind::ScaleUp, band, 7, 0.75, "high-less-sure"),
            Decision::new(DecisionKind::TelemetryEnhance, band, 1, 0.95, "lowest"),
            Decision::new(DecisionKind::ScaleDown, band, 7, 0.9, "high-sure"),
        ];
        rank(&mut decisions);

        let reasons: Vec<_> = decisions.iter().map(|d| d.reason.as_str()).collect();
        assert_eq!(reasons, vec!["high-sure", "high-less-sure", "low", "lowest"]);
    }

    #[test]
    fn test_rank_keeps_generation_order_on_full_ties() {
        let band = HealthBand::Healthy;
        let mut decisions = vec![
            Decision::new(DecisionKind::Optimize, band, 5, 0.8, "first"),
            Decision::new(DecisionKind::ScaleUp, band, 9, 0.6, "top"),
            Decision::new(DecisionKind::ScaleDown, band, 5, 0.8, "second"),
            Decision::new(DecisionKind::CoordinationImprove, band, 5, 0.8, "third"),
        ];
        rank(&mut decisions);

        let reasons: Vec<_> = decisions.iter().map(|d| d.reason.as_str()).collect();
        assert_eq!(reasons, vec!["top", "first", "second", "third"]);

        let engine = DecisionEngine::default();
        let selected = engine.select(decisions);
        let reasons: Vec<_> = selected.iter().map(|d| d.reason.as_str()).collect();
        assert_eq!(reasons, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_select_caps_per_cycle() {
        let engine = DecisionEngine::new(DecisionRules {
            max_decisions_per_cycle: 1,
            ..DecisionRules::default()
        });
        let plan = engine.plan(&snapshot(HealthBand::Critical, 0, 50, 0.0, 0));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind, DecisionKind::ScaleUp);
    }

    #[test]
    fn test_to_command() {
        let decision = Decision::new(DecisionKind::ScaleUp, HealthBand::Critical, 10, 0.95, "Emergency")
            .with_param("target_agents", 2usize);
        let command = decision.to_command();
        assert_eq!(command.fq_name, "swarm.decision.scale_up");
        assert_eq!(command.description, "Emergency");

        let attrs = command.to_attributes();
        assert_eq!(attrs.get("decision_id"), Some(&AttrValue::Str(decision.id.clone())));
        assert_eq!(attrs.get("target_agents"), Some(&AttrValue::Str("2".into())));
        assert_eq!(attrs.get("band"), Some(&AttrValue::Str("critical".into())));
        assert_eq!(attrs.get("priority"), Some(&AttrValue::Str("10".into())));
    }
}
