//! Health scoring over the span log.
//!
//! A sample looks at the spans inside the scoring window and the agent
//! registry, and reduces them to four sub-metrics in `[0, 1]`:
//!
//! | metric     | source                                                 |
//! |------------|--------------------------------------------------------|
//! | completion | completed work items / work items (0.0 with no work)   |
//! | agents     | active agents against the target range                 |
//! | queue      | `1 - pending / queue_capacity`, floored at 0           |
//! | telemetry  | `spans in window / volume_floor`, capped at 1          |
//!
//! A *work item* is any span the dispatcher stamped with a producer other
//! than the health engine. It is *completed* once some other span names it
//! as its parent, and *pending* until then. Spans matching one of the
//! configured terminal patterns (`*.ping.pong`, `*.sprint.closed`, ...) end
//! their chain, so they are completed on arrival.

use crate::config::{HealthBands, HealthConfig};
use crate::dispatcher::PRODUCER_ATTR;
use crate::registry::AgentRegistry;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use swarm_proto::{Span, SpanStatus, SuffixPattern};

/// Producer name the health engine stamps on its own spans.
pub const HEALTH_PRODUCER: &str = "swarm.health";

/// Name of the span recorded once per decision cycle.
pub const SAMPLE_SPAN: &str = "swarm.health.sample";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBand {
    Critical,
    Degraded,
    Healthy,
    Optimal,
}

impl HealthBand {
    pub fn classify(score: f64, bands: &HealthBands) -> Self {
        if score < bands.critical {
            HealthBand::Critical
        } else if score < bands.degraded {
            HealthBand::Degraded
        } else if score < bands.optimal {
            HealthBand::Healthy
        } else {
            HealthBand::Optimal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthBand::Critical => "critical",
            HealthBand::Degraded => "degraded",
            HealthBand::Healthy => "healthy",
            HealthBand::Optimal => "optimal",
        }
    }
}

impl fmt::Display for HealthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw counts over the scoring window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkStats {
    /// Spans inside the window.
    pub volume: usize,
    pub work_items: usize,
    pub completed: usize,
    pub pending: usize,
    pub error_spans: usize,
    /// Producers seen recently enough to count as active.
    pub producers: BTreeSet<String>,
}

impl WorkStats {
    /// Counts work over `spans`.
    ///
    /// Spans with `timestamp >= since` are in the window; producers are only
    /// counted when `timestamp >= active_since`. Parent links are looked up
    /// across every span given, so a late child still completes its parent.
    /// Work matching a `terminal` pattern is completed without a child.
    pub fn collect(spans: &[Span], since: f64, active_since: f64, terminal: &[SuffixPattern]) -> Self {
        let parents: HashSet<&str> = spans
            .iter()
            .filter_map(|s| s.parent_id.as_deref())
            .filter(|p| !p.is_empty())
            .collect();

        let mut stats = WorkStats::default();
        for span in spans.iter().filter(|s| s.timestamp >= since) {
            stats.volume += 1;
            if matches!(span.status, SpanStatus::Error { .. }) {
                stats.error_spans += 1;
            }

            let Some(producer) = span.attr(PRODUCER_ATTR).and_then(|v| v.as_str()) else {
                continue;
            };
            if producer == HEALTH_PRODUCER {
                continue;
            }

            if span.timestamp >= active_since {
                stats.producers.insert(producer.to_string());
            }

            stats.work_items += 1;
            if parents.contains(span.span_id.as_str()) || terminal.iter().any(|p| p.matches(&span.name)) {
                stats.completed += 1;
            } else {
                stats.pending += 1;
            }
        }
        stats
    }

    pub fn completion_rate(&self) -> f64 {
        if self.work_items == 0 {
            0.0
        } else {
            self.completed as f64 / self.work_items as f64
        }
    }
}

/// One health sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub taken_at: f64,
    pub window_secs: u64,
    pub stats: WorkStats,
    pub active_agents: usize,
    pub completion_rate: f64,
    pub agent_score: f64,
    pub queue_score: f64,
    pub telemetry_score: f64,
    pub score: f64,
    pub band: HealthBand,
}

impl HealthSnapshot {
    pub fn queue_depth(&self) -> usize {
        self.stats.pending
    }

    pub fn volume(&self) -> usize {
        self.stats.volume
    }

    /// The span that records this sample in the log.
    pub fn to_span(&self) -> Span {
        Span::new(SAMPLE_SPAN)
            .with_attr(PRODUCER_ATTR, HEALTH_PRODUCER)
            .with_attr("health.score", round3(self.score))
            .with_attr("health.band", self.band.as_str())
            .with_attr("health.completion_rate", round3(self.completion_rate))
            .with_attr("health.active_agents", self.active_agents)
            .with_attr("health.queue_depth", self.stats.pending)
            .with_attr("health.volume", self.stats.volume)
            .with_attr("health.work_items", self.stats.work_items)
            .with_attr("health.error_spans", self.stats.error_spans)
            .with_attr("health.window_secs", self.window_secs as i64)
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Computes health snapshots.
#[derive(Debug, Clone)]
pub struct HealthScorer {
    config: HealthConfig,
    terminal: Vec<SuffixPattern>,
    registry: Option<AgentRegistry>,
}

impl HealthScorer {
    /// Terminal patterns that fail to parse are ignored; `SwarmConfig::validate`
    /// rejects them up front.
    pub fn new(config: HealthConfig) -> Self {
        let terminal = config
            .terminal_spans
            .iter()
            .filter_map(|p| SuffixPattern::parse(p).ok())
            .collect();
        Self {
            config,
            terminal,
            registry: None,
        }
    }

    /// Counts active agents from the registry instead of from span producers.
    #[must_use]
    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Samples health from `spans` as of `now`.
    pub fn sample(&self, spans: &[Span], now: f64) -> HealthSnapshot {
        let since = now - self.config.window_secs as f64;
        let active_since = now - self.config.stale_after_secs as f64;
        let stats = WorkStats::collect(spans, since, active_since, &self.terminal);

        let active_agents = match &self.registry {
            Some(registry) if !registry.is_empty() => {
                registry.active_count(now, self.config.stale_after_secs as f64)
            }
            _ => stats.producers.len(),
        };

        let completion_rate = stats.completion_rate();
        let agent_score = self.agent_score(active_agents);
        let queue_score = self.queue_score(stats.pending);
        let telemetry_score = self.telemetry_score(stats.volume);
        let score = self.score(completion_rate, agent_score, queue_score, telemetry_score);

        HealthSnapshot {
            taken_at: now,
            window_secs: self.config.window_secs,
            stats,
            active_agents,
            completion_rate,
            agent_score,
            queue_score,
            telemetry_score,
            score,
            band: HealthBand::classify(score, &self.config.bands),
        }
    }

    /// `n / low` below the target range, 1 inside it, `high / n` above it.
    pub fn agent_score(&self, active: usize) -> f64 {
        let low = self.config.target_agents_low;
        let high = self.config.target_agents_high;
        if active < low {
            active as f64 / low as f64
        } else if active <= high {
            1.0
        } else {
            high as f64 / active as f64
        }
    }

    pub fn queue_score(&self, pending: usize) -> f64 {
        if self.config.queue_capacity == 0 {
            return if pending == 0 { 1.0 } else { 0.0 };
        }
        (1.0 - pending as f64 / self.config.queue_capacity as f64).max(0.0)
    }

    pub fn telemetry_score(&self, volume: usize) -> f64 {
        if self.config.volume_floor == 0 {
            return 1.0;
        }
        (volume as f64 / self.config.volume_floor as f64).min(1.0)
    }

    /// Weighted sum of the sub-metrics, clamped to `[0, 1]`.
    pub fn score(&self, completion: f64, agents: f64, queue: f64, telemetry: f64) -> f64 {
        let w = &self.config.weights;
        (w.completion * completion + w.agents * agents + w.queue * queue + w.telemetry * telemetry)
            .clamp(0.0, 1.0)
    }
}
