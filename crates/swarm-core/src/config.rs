//! Configuration for a swarm: the shared log, agents, health loop and executor.
//!
//! Loaded from YAML (default `swarm.yml`). Every field has a default, so an
//! empty file runs the built-in agents against `.swarm/spans.jsonl`.

use crate::agent::AgentBuildError;
use crate::agents::BUILTIN_AGENTS;
use crate::declared;
use crate::dispatcher::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarm_proto::{Delivery, SuffixPattern};
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Shared span log and reader settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Append retry policy.
    #[serde(default)]
    pub dispatch: RetryConfig,

    /// Built-in and declared agents.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Health scoring and decision loop.
    #[serde(default)]
    pub health: HealthConfig,

    /// External command executor.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Suppress all warnings (for CI environments).
    #[serde(default, rename = "_suppress_warnings")]
    pub suppress_warnings: bool,
}

impl SwarmConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config = Self::parse_yaml(&content)?;
        debug!(
            log = %config.log.path.display(),
            agents = config.agents.enabled.len(),
            declared = config.agents.declared.len(),
            health = config.health.enabled,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parses configuration from YAML text. Blank text yields the defaults.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validates the configuration and returns warnings.
    ///
    /// Hard errors: health weights that are negative or do not sum to 1,
    /// band thresholds out of order, an inverted agent target range, agent
    /// names that collide, and declared agents that do not build.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        self.health.weights.validate()?;
        self.health.bands.validate()?;

        if self.health.target_agents_low > self.health.target_agents_high {
            return Err(ConfigError::InvalidValue {
                field: "health.target_agents_low".to_string(),
                message: format!(
                    "{} is above target_agents_high ({})",
                    self.health.target_agents_low, self.health.target_agents_high
                ),
            });
        }

        for pattern in &self.health.terminal_spans {
            SuffixPattern::parse(pattern).map_err(|e| ConfigError::InvalidValue {
                field: "health.terminal_spans".to_string(),
                message: e.to_string(),
            })?;
        }

        for name in self.agents.declared.keys() {
            if self.agents.enabled.iter().any(|enabled| enabled == name) {
                return Err(ConfigError::DuplicateAgent(name.clone()));
            }
        }

        for (name, declared_agent) in &self.agents.declared {
            declared::build_declared(name, declared_agent, &self.agents)?;
        }

        if self.suppress_warnings {
            return Ok(warnings);
        }

        for name in &self.agents.enabled {
            if !BUILTIN_AGENTS.contains(&name.as_str()) {
                warnings.push(ConfigWarning::UnknownAgent { name: name.clone() });
            }
        }

        if self.agents.enabled.is_empty() && self.agents.declared.is_empty() {
            warnings.push(ConfigWarning::InvalidValue {
                field: "agents".to_string(),
                message: "No agents enabled or declared; only the health loop will run".to_string(),
            });
        }

        if self.log.poll_interval_ms == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "log.poll_interval_ms".to_string(),
                message: "0 would spin; using 1ms".to_string(),
            });
        }

        if self.health.enabled && self.health.interval_secs == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "health.interval_secs".to_string(),
                message: "0 would spin; using 1s".to_string(),
            });
        }

        if self.executor.program.is_none() {
            let external = self
                .agents
                .declared
                .values()
                .flat_map(|a| &a.triggers)
                .any(|t| t.delivery == Delivery::External);
            if external {
                warnings.push(ConfigWarning::InvalidValue {
                    field: "executor.program".to_string(),
                    message: "External triggers are declared but no executor is configured; \
                              their commands will be appended to the log"
                        .to_string(),
                });
            }
        }

        Ok(warnings)
    }
}

/// Where a fresh reader starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartAt {
    /// Replay the whole log.
    Beginning,
    /// Only react to spans appended after start-up.
    #[default]
    End,
}

/// Shared log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Path of the shared JSONL span log.
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    /// Where readers start when no saved offset exists.
    #[serde(default)]
    pub start_at: StartAt,

    /// Interval between polls of the log.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Directory for per-agent offsets. When set, agents resume where they stopped.
    #[serde(default)]
    pub cursor_dir: Option<PathBuf>,
}

fn default_log_path() -> PathBuf {
    PathBuf::from(".swarm/spans.jsonl")
}

fn default_poll_interval_ms() -> u64 {
    200
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            start_at: StartAt::default(),
            poll_interval_ms: default_poll_interval_ms(),
            cursor_dir: None,
        }
    }
}

impl LogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Built-in agents to run.
    #[serde(default = "default_enabled_agents")]
    pub enabled: Vec<String>,

    /// Upper bound on a single handler call.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// Transitions kept per agent for introspection.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Agents declared entirely in configuration.
    #[serde(default)]
    pub declared: BTreeMap<String, DeclaredAgentConfig>,
}

fn default_enabled_agents() -> Vec<String> {
    BUILTIN_AGENTS.iter().map(ToString::to_string).collect()
}

fn default_handler_timeout_ms() -> u64 {
    5000
}

fn default_history_limit() -> usize {
    100
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_agents(),
            handler_timeout_ms: default_handler_timeout_ms(),
            history_limit: default_history_limit(),
            declared: BTreeMap::new(),
        }
    }
}

impl AgentsConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// An agent declared in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredAgentConfig {
    /// The agent's state set.
    pub states: Vec<String>,

    /// Initial state; defaults to the first declared state.
    #[serde(default)]
    pub initial: Option<String>,

    /// Only react to span names starting with this prefix.
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub triggers: Vec<DeclaredTrigger>,
}

/// One declared trigger.
///
/// `args` may contain `{attribute}` placeholders filled from the triggering
/// span. Without `emit` the trigger only observes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredTrigger {
    /// Suffix pattern, e.g. `*.deploy.request`.
    pub on: String,

    /// Required source state, `A|B` for any of several, or `*` for any.
    #[serde(default = "default_any_state")]
    pub from: String,

    /// Destination state.
    pub to: String,

    /// Command to emit.
    #[serde(default)]
    pub emit: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub delivery: Delivery,
}

fn default_any_state() -> String {
    "*".to_string()
}

/// Health scoring and decision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Run the health loop alongside the agents.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between decision cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Only spans this recent are scored.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Agents not seen for this long are not counted as active.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Lower end of the ideal active agent range.
    #[serde(default = "default_target_agents_low")]
    pub target_agents_low: usize,

    /// Upper end of the ideal active agent range.
    #[serde(default = "default_target_agents_high")]
    pub target_agents_high: usize,

    /// Queue depth at which the queue score reaches zero.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Span volume at which the telemetry score saturates.
    #[serde(default = "default_volume_floor")]
    pub volume_floor: usize,

    /// Suffix patterns of spans that end a chain. Nothing answers them, so
    /// they count as completed work as soon as they are recorded.
    #[serde(default = "default_terminal_spans")]
    pub terminal_spans: Vec<String>,

    #[serde(default)]
    pub weights: HealthWeights,

    #[serde(default)]
    pub bands: HealthBands,

    #[serde(default)]
    pub decisions: DecisionRules,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

fn default_window_secs() -> u64 {
    300
}

fn default_stale_after_secs() -> u64 {
    60
}

fn default_target_agents_low() -> usize {
    5
}

fn default_target_agents_high() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    10
}

fn default_volume_floor() -> usize {
    20
}

fn default_terminal_spans() -> Vec<String> {
    [
        "*.ping.pong",
        "*.motion.cleared",
        "*.backlog.populate",
        "*.blockers.escalate",
        "*.sprint.closed",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            window_secs: default_window_secs(),
            stale_after_secs: default_stale_after_secs(),
            target_agents_low: default_target_agents_low(),
            target_agents_high: default_target_agents_high(),
            queue_capacity: default_queue_capacity(),
            volume_floor: default_volume_floor(),
            terminal_spans: default_terminal_spans(),
            weights: HealthWeights::default(),
            bands: HealthBands::default(),
            decisions: DecisionRules::default(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Weights of the four health sub-metrics. Must be non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    #[serde(default = "default_completion_weight")]
    pub completion: f64,
    #[serde(default = "default_agents_weight")]
    pub agents: f64,
    #[serde(default = "default_queue_weight")]
    pub queue: f64,
    #[serde(default = "default_telemetry_weight")]
    pub telemetry: f64,
}

fn default_completion_weight() -> f64 {
    0.4
}

fn default_agents_weight() -> f64 {
    0.3
}

fn default_queue_weight() -> f64 {
    0.2
}

fn default_telemetry_weight() -> f64 {
    0.1
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            completion: default_completion_weight(),
            agents: default_agents_weight(),
            queue: default_queue_weight(),
            telemetry: default_telemetry_weight(),
        }
    }
}

impl HealthWeights {
    const TOLERANCE: f64 = 1e-6;

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, weight) in [
            ("completion", self.completion),
            ("agents", self.agents),
            ("queue", self.queue),
            ("telemetry", self.telemetry),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::NegativeWeight {
                    field: field.to_string(),
                    value: weight,
                });
            }
        }

        let sum = self.completion + self.agents + self.queue + self.telemetry;
        if (sum - 1.0).abs() > Self::TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

/// Score thresholds between health bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthBands {
    /// Below this the system is critical.
    #[serde(default = "default_critical_band")]
    pub critical: f64,
    /// Below this the system is degraded.
    #[serde(default = "default_degraded_band")]
    pub degraded: f64,
    /// At or above this the system is optimal.
    #[serde(default = "default_optimal_band")]
    pub optimal: f64,
}

fn default_critical_band() -> f64 {
    0.3
}

fn default_degraded_band() -> f64 {
    0.6
}

fn default_optimal_band() -> f64 {
    0.9
}

impl Default for HealthBands {
    fn default() -> Self {
        Self {
            critical: default_critical_band(),
            degraded: default_degraded_band(),
            optimal: default_optimal_band(),
        }
    }
}

impl HealthBands {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 <= self.critical
            && self.critical <= self.degraded
            && self.degraded <= self.optimal
            && self.optimal <= 1.0;
        if !ordered {
            return Err(ConfigError::InvalidValue {
                field: "health.bands".to_string(),
                message: format!(
                    "expected 0 <= critical ({}) <= degraded ({}) <= optimal ({}) <= 1",
                    self.critical, self.degraded, self.optimal
                ),
            });
        }
        Ok(())
    }
}

/// Thresholds and limits for the decision rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionRules {
    /// Fewer active agents than this is an emergency.
    #[serde(default = "default_min_agents")]
    pub min_agents: usize,

    /// More active agents than this is over-provisioned.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Queue depth that is critical.
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,

    /// Queue depth that needs attention in a degraded system.
    #[serde(default = "default_degraded_queue")]
    pub degraded_queue: usize,

    #[serde(default = "default_low_completion")]
    pub low_completion: f64,

    #[serde(default = "default_high_completion")]
    pub high_completion: f64,

    /// Span volume below which telemetry should be enhanced.
    #[serde(default = "default_low_volume")]
    pub low_volume: usize,

    /// Decisions below this confidence are not dispatched.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_max_decisions")]
    pub max_decisions_per_cycle: usize,
}

fn default_min_agents() -> usize {
    2
}

fn default_max_agents() -> usize {
    8
}

fn default_max_queue() -> usize {
    15
}

fn default_degraded_queue() -> usize {
    5
}

fn default_low_completion() -> f64 {
    0.4
}

fn default_high_completion() -> f64 {
    0.8
}

fn default_low_volume() -> usize {
    10
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_max_decisions() -> usize {
    3
}

impl Default for DecisionRules {
    fn default() -> Self {
        Self {
            min_agents: default_min_agents(),
            max_agents: default_max_agents(),
            max_queue: default_max_queue(),
            degraded_queue: default_degraded_queue(),
            low_completion: default_low_completion(),
            high_completion: default_high_completion(),
            low_volume: default_low_volume(),
            confidence_threshold: default_confidence_threshold(),
            max_decisions_per_cycle: default_max_decisions(),
        }
    }
}

/// External executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Program run for externally delivered commands. None disables the executor.
    #[serde(default)]
    pub program: Option<String>,

    /// Arguments placed before the command's own arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Seconds before the program is terminated.
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_executor_timeout_secs() -> u64 {
    60
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_secs: default_executor_timeout_secs(),
        }
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// A built-in agent name that does not exist.
    UnknownAgent { name: String },
    /// Field has a questionable value.
    InvalidValue { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::UnknownAgent { name } => {
                write!(
                    f,
                    "Warning [agents.enabled]: unknown built-in agent '{}' (known: {})",
                    name,
                    BUILTIN_AGENTS.join(", ")
                )
            }
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("health weight '{field}' must be a non-negative number, got {value}")]
    NegativeWeight { field: String, value: f64 },

    #[error("health weights must sum to 1.0, got {0}")]
    WeightSum(f64),

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("agent '{0}' is both built-in and declared")]
    DuplicateAgent(String),

    #[error(transparent)]
    Agent(#[from] AgentBuildError),
}
