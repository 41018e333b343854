//! Runners: the timer-driven loops that connect agents to the log.
//!
//! An `AgentRunner` owns one agent and one reader. Every poll interval it
//! reads new spans, lets the agent react to each in order and dispatches any
//! command before looking at the next span. A `HealthRunner` samples health
//! on its own interval and emits decisions. `Swarm` builds both from
//! configuration and supervises them.
//!
//! Shutdown never interrupts a cycle: a runner notices the signal between
//! polls, saves its cursor if it has a store, and returns its stats. The
//! saved cursor never passes a span whose command was not dispatched.

use crate::agent::{Agent, AgentBuildError};
use crate::agents::{BuiltinOptions, build_builtin};
use crate::config::{ConfigError, HealthConfig, LogConfig, StartAt, SwarmConfig};
use crate::cursor_store::CursorStore;
use crate::decision::{Decision, DecisionEngine};
use crate::declared;
use crate::dispatcher::{CommandExecutor, DispatchError, Dispatcher};
use crate::health::{HEALTH_PRODUCER, HealthScorer, HealthSnapshot};
use crate::provider::ContentProvider;
use crate::registry::AgentRegistry;
use crate::span_log::SpanLog;
use crate::span_reader::{PollResult, SpanReader, StartPosition};
use crate::state_machine::TransitionOutcome;
use serde::Serialize;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use swarm_proto::{Span, now_seconds};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Consecutive failed polls after which a runner gives up on the log.
pub const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("span log {path} is unreadable after {attempts} attempts: {source}")]
    Log {
        path: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("cursor store: {0}")]
    Cursor(#[source] io::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] AgentBuildError),

    #[error("runner task for '{runner}' failed: {message}")]
    Task { runner: String, message: String },
}

/// Counters a runner accumulates over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub polls: u64,
    pub spans_seen: u64,
    pub routed: u64,
    pub transitions: u64,
    pub skipped: u64,
    pub observed: u64,
    pub handler_failures: u64,
    pub commands_emitted: u64,
    pub malformed_lines: u64,
    pub rotations: u64,
}

/// What a runner reports when it stops.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerReport {
    pub runner: String,
    pub stats: LoopStats,
}

/// Broadcast stop flag shared by every runner. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Asks every runner to stop after its current cycle.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Waits on a ticker until the next tick or shutdown. Returns false on shutdown.
async fn next_tick(ticker: &mut tokio::time::Interval, rx: &mut watch::Receiver<bool>) -> bool {
    if *rx.borrow() {
        return false;
    }
    let alive = tokio::select! {
        _ = ticker.tick() => true,
        changed = rx.changed() => changed.is_ok(),
    };
    alive && !*rx.borrow()
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Polls a reader, tolerating transient failures up to a limit.
fn poll_reader(reader: &mut SpanReader, failures: &mut u32) -> Result<PollResult, RunnerError> {
    match reader.poll() {
        Ok(result) => {
            *failures = 0;
            Ok(result)
        }
        Err(source) => {
            *failures += 1;
            if *failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                return Err(RunnerError::Log {
                    path: reader.path().display().to_string(),
                    attempts: *failures,
                    source,
                });
            }
            warn!(
                path = %reader.path().display(),
                attempt = *failures,
                error = %source,
                "Span log poll failed"
            );
            Ok(PollResult::default())
        }
    }
}

/// Drives one agent against the log.
#[derive(Debug)]
pub struct AgentRunner {
    agent: Agent,
    reader: SpanReader,
    dispatcher: Dispatcher,
    registry: AgentRegistry,
    cursors: Option<CursorStore>,
    /// Offset up to which every span has been fully handled.
    committed: u64,
    poll_interval: Duration,
    stats: LoopStats,
    poll_failures: u32,
}

impl AgentRunner {
    /// Creates a runner over an already positioned reader.
    ///
    /// Commands are dispatched under the agent's id.
    pub fn new(agent: Agent, reader: SpanReader, dispatcher: &Dispatcher, registry: AgentRegistry) -> Self {
        registry.register(agent.id(), agent.state());
        Self {
            dispatcher: dispatcher.for_producer(agent.id().as_str()),
            committed: reader.consumed(),
            agent,
            reader,
            registry,
            cursors: None,
            poll_interval: LogConfig::default().poll_interval(),
            stats: LoopStats::default(),
            poll_failures: 0,
        }
    }

    /// Creates a runner positioned per the log configuration.
    ///
    /// With a cursor directory, a saved offset wins over `start_at`.
    pub fn open(
        agent: Agent,
        log: &LogConfig,
        dispatcher: &Dispatcher,
        registry: AgentRegistry,
    ) -> Result<Self, RunnerError> {
        let cursors = log.cursor_dir.as_ref().map(CursorStore::new);
        let saved = match &cursors {
            Some(store) => store.load(agent.id()).map_err(RunnerError::Cursor)?,
            None => None,
        };
        let start = match (saved, log.start_at) {
            (Some(offset), _) => StartPosition::Offset(offset),
            (None, StartAt::Beginning) => StartPosition::Beginning,
            (None, StartAt::End) => StartPosition::End,
        };
        debug!(agent = %agent.id(), ?start, "Opening reader");

        let reader = SpanReader::with_start(&log.path, start).map_err(|source| RunnerError::Log {
            path: log.path.display().to_string(),
            attempts: 1,
            source,
        })?;

        let mut runner = Self::new(agent, reader, dispatcher, registry).with_poll_interval(log.poll_interval());
        runner.cursors = cursors;
        Ok(runner)
    }

    #[must_use]
    pub fn with_cursor_store(mut self, store: CursorStore) -> Self {
        self.cursors = Some(store);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn reader(&self) -> &SpanReader {
        &self.reader
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Runs one cycle: read new spans, react to each, dispatch commands.
    ///
    /// Returns the number of spans read.
    pub async fn poll_once(&mut self) -> Result<usize, RunnerError> {
        let result = poll_reader(&mut self.reader, &mut self.poll_failures)?;
        self.stats.polls += 1;
        if result.rotated {
            self.stats.rotations += 1;
            self.committed = 0;
        }
        self.stats.malformed_lines += result.malformed.len() as u64;

        let count = result.spans.len();
        for (span, end) in result.spans.iter().zip(&result.span_ends) {
            self.stats.spans_seen += 1;
            self.react(span).await?;
            self.committed = *end;
        }
        self.committed = self.reader.consumed();

        let stats = self.stats.clone();
        self.registry.update(self.agent.id(), self.agent.state(), |snapshot| {
            snapshot.spans_seen = stats.spans_seen;
            snapshot.transitions = stats.transitions;
            snapshot.skipped = stats.skipped;
            snapshot.observed = stats.observed;
            snapshot.handler_failures = stats.handler_failures;
            snapshot.commands_emitted = stats.commands_emitted;
            snapshot.malformed_lines = stats.malformed_lines;
        });

        if count > 0 {
            self.save_cursor();
        }
        Ok(count)
    }

    async fn react(&mut self, span: &Span) -> Result<(), RunnerError> {
        let Some(outcome) = self.agent.react_async(span).await else {
            return Ok(());
        };
        self.stats.routed += 1;

        match outcome {
            TransitionOutcome::Skipped => self.stats.skipped += 1,
            TransitionOutcome::Observed => self.stats.observed += 1,
            TransitionOutcome::HandlerFailed(_) => self.stats.handler_failures += 1,
            TransitionOutcome::Transitioned { command, .. } => {
                self.stats.transitions += 1;
                self.dispatcher.emit(command, span).await?;
                self.stats.commands_emitted += 1;
            }
        }
        Ok(())
    }

    fn save_cursor(&self) {
        let Some(store) = &self.cursors else {
            return;
        };
        if let Err(e) = store.save(self.agent.id(), self.committed) {
            warn!(agent = %self.agent.id(), error = %e, "Failed to save cursor");
        }
    }

    /// Offset of the last fully handled span; what a cursor store persists.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Polls until shutdown, then saves the cursor and reports.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<RunnerReport, RunnerError> {
        let mut rx = shutdown.subscribe();
        let mut ticker = ticker(self.poll_interval);
        info!(
            agent = %self.agent.id(),
            state = %self.agent.state(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Agent runner started"
        );

        let mut outcome = Ok(());
        while next_tick(&mut ticker, &mut rx).await {
            if let Err(e) = self.poll_once().await {
                error!(agent = %self.agent.id(), error = %e, "Agent runner stopped");
                outcome = Err(e);
                break;
            }
        }

        self.save_cursor();
        info!(
            agent = %self.agent.id(),
            state = %self.agent.state(),
            spans = self.stats.spans_seen,
            transitions = self.stats.transitions,
            "Agent runner finished"
        );
        outcome.map(|()| RunnerReport {
            runner: self.agent.id().to_string(),
            stats: self.stats,
        })
    }
}

/// What one health cycle produced.
#[derive(Debug, Clone)]
pub struct HealthCycle {
    pub snapshot: HealthSnapshot,
    /// The `swarm.health.sample` span the cycle recorded.
    pub sample: Span,
    /// Decisions emitted, in dispatch order.
    pub decisions: Vec<Decision>,
}

/// Periodically scores health and emits decisions.
#[derive(Debug)]
pub struct HealthRunner {
    scorer: HealthScorer,
    engine: DecisionEngine,
    reader: SpanReader,
    window: VecDeque<Span>,
    dispatcher: Dispatcher,
    interval: Duration,
    stats: LoopStats,
    poll_failures: u32,
}

impl HealthRunner {
    /// Creates a runner that reads the whole log into its scoring window.
    pub fn new(config: &HealthConfig, log_path: &Path, dispatcher: &Dispatcher, registry: AgentRegistry) -> Self {
        Self {
            scorer: HealthScorer::new(config.clone()).with_registry(registry),
            engine: DecisionEngine::new(config.decisions.clone()),
            reader: SpanReader::new(log_path),
            window: VecDeque::new(),
            dispatcher: dispatcher.for_producer(HEALTH_PRODUCER),
            interval: config.interval(),
            stats: LoopStats::default(),
            poll_failures: 0,
        }
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Spans currently inside the scoring window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Samples health, records the sample and dispatches the chosen decisions.
    pub async fn cycle(&mut self) -> Result<HealthCycle, RunnerError> {
        self.cycle_at(now_seconds()).await
    }

    /// `cycle` as of a given time.
    pub async fn cycle_at(&mut self, now: f64) -> Result<HealthCycle, RunnerError> {
        let result = poll_reader(&mut self.reader, &mut self.poll_failures)?;
        self.stats.polls += 1;
        self.stats.malformed_lines += result.malformed.len() as u64;
        if result.rotated {
            self.stats.rotations += 1;
            self.window.clear();
        }
        self.stats.spans_seen += result.spans.len() as u64;
        self.window.extend(result.spans);

        let since = now - self.scorer.config().window_secs as f64;
        while self.window.front().is_some_and(|s| s.timestamp < since) {
            self.window.pop_front();
        }

        let snapshot = self.scorer.sample(self.window.make_contiguous(), now);
        let sample = snapshot.to_span();
        self.dispatcher.publish(&sample).await?;

        let decisions = self.engine.plan(&snapshot);
        info!(
            score = snapshot.score,
            band = %snapshot.band,
            active_agents = snapshot.active_agents,
            queue_depth = snapshot.queue_depth(),
            decisions = decisions.len(),
            "Health sampled"
        );

        for decision in &decisions {
            self.dispatcher.emit(decision.to_command(), &sample).await?;
            self.stats.commands_emitted += 1;
        }

        Ok(HealthCycle {
            snapshot,
            sample,
            decisions,
        })
    }

    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<RunnerReport, RunnerError> {
        let mut rx = shutdown.subscribe();
        let mut ticker = ticker(self.interval);
        // The first tick fires immediately; skip it so the log has time to fill.
        ticker.tick().await;
        info!(interval_secs = self.interval.as_secs(), "Health runner started");

        let mut outcome = Ok(());
        while next_tick(&mut ticker, &mut rx).await {
            if let Err(e) = self.cycle().await {
                error!(error = %e, "Health runner stopped");
                outcome = Err(e);
                break;
            }
        }

        info!(cycles = self.stats.polls, "Health runner finished");
        outcome.map(|()| RunnerReport {
            runner: HEALTH_PRODUCER.to_string(),
            stats: self.stats,
        })
    }
}

/// A configured set of agents plus the health loop, sharing one log.
pub struct Swarm {
    config: SwarmConfig,
    provider: Option<Arc<dyn ContentProvider>>,
    executor: Option<Arc<dyn CommandExecutor>>,
    extra_agents: Vec<Agent>,
    registry: AgentRegistry,
    shutdown: ShutdownSignal,
    tasks: JoinSet<Result<RunnerReport, RunnerError>>,
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("log", &self.config.log.path)
            .field("agents", &self.registry.len())
            .field("running", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Swarm {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            config,
            provider: None,
            executor: None,
            extra_agents: Vec::new(),
            registry: AgentRegistry::new(),
            shutdown: ShutdownSignal::new(),
            tasks: JoinSet::new(),
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Runs an agent built in code alongside the configured ones.
    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.extra_agents.push(agent);
        self
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Builds every enabled and declared agent.
    ///
    /// Unknown built-in names are skipped with a warning.
    pub fn build_agents(&self) -> Result<Vec<Agent>, RunnerError> {
        let mut options = BuiltinOptions::from_config(&self.config.agents);
        if let Some(provider) = &self.provider {
            options = options.with_provider(Arc::clone(provider));
        }

        let mut agents = Vec::new();
        for name in &self.config.agents.enabled {
            match build_builtin(name, &options) {
                Ok(agent) => agents.push(agent),
                Err(AgentBuildError::UnknownAgent(name)) => {
                    warn!(agent = %name, "Skipping unknown built-in agent");
                }
                Err(e) => return Err(e.into()),
            }
        }
        agents.extend(declared::build_all(&self.config.agents)?);
        Ok(agents)
    }

    /// Validates the configuration and spawns every runner.
    pub fn start(&mut self) -> Result<(), RunnerError> {
        for warning in self.config.validate()? {
            warn!("{warning}");
        }

        let log = Arc::new(SpanLog::new(&self.config.log.path));
        log.touch().map_err(|source| RunnerError::Log {
            path: self.config.log.path.display().to_string(),
            attempts: 1,
            source,
        })?;

        let mut dispatcher = Dispatcher::new(Arc::clone(&log), "swarm").with_retry(self.config.dispatch.clone());
        if let Some(executor) = &self.executor {
            dispatcher = dispatcher.with_executor(Arc::clone(executor));
        }

        let mut agents = self.build_agents()?;
        agents.append(&mut self.extra_agents);

        for agent in agents {
            let runner = AgentRunner::open(agent, &self.config.log, &dispatcher, self.registry.clone())?;
            self.tasks.spawn(runner.run(self.shutdown.clone()));
        }

        if self.config.health.enabled {
            let runner = HealthRunner::new(&self.config.health, log.path(), &dispatcher, self.registry.clone());
            self.tasks.spawn(runner.run(self.shutdown.clone()));
        }

        info!(
            log = %log.path().display(),
            agents = self.registry.len(),
            health = self.config.health.enabled,
            "Swarm started"
        );
        Ok(())
    }

    /// Starts the swarm and waits for every runner to stop.
    ///
    /// A runner that fails stops the others; the first error is returned.
    pub async fn run(mut self) -> Result<Vec<RunnerReport>, RunnerError> {
        self.start()?;
        self.join().await
    }

    /// Signals every runner and waits for them to finish their cycle.
    pub async fn shutdown(mut self) -> Result<Vec<RunnerReport>, RunnerError> {
        self.shutdown.trigger();
        self.join().await
    }

    async fn join(&mut self) -> Result<Vec<RunnerReport>, RunnerError> {
        let mut reports = Vec::new();
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(RunnerError::Task {
                    runner: "unknown".to_string(),
                    message: e.to_string(),
                })
            });
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    self.shutdown.trigger();
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                reports.sort_by(|a, b| a.runner.cmp(&b.runner));
                Ok(reports)
            }
        }
    }
}
