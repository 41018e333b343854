//! # swarm-cli
//!
//! Binary entry point for Swarm.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading with command-line overrides
//! - `swarm run`: agents and the health loop over the shared log
//! - `swarm emit`: seeding spans by hand
//! - `swarm events` and `swarm health`: reading the log back

mod display;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use display::ColorMode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swarm_adapters::{ProcessExecutor, is_program_available};
use swarm_core::{
    DecisionEngine, HealthScorer, ShutdownSignal, SpanLog, StartAt, Swarm, SwarmConfig,
};
use swarm_proto::{AttrValue, Span, SuffixPattern, now_seconds};
use tracing::{debug, info, warn};

/// Output format for read commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for programmatic access
    Json,
}

/// Swarm - agent choreography over a shared telemetry log
#[derive(Parser, Debug)]
#[command(name = "swarm", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "swarm.yml", global = true)]
    config: PathBuf,

    /// Path to the span log (overrides log.path)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured agents and the health loop until interrupted
    Run(RunArgs),

    /// Append a span to the log
    Emit(EmitArgs),

    /// Show spans from the log
    Events(EventsArgs),

    /// Sample health from the log and show the decisions it would lead to
    Health(HealthArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Run only these agents (comma-separated; overrides agents.enabled)
    #[arg(long, value_delimiter = ',')]
    agents: Option<Vec<String>>,

    /// React to spans already in the log instead of only new ones
    #[arg(long)]
    from_beginning: bool,

    /// Override the poll interval in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Disable the health loop
    #[arg(long)]
    no_health: bool,

    /// Directory for per-agent cursors (overrides log.cursor_dir)
    #[arg(long)]
    cursor_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct EmitArgs {
    /// Span name, e.g. governance.motion.open
    name: String,

    /// Attribute as key=value; numbers and true/false keep their type
    #[arg(short, long = "attr", value_name = "KEY=VALUE")]
    attrs: Vec<String>,

    /// Parent span id
    #[arg(long)]
    parent: Option<String>,

    /// Trace id (defaults to a fresh one)
    #[arg(long)]
    trace: Option<String>,
}

#[derive(Parser, Debug)]
struct EventsArgs {
    /// Show only the last N spans
    #[arg(long)]
    last: Option<usize>,

    /// Filter by name pattern (e.g. "*.motion.open")
    #[arg(long)]
    name: Option<String>,

    /// Filter by trace id
    #[arg(long)]
    trace: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Parser, Debug)]
struct HealthArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Also append the sample and its decisions to the log
    #[arg(long)]
    record: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut config = load_config(&cli.config)?;
    if let Some(log) = cli.log {
        config.log.path = log;
    }

    match cli.command {
        Commands::Run(args) => run_command(config, args).await,
        Commands::Emit(args) => emit_command(&config, args),
        Commands::Events(args) => events_command(&config, cli.color, args),
        Commands::Health(args) => health_command(&config, cli.color, args).await,
    }
}

fn load_config(path: &Path) -> Result<SwarmConfig> {
    if path.exists() {
        SwarmConfig::from_file(path).with_context(|| format!("Failed to load config from {:?}", path))
    } else {
        debug!("Config file {:?} not found, using defaults", path);
        Ok(SwarmConfig::default())
    }
}

async fn run_command(mut config: SwarmConfig, args: RunArgs) -> Result<()> {
    if let Some(agents) = args.agents {
        config.agents.enabled = agents;
    }
    if args.from_beginning {
        config.log.start_at = StartAt::Beginning;
    }
    if let Some(poll_ms) = args.poll_ms {
        config.log.poll_interval_ms = poll_ms;
    }
    if args.no_health {
        config.health.enabled = false;
    }
    if let Some(dir) = args.cursor_dir {
        config.log.cursor_dir = Some(dir);
    }

    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        eprintln!("{warning}");
    }
    config.suppress_warnings = true;

    let log = Arc::new(SpanLog::new(&config.log.path));
    let executor = ProcessExecutor::from_config(&config.executor, Arc::clone(&log));

    let mut swarm = Swarm::new(config);
    if let Some(executor) = executor {
        if !is_program_available(executor.program()) {
            warn!(
                program = executor.program(),
                "Executor program did not answer --version; external commands may fail"
            );
        }
        swarm = swarm.with_executor(Arc::new(executor));
    }

    spawn_signal_handlers(swarm.shutdown_signal());

    let reports = swarm.run().await.context("Swarm stopped with an error")?;
    for report in &reports {
        info!(
            runner = %report.runner,
            spans = report.stats.spans_seen,
            transitions = report.stats.transitions,
            commands = report.stats.commands_emitted,
            failures = report.stats.handler_failures,
            "Runner summary"
        );
    }
    Ok(())
}

/// Stops the swarm after the current cycle on SIGINT, SIGTERM or SIGHUP.
fn spawn_signal_handlers(shutdown: ShutdownSignal) {
    let on_sigint = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received (SIGINT), finishing current cycle...");
            on_sigint.trigger();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        for (kind, label) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let shutdown = shutdown.clone();
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        warn!("{label} received, finishing current cycle...");
                        shutdown.trigger();
                    });
                }
                Err(e) => warn!("Could not register {label} handler: {e}"),
            }
        }
    }
}

fn emit_command(config: &SwarmConfig, args: EmitArgs) -> Result<()> {
    let mut span = Span::new(args.name.trim());
    if span.name.is_empty() {
        bail!("Span name must not be empty");
    }
    span.parent_id = args.parent;
    if let Some(trace) = args.trace {
        span.trace_id = trace;
    }
    for raw in &args.attrs {
        let (key, value) = parse_attr(raw)?;
        span.attributes.insert(key, value);
    }

    let log = SpanLog::new(&config.log.path);
    log.append(&span)
        .with_context(|| format!("Failed to append to {}", config.log.path.display()))?;
    println!("{}", span.span_id);
    Ok(())
}

/// Parses `key=value`, keeping integers, floats and booleans typed.
fn parse_attr(raw: &str) -> Result<(String, AttrValue)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Attribute '{raw}' is not in KEY=VALUE form");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Attribute '{raw}' has an empty key");
    }

    let value = if let Ok(i) = value.parse::<i64>() {
        AttrValue::Int(i)
    } else if let Ok(f) = value.parse::<f64>() {
        AttrValue::Float(f)
    } else if let Ok(b) = value.parse::<bool>() {
        AttrValue::Bool(b)
    } else {
        AttrValue::Str(value.to_string())
    };
    Ok((key.to_string(), value))
}

fn events_command(config: &SwarmConfig, color: ColorMode, args: EventsArgs) -> Result<()> {
    let use_colors = color.should_use_colors();
    let path = &config.log.path;

    if !path.exists() {
        display::dim(use_colors, "No span log found. Run `swarm emit` or `swarm run` to create one.");
        return Ok(());
    }

    let result = SpanLog::new(path)
        .read_all()
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut spans = result.spans;

    if let Some(raw) = &args.name {
        let pattern = SuffixPattern::parse(raw).with_context(|| format!("Invalid name pattern '{raw}'"))?;
        spans.retain(|s| pattern.matches(&s.name));
    }
    if let Some(trace) = &args.trace {
        spans.retain(|s| &s.trace_id == trace);
    }
    // Applied last so it picks the last N of the filtered spans
    if let Some(n) = args.last
        && spans.len() > n
    {
        spans.drain(..spans.len() - n);
    }

    if spans.is_empty() {
        display::dim(use_colors, "No matching spans found.");
        return Ok(());
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&spans)?),
        OutputFormat::Table => display::print_spans_table(&spans, result.malformed.len(), use_colors),
    }
    Ok(())
}

async fn health_command(config: &SwarmConfig, color: ColorMode, args: HealthArgs) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    let path = &config.log.path;
    let spans = if path.exists() {
        SpanLog::new(path)
            .read_all()
            .with_context(|| format!("Failed to read {}", path.display()))?
            .spans
    } else {
        Vec::new()
    };

    let snapshot = HealthScorer::new(config.health.clone()).sample(&spans, now_seconds());
    let decisions = DecisionEngine::new(config.health.decisions.clone()).plan(&snapshot);

    if args.record {
        let log = Arc::new(SpanLog::new(path));
        let dispatcher = swarm_core::Dispatcher::new(log, swarm_core::HEALTH_PRODUCER)
            .with_retry(config.dispatch.clone());
        let sample = snapshot.to_span();
        dispatcher.publish(&sample).await?;
        for decision in &decisions {
            dispatcher.emit(decision.to_command(), &sample).await?;
        }
    }

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "snapshot": snapshot,
                "decisions": decisions,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => display::print_health(&snapshot, &decisions, color.should_use_colors()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attr_keeps_types() {
        assert_eq!(parse_attr("n=42").unwrap(), ("n".to_string(), AttrValue::Int(42)));
        assert_eq!(parse_attr("rate=5.5").unwrap().1, AttrValue::Float(5.5));
        assert_eq!(parse_attr("ok=true").unwrap().1, AttrValue::Bool(true));
        assert_eq!(parse_attr("id=m1").unwrap().1, AttrValue::Str("m1".into()));
        assert_eq!(parse_attr("note=a=b").unwrap().1, AttrValue::Str("a=b".into()));
    }

    #[test]
    fn test_parse_attr_rejects_bad_input() {
        assert!(parse_attr("novalue").is_err());
        assert!(parse_attr("=x").is_err());
    }

    #[test]
    fn test_cli_parses_emit() {
        let cli = Cli::try_parse_from([
            "swarm",
            "emit",
            "governance.motion.open",
            "--attr",
            "motion_id=m1",
            "--log",
            "/tmp/spans.jsonl",
        ])
        .unwrap();
        assert_eq!(cli.log, Some(PathBuf::from("/tmp/spans.jsonl")));
        match cli.command {
            Commands::Emit(args) => {
                assert_eq!(args.name, "governance.motion.open");
                assert_eq!(args.attrs, vec!["motion_id=m1"]);
            }
            other => panic!("expected emit, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_run_agents_list() {
        let cli = Cli::try_parse_from(["swarm", "run", "--agents", "ping,roberts", "--no-health"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.agents, Some(vec!["ping".to_string(), "roberts".to_string()]));
                assert!(args.no_health);
            }
            other => panic!("expected run, got {other:?}"),
        }
    }
}
