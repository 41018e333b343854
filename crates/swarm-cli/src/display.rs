//! Terminal rendering for `swarm events` and `swarm health`.

use clap::ValueEnum;
use std::io::{IsTerminal, stdout};
use swarm_core::{Decision, HealthBand, HealthSnapshot};
use swarm_proto::Span;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    pub fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// ANSI color codes for terminal output.
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
    pub const BLUE: &str = "\x1b[34m";
    pub const MAGENTA: &str = "\x1b[35m";
}

pub fn dim(use_colors: bool, message: &str) {
    if use_colors {
        println!("{}{message}{}", colors::DIM, colors::RESET);
    } else {
        println!("{message}");
    }
}

fn name_color(span: &Span) -> &'static str {
    use colors::*;
    let name = span.name.as_str();
    if span.is_error() || name.ends_with(".failed") {
        RED
    } else if name.starts_with("governance.") {
        CYAN
    } else if name.starts_with("scrum.") {
        YELLOW
    } else if name.starts_with("lean.") {
        MAGENTA
    } else if name.starts_with("swarm.") {
        GREEN
    } else {
        BLUE
    }
}

fn band_color(band: HealthBand) -> &'static str {
    match band {
        HealthBand::Critical => colors::RED,
        HealthBand::Degraded => colors::YELLOW,
        HealthBand::Healthy => colors::GREEN,
        HealthBand::Optimal => colors::CYAN,
    }
}

/// `HH:MM:SS` in UTC.
pub fn format_time(timestamp: f64) -> String {
    let micros = (timestamp * 1_000_000.0) as i64;
    chrono::DateTime::from_timestamp_micros(micros)
        .map_or_else(|| "-".to_string(), |t| t.format("%H:%M:%S").to_string())
}

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

fn short_id(id: Option<&str>) -> String {
    match id {
        Some(id) if !id.is_empty() => truncate(id, 8),
        _ => "-".to_string(),
    }
}

fn attributes_preview(span: &Span) -> String {
    let joined = span
        .attributes
        .iter()
        .filter(|(k, _)| !k.starts_with("swarm.") && !k.starts_with("command."))
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    truncate(&joined, 48)
}

pub fn print_spans_table(spans: &[Span], malformed: usize, use_colors: bool) {
    use colors::*;

    if use_colors {
        println!(
            "{BOLD}{DIM}  # │ Time     │ Span     │ Parent   │ Name                         │ Attributes{RESET}"
        );
        println!(
            "{DIM}────┼──────────┼──────────┼──────────┼──────────────────────────────┼─────────────────{RESET}"
        );
    } else {
        println!("  # | Time     | Span     | Parent   | Name                         | Attributes");
        println!("----|----------|----------|----------|------------------------------|-----------------");
    }

    for (i, span) in spans.iter().enumerate() {
        let time = format_time(span.timestamp);
        let id = short_id(Some(&span.span_id));
        let parent = short_id(span.parent_id.as_deref());
        let name = truncate(&span.name, 28);
        let attrs = attributes_preview(span);

        if use_colors {
            let color = name_color(span);
            println!(
                "{DIM}{:>3}{RESET} │ {time:<8} │ {id:<8} │ {parent:<8} │ {color}{name:<28}{RESET} │ {DIM}{attrs}{RESET}",
                i + 1,
            );
        } else {
            println!(
                "{:>3} | {time:<8} | {id:<8} | {parent:<8} | {name:<28} | {attrs}",
                i + 1,
            );
        }
    }

    let footer = if malformed > 0 {
        format!("Total: {} spans ({malformed} malformed lines skipped)", spans.len())
    } else {
        format!("Total: {} spans", spans.len())
    };
    if use_colors {
        println!("\n{DIM}{footer}{RESET}");
    } else {
        println!("\n{footer}");
    }
}

pub fn print_health(snapshot: &HealthSnapshot, decisions: &[Decision], use_colors: bool) {
    use colors::*;

    let band = snapshot.band.as_str().to_uppercase();
    if use_colors {
        println!(
            "{BOLD}Health:{RESET} {}{band}{RESET} ({:.3})",
            band_color(snapshot.band),
            snapshot.score
        );
    } else {
        println!("Health: {band} ({:.3})", snapshot.score);
    }

    let rows = [
        ("completion", snapshot.completion_rate, format!("{}/{} work items", snapshot.stats.completed, snapshot.stats.work_items)),
        ("agents", snapshot.agent_score, format!("{} active", snapshot.active_agents)),
        ("queue", snapshot.queue_score, format!("{} pending", snapshot.queue_depth())),
        ("telemetry", snapshot.telemetry_score, format!("{} spans in {}s", snapshot.volume(), snapshot.window_secs)),
    ];
    for (label, score, detail) in rows {
        if use_colors {
            println!("  {label:<11} {score:>5.2}  {DIM}{detail}{RESET}");
        } else {
            println!("  {label:<11} {score:>5.2}  {detail}");
        }
    }

    if decisions.is_empty() {
        println!();
        dim(use_colors, "No decisions.");
        return;
    }

    println!("\nDecisions:");
    for decision in decisions {
        println!(
            "  [{}] {:<22} {:.2}  {}",
            decision.priority,
            decision.kind.as_str(),
            decision.confidence,
            decision.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("governance.motion.open", 10), "governanc…");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(3_661.5), "01:01:01");
    }

    #[test]
    fn test_attributes_preview_hides_bookkeeping() {
        let span = Span::new("a.b")
            .with_attr("swarm.producer", "roberts")
            .with_attr("motion_id", "m1");
        assert_eq!(attributes_preview(&span), "motion_id=m1");
    }
}
