//! Process executor for externally delivered commands.
//!
//! Runs `program [base args] <subcommand words> <command args>` where the
//! subcommand words are the command name split on dots, so
//! `ops.page.send --team infra` becomes `program ops page send --team infra`.
//! Supports an execution timeout with graceful SIGTERM termination.
//!
//! When the process ends, a result span is appended to the log as a child of
//! the dispatched span: `<command>.completed` on exit code 0, otherwise
//! `<command>.failed` with the exit code and the tail of stderr.

use async_trait::async_trait;
#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm_core::{CommandExecutor, DispatchError, ExecutorConfig, SpanLog};
use swarm_proto::{Command, Span, SpanStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Lines of stderr kept on a failed result span.
pub const STDERR_TAIL_LINES: usize = 20;

/// Outcome of one process run.
#[derive(Debug)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Exit code 0 and no timeout.
    pub success: bool,
    /// Whether the process was terminated due to timeout.
    pub timed_out: bool,
    pub duration: Duration,
}

impl ExecutionResult {
    /// The last `lines` lines of stderr.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs external commands as child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
    log: Arc<SpanLog>,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<String>, log: Arc<SpanLog>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            timeout: Duration::from_secs(60),
            log,
        }
    }

    /// Builds an executor from configuration. `None` when no program is set.
    pub fn from_config(config: &ExecutorConfig, log: Arc<SpanLog>) -> Option<Self> {
        let program = config.program.as_ref()?;
        Some(
            Self::new(program.clone(), log)
                .with_args(config.args.clone())
                .with_timeout(Duration::from_secs(config.timeout_secs.max(1))),
        )
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The argument vector the command runs with, program excluded.
    pub fn build_args(&self, command: &Command) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(
            command
                .fq_name
                .split('.')
                .filter(|s| !s.is_empty())
                .map(ToString::to_string),
        );
        args.extend(command.args.iter().cloned());
        args
    }

    /// Runs the command and collects its output.
    ///
    /// stdout and stderr are read concurrently so neither pipe can fill up
    /// and stall the child. On timeout the child receives SIGTERM.
    pub async fn run(&self, command: &Command) -> io::Result<ExecutionResult> {
        let args = self.build_args(command);
        debug!(program = %self.program, args = ?args, "Spawning command");

        let started = Instant::now();
        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        let streams = async {
            let stdout_future = read_lines(stdout_handle);
            let stderr_future = read_lines(stderr_handle);
            tokio::try_join!(stdout_future, stderr_future)
        };

        let mut timed_out = false;
        let (stdout, stderr) = match tokio::time::timeout(self.timeout, streams).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    program = %self.program,
                    command = %command.fq_name,
                    timeout_secs = self.timeout.as_secs(),
                    "Execution timeout reached, sending SIGTERM"
                );
                timed_out = true;
                terminate_child(&mut child);
                (String::new(), String::new())
            }
        };

        let status = child.wait().await?;
        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code: status.code(),
            success: status.success() && !timed_out,
            timed_out,
            duration: started.elapsed(),
        })
    }

    /// The span reporting `result` for the command dispatched as `dispatched`.
    pub fn result_span(&self, command: &Command, dispatched: &Span, result: &ExecutionResult) -> Span {
        let duration_ms = result.duration.as_secs_f64() * 1000.0;
        let span = if result.success {
            Span::new(format!("{}.completed", command.fq_name))
        } else {
            let message = if result.timed_out {
                format!("timed out after {}s", self.timeout.as_secs())
            } else {
                result.stderr_tail(STDERR_TAIL_LINES)
            };
            Span::new(format!("{}.failed", command.fq_name))
                .with_status(SpanStatus::Error {
                    message: Some(message),
                })
                .with_attr("timed_out", result.timed_out)
        };

        let mut span = span
            .child_of(dispatched)
            .with_duration_ms(duration_ms)
            .with_attr("executor.program", self.program.as_str());
        if let Some(code) = result.exit_code {
            span = span.with_attr("exit_code", i64::from(code));
        }
        span
    }
}

async fn read_lines<R>(handle: Option<R>) -> io::Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = String::new();
    if let Some(handle) = handle {
        let mut lines = BufReader::new(handle).lines();
        while let Some(line) = lines.next_line().await? {
            out.push_str(&line);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Terminates the child process with SIGTERM.
#[cfg(unix)]
fn terminate_child(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        debug!(%pid, "Sending SIGTERM to child process");
        let _ = kill(pid, Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_child(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: Command, span: Span) -> Result<(), DispatchError> {
        let result = match self.run(&command).await {
            Ok(result) => result,
            Err(e) => {
                let failed = Span::new(format!("{}.failed", command.fq_name))
                    .child_of(&span)
                    .with_status(SpanStatus::Error {
                        message: Some(format!("failed to start {}: {e}", self.program)),
                    })
                    .with_attr("executor.program", self.program.as_str());
                self.log
                    .append(&failed)
                    .map_err(|e| DispatchError::Executor(e.to_string()))?;
                return Err(DispatchError::Executor(format!("failed to start {}: {e}", self.program)));
            }
        };

        let report = self.result_span(&command, &span, &result);
        self.log
            .append(&report)
            .map_err(|e| DispatchError::Executor(e.to_string()))?;

        info!(
            command = %command.fq_name,
            result = %report.name,
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "External command finished"
        );

        if result.success {
            Ok(())
        } else {
            Err(DispatchError::Executor(format!(
                "{} exited with {:?}",
                command.fq_name, result.exit_code
            )))
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor(dir: &TempDir, program: &str) -> ProcessExecutor {
        ProcessExecutor::new(program, Arc::new(SpanLog::new(dir.path().join("spans.jsonl"))))
    }

    #[test]
    fn test_build_args_splits_name() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir, "swarmctl").with_args(vec!["--quiet".to_string()]);
        let command = Command::new("ops.page.send").arg("team", "infra");

        assert_eq!(
            exec.build_args(&command),
            vec!["--quiet", "ops", "page", "send", "--team", "infra"]
        );
    }

    #[test]
    fn test_from_config_requires_program() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(SpanLog::new(dir.path().join("spans.jsonl")));
        assert!(ProcessExecutor::from_config(&ExecutorConfig::default(), Arc::clone(&log)).is_none());

        let config = ExecutorConfig {
            program: Some("echo".to_string()),
            args: vec![],
            timeout_secs: 5,
        };
        let exec = ProcessExecutor::from_config(&config, log).unwrap();
        assert_eq!(exec.program(), "echo");
    }

    #[test]
    fn test_stderr_tail() {
        let result = ExecutionResult {
            stdout: String::new(),
            stderr: "a\nb\nc\n".to_string(),
            exit_code: Some(1),
            success: false,
            timed_out: false,
            duration: Duration::ZERO,
        };
        assert_eq!(result.stderr_tail(2), "b\nc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_completes() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir, "echo");
        let dispatched = Span::new("ops.page.send");

        exec.execute(Command::new("ops.page.send").arg("team", "infra"), dispatched.clone())
            .await
            .unwrap();

        let spans = SpanLog::new(dir.path().join("spans.jsonl")).read_all().unwrap().spans;
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "ops.page.send.completed");
        assert_eq!(spans[0].parent_id.as_deref(), Some(dispatched.span_id.as_str()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir, "false");

        let result = exec.execute(Command::new("ops.check"), Span::new("ops.check")).await;
        assert!(result.is_err());

        let spans = SpanLog::new(dir.path().join("spans.jsonl")).read_all().unwrap().spans;
        assert_eq!(spans[0].name, "ops.check.failed");
        assert!(spans[0].is_error());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_sends_sigterm() {
        let dir = TempDir::new().unwrap();
        // Words after the `-c` script become positional parameters and are ignored.
        let exec = executor(&dir, "sh")
            .with_args(vec!["-c".to_string(), "sleep 10".to_string()])
            .with_timeout(Duration::from_millis(100));

        let result = exec.run(&Command::new("ops.wait")).await.unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_program_reports_failure() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir, "definitely-not-a-real-program-xyz");

        let result = exec.execute(Command::new("ops.page"), Span::new("ops.page")).await;
        assert!(matches!(result, Err(DispatchError::Executor(_))));

        let spans = SpanLog::new(dir.path().join("spans.jsonl")).read_all().unwrap().spans;
        assert_eq!(spans[0].name, "ops.page.failed");
    }
}
