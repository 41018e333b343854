//! An executor that records external commands instead of running them.

use crate::dispatcher::{CommandExecutor, DispatchError};
use crate::span_log::SpanLog;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use swarm_proto::{Command, Span, SpanStatus};

/// One command handed to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub command: Command,
    /// The span the dispatcher built for the command.
    pub span: Span,
}

/// Records every execution and optionally appends a result span, the way a
/// real executor reports back.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    executions: Mutex<Vec<ExecutionRecord>>,
    log: Option<Arc<SpanLog>>,
    fail: bool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `<command>.completed` (or `.failed`) to `log` after each execution.
    #[must_use]
    pub fn reporting_to(mut self, log: Arc<SpanLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Makes every execution fail.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self) -> usize {
        self.executions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, command: Command, span: Span) -> Result<(), DispatchError> {
        let name = command.fq_name.clone();
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ExecutionRecord {
                command,
                span: span.clone(),
            });

        if let Some(log) = &self.log {
            let result = if self.fail {
                Span::new(format!("{name}.failed")).with_status(SpanStatus::Error {
                    message: Some("scripted failure".to_string()),
                })
            } else {
                Span::new(format!("{name}.completed"))
            };
            log.append(&result.child_of(&span))
                .map_err(|e| DispatchError::Executor(e.to_string()))?;
        }

        if self.fail {
            return Err(DispatchError::Executor(format!("{name} failed")));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
