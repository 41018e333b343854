//! Dispatcher: turns commands into spans on the shared log.
//!
//! Every command becomes exactly one span whose `parent_id` is the span that
//! caused it. Log-delivered commands are appended here; externally delivered
//! commands are handed to a `CommandExecutor`, which appends its own result
//! span once the real effect completes.

use crate::span_log::SpanLog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use swarm_proto::{Command, Delivery, Span};
use tracing::{debug, info, warn};

/// Attribute naming the agent (or engine) that dispatched a span.
pub const PRODUCER_ATTR: &str = "swarm.producer";

/// Attribute carrying a command's human-readable description.
pub const DESCRIPTION_ATTR: &str = "command.description";

/// Backoff policy for log appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if base.is_finite() {
            (base as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to encode span: {0}")]
    Encode(#[from] swarm_proto::Error),

    #[error("append to {path} failed after {attempts} attempts: {source}")]
    Exhausted {
        path: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("executor failed: {0}")]
    Executor(String),
}

/// Carries out externally delivered commands.
///
/// Implementations perform the real-world effect and append a result span
/// (with `parent_id` = the dispatched span) when it completes.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: Command, span: Span) -> Result<(), DispatchError>;

    fn name(&self) -> &str {
        "executor"
    }
}

/// Emits commands and raw spans onto the log. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    log: Arc<SpanLog>,
    producer: String,
    retry: RetryConfig,
    executor: Option<Arc<dyn CommandExecutor>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("log", &self.log.path())
            .field("producer", &self.producer)
            .field("retry", &self.retry)
            .field("executor", &self.executor.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

impl Dispatcher {
    pub fn new(log: Arc<SpanLog>, producer: impl Into<String>) -> Self {
        Self {
            log,
            producer: producer.into(),
            retry: RetryConfig::default(),
            executor: None,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Same log, retry policy and executor, different producer name.
    #[must_use]
    pub fn for_producer(&self, producer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            ..self.clone()
        }
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn log(&self) -> &Arc<SpanLog> {
        &self.log
    }

    /// Builds the span a command becomes, without emitting it.
    pub fn build_span(&self, command: &Command, cause: &Span) -> Span {
        let mut span = Span::new(command.fq_name.clone()).child_of(cause);
        span.attributes = command.to_attributes();
        span.attributes
            .insert(DESCRIPTION_ATTR.to_string(), command.description.clone().into());
        span.attributes
            .insert(PRODUCER_ATTR.to_string(), self.producer.clone().into());
        span
    }

    /// Emits a command caused by `cause` and returns the span it became.
    ///
    /// For external delivery the returned span is the one handed to the
    /// executor; it is not appended here.
    pub async fn emit(&self, command: Command, cause: &Span) -> Result<Span, DispatchError> {
        let span = self.build_span(&command, cause);

        match (command.delivery, &self.executor) {
            (Delivery::External, Some(executor)) => {
                debug!(
                    command = %command.fq_name,
                    executor = executor.name(),
                    span_id = %span.span_id,
                    "Handing command to executor"
                );
                let executor = Arc::clone(executor);
                let handoff = span.clone();
                tokio::spawn(async move {
                    let name = command.fq_name.clone();
                    if let Err(e) = executor.execute(command, handoff).await {
                        warn!(command = %name, error = %e, "External command failed");
                    }
                });
            }
            (Delivery::External, None) => {
                warn!(
                    command = %command.fq_name,
                    "No executor configured for external command, appending to log instead"
                );
                self.append_with_retry(&span).await?;
            }
            (Delivery::Log, _) => {
                self.append_with_retry(&span).await?;
            }
        }

        info!(
            producer = %self.producer,
            command = %span.name,
            parent_id = span.parent_id.as_deref().unwrap_or(""),
            "Dispatched"
        );
        Ok(span)
    }

    /// Appends a span as-is (seed records, health samples).
    pub async fn publish(&self, span: &Span) -> Result<(), DispatchError> {
        self.append_with_retry(span).await
    }

    async fn append_with_retry(&self, span: &Span) -> Result<(), DispatchError> {
        // Encoding failures are not transient.
        span.to_line()?;

        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.log.append(span) {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 >= attempts => {
                    return Err(DispatchError::Exhausted {
                        path: self.log.path().display().to_string(),
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.retry.compute_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
