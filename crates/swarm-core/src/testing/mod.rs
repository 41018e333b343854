//! Testing utilities for deterministic agent and swarm tests.

pub mod fixtures;
pub mod recording_executor;
pub mod scripted_provider;

pub use fixtures::{TestLog, span_line};
pub use recording_executor::{ExecutionRecord, RecordingExecutor};
pub use scripted_provider::ScriptedProvider;
