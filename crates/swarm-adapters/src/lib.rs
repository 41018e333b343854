//! # swarm-adapters
//!
//! Executors that carry externally delivered commands out of the span log.
//!
//! The dispatcher hands a command marked for external delivery to a
//! `CommandExecutor` instead of appending it. The executor performs the
//! real effect and reports back by appending a result span whose parent is
//! the dispatched command.
//!
//! `ProcessExecutor` runs a configured program per command, with a timeout.

mod process_executor;

pub use process_executor::{ExecutionResult, ProcessExecutor, STDERR_TAIL_LINES};

/// Checks whether `program` can be started, by running `<program> --version`.
pub fn is_program_available(program: &str) -> bool {
    let result = std::process::Command::new(program).arg("--version").output();
    match result {
        Ok(output) => {
            let available = output.status.success();
            tracing::debug!(program, available, "Executor availability check");
            available
        }
        Err(_) => {
            tracing::debug!(program, available = false, "Executor program not found in PATH");
            false
        }
    }
}
