//! Span fixtures and a log handle for tests.

use crate::span_log::SpanLog;
use crate::span_reader::PollResult;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swarm_proto::Span;

/// Renders a span as one log line, newline included.
pub fn span_line(span: &Span) -> String {
    // Spans built in tests always encode.
    let mut line = span.to_line().unwrap_or_default();
    line.push('\n');
    line
}

/// A span log inside a test directory, with helpers for seeding and
/// inspecting it.
#[derive(Debug, Clone)]
pub struct TestLog {
    log: Arc<SpanLog>,
}

impl TestLog {
    /// Creates `spans.jsonl` inside `dir`.
    pub fn in_dir(dir: &Path) -> io::Result<Self> {
        let log = SpanLog::new(dir.join("spans.jsonl"));
        log.touch()?;
        Ok(Self { log: Arc::new(log) })
    }

    pub fn path(&self) -> PathBuf {
        self.log.path().to_path_buf()
    }

    pub fn log(&self) -> Arc<SpanLog> {
        Arc::clone(&self.log)
    }

    /// Appends a span and returns it.
    pub fn seed(&self, span: Span) -> io::Result<Span> {
        self.log.append(&span)?;
        Ok(span)
    }

    /// Writes raw bytes, for malformed or partial lines.
    pub fn write_raw(&self, raw: &str) -> io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log.path())?;
        file.write_all(raw.as_bytes())
    }

    /// Replaces the log with the given content, as a rotation would.
    pub fn truncate_to(&self, content: &str) -> io::Result<()> {
        std::fs::write(self.log.path(), content)
    }

    pub fn read(&self) -> io::Result<PollResult> {
        self.log.read_all()
    }

    pub fn spans(&self) -> io::Result<Vec<Span>> {
        Ok(self.log.read_all()?.spans)
    }

    /// Names of every span in the log, in order.
    pub fn names(&self) -> io::Result<Vec<String>> {
        Ok(self.spans()?.into_iter().map(|s| s.name).collect())
    }

    /// The first span with the given name.
    pub fn find(&self, name: &str) -> io::Result<Option<Span>> {
        Ok(self.spans()?.into_iter().find(|s| s.name == name))
    }
}
