//! The shared span log: an append-only JSONL file.
//!
//! Every agent process appends through its own `SpanLog` and tails the same
//! file with a `SpanReader`. Each append is a single `write_all` of one
//! complete line on a file opened in append mode, so concurrent writers never
//! interleave partial records.

use crate::span_reader::{PollResult, SpanReader};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use swarm_proto::Span;
use tracing::trace;

/// Append handle for the shared log file.
#[derive(Debug)]
pub struct SpanLog {
    path: PathBuf,
    /// Serializes appends from tasks within this process.
    write_lock: Mutex<()>,
}

impl SpanLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the log file (and parent directories) if it does not exist.
    pub fn touch(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    /// Appends one span as one line.
    pub fn append(&self, span: &Span) -> io::Result<()> {
        let mut line = span
            .to_line()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| io::Error::other("span log write lock poisoned"))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        trace!(name = %span.name, span_id = %span.span_id, "Appended span");
        Ok(())
    }

    /// Reads every complete span currently in the log.
    pub fn read_all(&self) -> io::Result<PollResult> {
        SpanReader::new(&self.path).poll()
    }

    /// Current size of the log in bytes (0 if it does not exist yet).
    pub fn len(&self) -> io::Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_writes_one_line_per_span() {
        let dir = TempDir::new().unwrap();
        let log = SpanLog::new(dir.path().join("spans.jsonl"));

        log.append(&Span::new("ping.request")).unwrap();
        log.append(&Span::new("ping.pong")).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));

        let result = log.read_all().unwrap();
        assert_eq!(result.spans.len(), 2);
        assert_eq!(result.spans[0].name, "ping.request");
        assert_eq!(result.spans[1].name, "ping.pong");
    }

    #[test]
    fn test_append_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let log = SpanLog::new(dir.path().join("nested/coord/spans.jsonl"));
        log.append(&Span::new("a.b")).unwrap();
        assert!(log.path().exists());
        assert!(!log.is_empty().unwrap());
    }

    #[test]
    fn test_len_of_missing_file_is_zero() {
        let dir = TempDir::new().unwrap();
        let log = SpanLog::new(dir.path().join("missing.jsonl"));
        assert_eq!(log.len().unwrap(), 0);
        assert!(log.read_all().unwrap().spans.is_empty());
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let log = Arc::new(SpanLog::new(dir.path().join("spans.jsonl")));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let span = Span::new(format!("writer{t}.record")).with_attr("i", i);
                        log.append(&span).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let result = log.read_all().unwrap();
        assert_eq!(result.spans.len(), 100);
        assert!(result.malformed.is_empty());
    }
}
