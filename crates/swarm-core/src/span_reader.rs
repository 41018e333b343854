//! Span reader: a cursor that tails the shared JSONL log.

use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use swarm_proto::Span;
use tracing::{debug, info, warn};

/// Result of one poll of the log.
///
/// Contains both the spans parsed from complete lines and information about
/// lines that failed to parse, so callers can count and surface them.
#[derive(Debug, Clone, Default)]
pub struct PollResult {
    /// Successfully parsed spans, in log order.
    pub spans: Vec<Span>,
    /// Byte offset just past each span's line, parallel to `spans`.
    pub span_ends: Vec<u64>,
    /// Lines that failed to parse.
    pub malformed: Vec<MalformedLine>,
    /// True if the log shrank and the cursor was reset before reading.
    pub rotated: bool,
}

impl PollResult {
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.malformed.is_empty()
    }
}

/// Information about a malformed log line.
#[derive(Debug, Clone, Serialize)]
pub struct MalformedLine {
    /// Line number in the current log segment (1-indexed).
    pub line_number: u64,
    /// The raw content that failed to parse (truncated if very long).
    pub content: String,
    /// The parse error message.
    pub error: String,
}

impl MalformedLine {
    /// Maximum content length before truncation.
    const MAX_CONTENT_LEN: usize = 100;

    /// Creates a new MalformedLine, truncating content if needed.
    pub fn new(line_number: u64, content: &str, error: String) -> Self {
        let content = match content.char_indices().nth(Self::MAX_CONTENT_LEN) {
            Some((cut, _)) => format!("{}...", &content[..cut]),
            None => content.to_string(),
        };
        Self {
            line_number,
            content,
            error,
        }
    }
}

/// Where a new reader starts in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Replay everything already in the log.
    #[default]
    Beginning,
    /// Only see spans appended from now on.
    End,
    /// Resume from a previously consumed byte offset.
    Offset(u64),
}

/// Reads new spans from the log since the last poll.
///
/// The reader keeps a byte offset and a buffer holding any incomplete
/// trailing line. The offset only moves backwards on an explicit `replay()`
/// or when the file shrinks below it, which is treated as rotation or
/// truncation.
#[derive(Debug)]
pub struct SpanReader {
    path: PathBuf,
    position: u64,
    partial: Vec<u8>,
    lines_read: u64,
}

impl SpanReader {
    /// Creates a reader positioned at the start of the log.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            position: 0,
            partial: Vec::new(),
            lines_read: 0,
        }
    }

    /// Creates a reader at the given start position.
    pub fn with_start(path: impl Into<PathBuf>, start: StartPosition) -> io::Result<Self> {
        let mut reader = Self::new(path);
        match start {
            StartPosition::Beginning => {}
            StartPosition::End => reader.seek_to_end()?,
            StartPosition::Offset(offset) => {
                reader.position = offset;
                reader.lines_read = count_lines_before(&reader.path, offset)?;
            }
        }
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads spans appended since the last poll.
    ///
    /// Complete lines are parsed in order; a trailing fragment without a
    /// newline stays buffered until a later poll completes it. A line that
    /// fails to parse is reported in `malformed` and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn poll(&mut self) -> io::Result<PollResult> {
        let mut result = PollResult::default();

        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(e),
        };

        if len < self.position {
            info!(
                path = %self.path.display(),
                size = len,
                offset = self.position,
                "Span log shrank below cursor, treating as rotation"
            );
            self.replay();
            result.rotated = true;
        }

        if len == self.position {
            return Ok(result);
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.position))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let base = self.consumed();
        self.position += buf.len() as u64;
        self.partial.extend_from_slice(&buf);

        let mut start = 0;
        while let Some(rel) = self.partial[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            self.lines_read += 1;
            if parse_line(self.lines_read, &self.partial[start..end], &mut result) {
                result.span_ends.push(base + end as u64 + 1);
            }
            start = end + 1;
        }
        self.partial.drain(..start);

        if !self.partial.is_empty() {
            debug!(
                buffered = self.partial.len(),
                "Holding incomplete trailing line until next poll"
            );
        }

        Ok(result)
    }

    /// Returns the byte offset read so far, including buffered partial bytes.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the offset of the last fully consumed line.
    ///
    /// This is the offset to persist: resuming from it re-reads any partial
    /// line that was buffered but never completed.
    pub fn consumed(&self) -> u64 {
        self.position - self.partial.len() as u64
    }

    /// Number of buffered bytes belonging to an incomplete line.
    pub fn buffered(&self) -> usize {
        self.partial.len()
    }

    /// Resets the cursor to the start of the log.
    pub fn replay(&mut self) {
        self.position = 0;
        self.partial.clear();
        self.lines_read = 0;
    }

    /// Moves the cursor to the current end of the log, skipping existing spans.
    pub fn seek_to_end(&mut self) -> io::Result<()> {
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        self.lines_read = count_lines_before(&self.path, len)?;
        self.position = len;
        self.partial.clear();
        Ok(())
    }
}

/// Parses one complete line into `result`. Returns true if a span was added.
fn parse_line(line_number: u64, bytes: &[u8], result: &mut PollResult) -> bool {
    let line = String::from_utf8_lossy(bytes);
    let line = line.trim();
    if line.is_empty() {
        return false;
    }

    match Span::from_line(line) {
        Ok(span) => {
            result.spans.push(span);
            true
        }
        Err(e) => {
            warn!(error = %e, line_number = line_number, "Malformed span line");
            result
                .malformed
                .push(MalformedLine::new(line_number, line, e.to_string()));
            false
        }
    }
}

/// Counts newline-terminated lines in the first `offset` bytes of the file.
fn count_lines_before(path: &Path, offset: u64) -> io::Result<u64> {
    if offset == 0 {
        return Ok(0);
    }
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file.take(offset));
    let mut count = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn span_line(name: &str, id: &str) -> String {
        format!(r#"{{"name":"{name}","span_id":"{id}","trace_id":"t","timestamp":1.0}}"#)
    }

    #[test]
    fn test_reads_complete_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", span_line("ping.request", "a")).unwrap();
        writeln!(file, "{}", span_line("ping.pong", "b")).unwrap();
        file.flush().unwrap();

        let mut reader = SpanReader::new(file.path());
        let result = reader.poll().unwrap();

        assert_eq!(result.spans.len(), 2);
        assert_eq!(result.spans[0].span_id, "a");
        assert_eq!(result.spans[1].span_id, "b");
        assert!(result.malformed.is_empty());
        assert!(!result.rotated);
    }

    #[test]
    fn test_only_new_spans_on_later_polls() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", span_line("first", "1")).unwrap();
        file.flush().unwrap();

        let mut reader = SpanReader::new(file.path());
        assert_eq!(reader.poll().unwrap().spans.len(), 1);

        writeln!(file, "{}", span_line("second", "2")).unwrap();
        file.flush().unwrap();

        let result = reader.poll().unwrap();
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].name, "second");
    }

    #[test]
    fn test_idle_poll_has_no_side_effects() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", span_line("only", "1")).unwrap();
        file.flush().unwrap();

        let mut reader = SpanReader::new(file.path());
        reader.poll().unwrap();
        let position = reader.position();

        let result = reader.poll().unwrap();
        assert!(result.is_empty());
        assert!(!result.rotated);
        assert_eq!(reader.position(), position);
    }

    #[test]
    fn test_partial_line_is_buffered_until_completed() {
        let mut file = NamedTempFile::new().unwrap();
        let line = span_line("governance.motion.open", "seed");
        let (head, tail) = line.split_at(20);

        write!(file, "{head}").unwrap();
        file.flush().unwrap();

        let mut reader = SpanReader::new(file.path());
        let result = reader.poll().unwrap();
        assert!(result.is_empty());
        assert_eq!(reader.buffered(), head.len());
        assert_eq!(reader.consumed(), 0);

        writeln!(file, "{tail}").unwrap();
        file.flush().unwrap();

        let result = reader.poll().unwrap();
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].span_id, "seed");
        assert_eq!(reader.buffered(), 0);
        assert_eq!(reader.consumed(), reader.position());
    }

    #[test]
    fn test_malformed_line_is_skipped_not_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{corrupt json").unwrap();
        for i in 0..3 {
            writeln!(file, "{}", span_line("valid", &i.to_string())).unwrap();
        }
        file.flush().unwrap();

        let mut reader = SpanReader::new(file.path());
        let result = reader.poll().unwrap();

        assert_eq!(result.spans.len(), 3);
        let ids: Vec<_> = result.spans.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
        assert_eq!(result.malformed.len(), 1);
        assert_eq!(result.malformed[0].line_number, 1);
        assert!(result.malformed[0].content.contains("corrupt json"));
    }

    #[test]
    fn test_span_ends_track_line_offsets() {
        let mut file = NamedTempFile::new().unwrap();
        let first = span_line("first", "1");
        let second = span_line("second", "2");
        writeln!(file, "{first}").unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, "{second}").unwrap();
        file.flush().unwrap();

        let mut reader = SpanReader::new(file.path());
        let result = reader.poll().unwrap();

        let first_end = first.len() as u64 + 1;
        let second_end = first_end + "not json\n".len() as u64 + second.len() as u64 + 1;
        assert_eq!(result.span_ends, vec![first_end, second_end]);
        assert_eq!(reader.consumed(), second_end);
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file).unwrap();
        writeln!(file, "   ").unwrap();
        writeln!(file, "{}", span_line("after.blank", "x")).unwrap();
        file.flush().unwrap();

        let result = SpanReader::new(file.path()).poll().unwrap();
        assert_eq!(result.spans.len(), 1);
        assert!(result.malformed.is_empty());
    }

    #[test]
    fn test_truncation_resets_cursor() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        fs::write(
            &path,
            format!("{}\n{}\n", span_line("old.one", "1"), span_line("old.two", "2")),
        )
        .unwrap();

        let mut reader = SpanReader::new(&path);
        assert_eq!(reader.poll().unwrap().spans.len(), 2);

        fs::write(&path, format!("{}\n", span_line("new", "3"))).unwrap();

        let result = reader.poll().unwrap();
        assert!(result.rotated);
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].span_id, "3");
    }

    #[test]
    fn test_replay_yields_same_sequence() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..5 {
            writeln!(file, "{}", span_line("replay.me", &i.to_string())).unwrap();
        }
        file.flush().unwrap();

        let first = SpanReader::new(file.path()).poll().unwrap().spans;
        let second = SpanReader::new(file.path()).poll().unwrap().spans;
        assert_eq!(first, second);

        let mut reader = SpanReader::new(file.path());
        let once = reader.poll().unwrap().spans;
        assert!(reader.poll().unwrap().spans.is_empty());
        reader.replay();
        assert_eq!(reader.poll().unwrap().spans, once);
    }

    #[test]
    fn test_start_at_end_skips_existing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", span_line("before", "1")).unwrap();
        file.flush().unwrap();

        let mut reader = SpanReader::with_start(file.path(), StartPosition::End).unwrap();
        assert!(reader.poll().unwrap().is_empty());

        writeln!(file, "not json").unwrap();
        writeln!(file, "{}", span_line("after", "2")).unwrap();
        file.flush().unwrap();

        let result = reader.poll().unwrap();
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].name, "after");
        // Line numbers continue across the skipped prefix.
        assert_eq!(result.malformed[0].line_number, 2);
    }

    #[test]
    fn test_start_at_offset_resumes() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", span_line("one", "1")).unwrap();
        file.flush().unwrap();

        let mut first = SpanReader::new(file.path());
        first.poll().unwrap();
        let offset = first.consumed();

        writeln!(file, "{}", span_line("two", "2")).unwrap();
        file.flush().unwrap();

        let mut resumed =
            SpanReader::with_start(file.path(), StartPosition::Offset(offset)).unwrap();
        let result = resumed.poll().unwrap();
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].name, "two");
    }

    #[test]
    fn test_missing_file() {
        let mut reader = SpanReader::new("/nonexistent/spans.jsonl");
        let result = reader.poll().unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_malformed_content_truncated() {
        let long = "x".repeat(300);
        let line = MalformedLine::new(7, &long, "bad".into());
        assert_eq!(line.content.len(), 103);
        assert!(line.content.ends_with("..."));
    }
}
