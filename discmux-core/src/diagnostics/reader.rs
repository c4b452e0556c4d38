// ============================================================================
// discmux-core/src/diagnostics/reader.rs
// ============================================================================
//
// PROCESS TEXT STREAM READER: Incremental Parser for Transcoder Diagnostics
//
// Reads the transcoder's stderr line by line while the process runs. Lines
// end at either '\r' (progress stats) or '\n'. Each line has its log-level
// prefix removed and its indentation measured; block boundaries are decided
// by indentation alone.
//
// KEY COMPONENTS:
// - DiagnosticLine: one line with level, indentation and text
// - ProcessTextStreamReader: one-line lookahead plus the two block primitives
//   `read_until_block` and `read_block`
//
// `read_block` is a pushdown parser over (indent, block) frames. A block owns
// every following line indented strictly deeper than itself; the first line
// at or above its indentation closes it and is pushed back for the caller.

use super::block::StructuredBlock;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{self, BufRead};

/// Matches any `[component @ 0x...] ` contexts (ffmpeg nests parent and child
/// contexts) and the `[level] ` prefix ffmpeg adds with `-loglevel level+...`.
static LEVEL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:\[[^\]]* @ [^\]]*\] )*)\[(quiet|panic|fatal|error|warning|info|verbose|debug|trace)\] ")
        .unwrap_or_else(|e| panic!("invalid level prefix regex: {e}"))
});

/// Called for every line read from the underlying stream, exactly once.
pub type LineObserver = Box<dyn FnMut(&DiagnosticLine) + Send>;

/// One non-empty line of diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLine {
    /// Level parsed from the line prefix, if the tool printed one.
    pub level: Option<log::Level>,
    /// Number of leading whitespace characters.
    pub indent: usize,
    line: String,
}

impl DiagnosticLine {
    /// Parses a raw line, removing the level prefix.
    pub fn parse(raw: &str) -> Self {
        let (level, line) = match LEVEL_PREFIX.captures(raw) {
            Some(caps) => {
                let context = caps.get(1).map_or("", |m| m.as_str());
                let level = caps.get(2).map(|m| map_level(m.as_str()));
                let rest = &raw[caps.get(0).map_or(0, |m| m.end())..];
                (level, format!("{context}{rest}"))
            }
            None => (None, raw.to_string()),
        };
        let line = line.trim_end().to_string();
        let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
        Self {
            level,
            indent,
            line,
        }
    }

    /// The line without indentation.
    pub fn text(&self) -> &str {
        &self.line[self.indent..]
    }

    /// The line as the tool printed it, minus the level prefix.
    pub fn as_str(&self) -> &str {
        &self.line
    }
}

fn map_level(tag: &str) -> log::Level {
    match tag {
        "warning" => log::Level::Warn,
        "info" => log::Level::Info,
        "verbose" | "debug" => log::Level::Debug,
        "trace" => log::Level::Trace,
        _ => log::Level::Error,
    }
}

struct Frame {
    block: StructuredBlock,
    /// "Metadata:" frames fold their lines into the parent as key/value pairs.
    collapse: bool,
}

impl Frame {
    fn open(line: &DiagnosticLine) -> Self {
        Self {
            block: StructuredBlock::new(line.text(), line.indent),
            collapse: line.text() == "Metadata:",
        }
    }

    fn add_metadata(&mut self, text: &str) {
        let metadata = &mut self.block.metadata;
        match text.split_once(':') {
            // Multi-line values continue on lines that start with ':'.
            Some((key, value)) if key.trim().is_empty() => {
                if let Some((_, last)) = metadata.last_mut() {
                    last.push('\n');
                    last.push_str(value.trim());
                }
            }
            Some((key, value)) => metadata.push((key.trim().to_string(), value.trim().to_string())),
            None => metadata.push((text.trim().to_string(), String::new())),
        }
    }
}

fn close_frame(stack: &mut Vec<Frame>) {
    if stack.len() < 2 {
        return;
    }
    if let Some(frame) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            if frame.collapse {
                parent.block.metadata.extend(frame.block.metadata);
            } else {
                parent.block.children.push(frame.block);
            }
        }
    }
}

/// Incremental reader over a process's diagnostic text.
pub struct ProcessTextStreamReader<R> {
    inner: R,
    pending: Option<DiagnosticLine>,
    observer: Option<LineObserver>,
    eof: bool,
}

impl<R: BufRead> ProcessTextStreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: None,
            observer: None,
            eof: false,
        }
    }

    /// Installs a callback that sees every line as it is read.
    pub fn with_observer(mut self, observer: LineObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn read_raw(&mut self) -> io::Result<Option<String>> {
        if self.eof {
            return Ok(None);
        }
        let mut buf = Vec::new();
        loop {
            let available = match self.inner.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                self.eof = true;
                break;
            }
            let (done, used) = match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(i) => {
                    buf.extend_from_slice(&available[..i]);
                    (true, i + 1)
                }
                None => {
                    buf.extend_from_slice(available);
                    (false, available.len())
                }
            };
            self.inner.consume(used);
            if done {
                break;
            }
        }
        if buf.is_empty() && self.eof {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Returns the next non-empty line, honouring pushback.
    pub fn next_line(&mut self) -> io::Result<Option<DiagnosticLine>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        while let Some(raw) = self.read_raw()? {
            if raw.trim().is_empty() {
                continue;
            }
            let line = DiagnosticLine::parse(&raw);
            if line.as_str().trim().is_empty() {
                continue;
            }
            if let Some(observer) = self.observer.as_mut() {
                observer(&line);
            }
            return Ok(Some(line));
        }
        Ok(None)
    }

    /// Looks at the next line without consuming it.
    pub fn peek_line(&mut self) -> io::Result<Option<&DiagnosticLine>> {
        if self.pending.is_none() {
            self.pending = self.next_line()?;
        }
        Ok(self.pending.as_ref())
    }

    /// Returns a line so the next `next_line` yields it again.
    ///
    /// Only one line of pushback is kept; pushing twice replaces the first.
    pub fn push_back(&mut self, line: DiagnosticLine) {
        self.pending = Some(line);
    }

    /// Reads until a line satisfying `is_marker`, handing every other line to
    /// `on_other`. Returns the marker line, or `None` at end of stream.
    pub fn read_until_block<P, F>(
        &mut self,
        mut is_marker: P,
        mut on_other: F,
    ) -> io::Result<Option<DiagnosticLine>>
    where
        P: FnMut(&DiagnosticLine) -> bool,
        F: FnMut(DiagnosticLine),
    {
        while let Some(line) = self.next_line()? {
            if is_marker(&line) {
                return Ok(Some(line));
            }
            on_other(line);
        }
        Ok(None)
    }

    /// Reads the lines belonging to the block opened by `header`.
    ///
    /// End of stream in the middle of a block truncates it; whatever was
    /// parsed so far is returned.
    pub fn read_block(&mut self, header: &DiagnosticLine) -> io::Result<StructuredBlock> {
        let mut stack = vec![Frame::open(header)];
        while let Some(line) = self.next_line()? {
            if line.indent <= header.indent {
                self.push_back(line);
                break;
            }
            while stack.len() > 1 && stack.last().is_some_and(|f| f.block.indent >= line.indent) {
                close_frame(&mut stack);
            }
            match stack.last_mut() {
                Some(top) if top.collapse => top.add_metadata(line.text()),
                _ => stack.push(Frame::open(&line)),
            }
        }
        while stack.len() > 1 {
            close_frame(&mut stack);
        }
        Ok(stack.pop().map(|f| f.block).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn reader(text: &str) -> ProcessTextStreamReader<Cursor<Vec<u8>>> {
        ProcessTextStreamReader::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_lines_split_on_cr_and_lf() {
        let mut r = reader("first\r\nframe=  1 time=00:00:00.04\rframe=  2\n\nlast");
        let mut lines = Vec::new();
        while let Some(line) = r.next_line().unwrap() {
            lines.push(line.as_str().to_string());
        }
        assert_eq!(lines, ["first", "frame=  1 time=00:00:00.04", "frame=  2", "last"]);
    }

    #[test]
    fn test_level_prefix_is_stripped() {
        let line = DiagnosticLine::parse("[info]   Duration: 00:01:30.00, start: 0.0");
        assert_eq!(line.level, Some(log::Level::Info));
        assert_eq!(line.indent, 2);
        assert_eq!(line.text(), "Duration: 00:01:30.00, start: 0.0");

        let line = DiagnosticLine::parse("[mpegts @ 0x55d0] [warning] Packet corrupt");
        assert_eq!(line.level, Some(log::Level::Warn));
        assert_eq!(line.as_str(), "[mpegts @ 0x55d0] Packet corrupt");

        let line = DiagnosticLine::parse("Input #0, mpegts, from 'x':");
        assert_eq!(line.level, None);
        assert_eq!(line.indent, 0);
    }

    #[test]
    fn test_level_prefix_after_nested_contexts() {
        let line =
            DiagnosticLine::parse("[in#0/concat @ 0x55] [mpegts @ 0x66] [error] Packet corrupt");
        assert_eq!(line.level, Some(log::Level::Error));
        assert_eq!(line.as_str(), "[in#0/concat @ 0x55] [mpegts @ 0x66] Packet corrupt");
        assert_eq!(line.indent, 0);
    }

    #[test]
    fn test_read_until_block_hands_over_other_lines() {
        let mut r = reader("ffmpeg version 7.0\n  built with gcc\nInput #0, mpegts:\n  Duration: N/A\n");
        let mut others = Vec::new();
        let marker = r
            .read_until_block(|l| l.text().starts_with("Input #"), |l| others.push(l.text().to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(marker.text(), "Input #0, mpegts:");
        assert_eq!(others, ["ffmpeg version 7.0", "built with gcc"]);
    }

    #[test]
    fn test_read_block_builds_nested_structure() {
        let text = "\
Input #0, mpegts, from 'in':
  Metadata:
    title           : Feature
  Duration: 00:01:30.00, start: 0.000000, bitrate: 1000 kb/s
  Chapters:
    Chapter #0:0: start 0.000000, end 45.000000
      Metadata:
        title           : Opening
    Chapter #0:1: start 45.000000, end 90.000000
  Stream #0:0[0x1011]: Video: h264 (High)
  Stream #0:1[0x1100](eng): Audio: ac3, 48000 Hz
    Metadata:
      comment         : first line
                      : second line
Stream mapping:
";
        let mut r = reader(text);
        let header = r.next_line().unwrap().unwrap();
        let block = r.read_block(&header).unwrap();

        assert_eq!(block.name, "Input #0, mpegts, from 'in':");
        assert_eq!(block.metadata_value("title"), Some("Feature"));
        let names: Vec<_> = block.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names.len(), 4);
        assert!(names[0].starts_with("Duration:"));
        assert_eq!(names[1], "Chapters:");

        let chapters = &block.children[1].children;
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].metadata_value("title"), Some("Opening"));
        assert!(chapters[1].metadata.is_empty());

        let audio = &block.children[3];
        assert_eq!(audio.metadata_value("comment"), Some("first line\nsecond line"));
        assert!(audio.children.is_empty());

        // The line that closed the block is still available.
        assert_eq!(r.next_line().unwrap().unwrap().text(), "Stream mapping:");
    }

    #[test]
    fn test_read_block_truncates_at_eof() {
        let mut r = reader("Input #1, ffmetadata, from 'chapters':\n  Chapters:\n    Chapter #1:0: start 0");
        let header = r.next_line().unwrap().unwrap();
        let block = r.read_block(&header).unwrap();
        assert_eq!(block.children.len(), 1);
        assert_eq!(block.children[0].children[0].name, "Chapter #1:0: start 0");
        assert!(r.next_line().unwrap().is_none());
    }

    #[test]
    fn test_peek_and_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut r = reader("a\nb\n").with_observer(Box::new(move |l: &DiagnosticLine| {
            sink.lock().unwrap().push(l.text().to_string());
        }));

        assert_eq!(r.peek_line().unwrap().map(|l| l.text().to_string()), Some("a".to_string()));
        assert_eq!(r.next_line().unwrap().unwrap().text(), "a");
        let b = r.next_line().unwrap().unwrap();
        r.push_back(b);
        assert_eq!(r.next_line().unwrap().unwrap().text(), "b");
        assert!(r.next_line().unwrap().is_none());

        // Pushed-back lines are not observed twice.
        assert_eq!(*seen.lock().unwrap(), ["a", "b"]);
    }
}
