// ============================================================================
// discmux-core/src/diagnostics/metadata.rs
// ============================================================================
//
// METADATA EXTRACTOR: Stream, Chapter and Duration Recovery
//
// Turns the first "Input #N" block per input into typed metadata. The
// transcoder prints this block once per input when it opens it; repeats are
// ignored so the first, most complete report wins.
//
// Lines recognised below an input (at any depth, since mpegts inputs nest
// streams under "Program" blocks):
// - "Duration: HH:MM:SS.ms, ..."
// - "Chapter #i:c: start X, end Y" with an optional title in its metadata
// - "Stream #i:s[0xPID](lang): Type: format, ..."

use super::block::StructuredBlock;
use super::reader::{DiagnosticLine, ProcessTextStreamReader};
use crate::catalog::StreamKind;
use crate::error::{CoreError, CoreResult};
use crate::utils::parse_ffmpeg_duration;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::io::BufRead;
use std::time::Duration;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid metadata regex {pattern}: {e}"))
}

static INPUT_RE: Lazy<Regex> = Lazy::new(|| compile(r"^Input #(\d+)(?:, ([^,]+))?"));
static DURATION_RE: Lazy<Regex> = Lazy::new(|| compile(r"^Duration:\s*([^,\s]+)"));
static CHAPTER_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"^Chapter #(\d+):(\d+): start (-?[0-9.]+), end (-?[0-9.]+)")
});
static STREAM_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"^Stream #(\d+):(\d+)(?:\[0x([0-9a-fA-F]+)\])?(?:\(([^)]*)\))?: (\w+):\s*([^,]*)")
});

/// A chapter as reported by the transcoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterInfo {
    pub input: u32,
    pub index: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub title: Option<String>,
}

/// A stream as reported by the transcoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub input: u32,
    pub index: u32,
    /// Transport-stream PID, when the container has one.
    pub pid: Option<u32>,
    pub language: Option<String>,
    pub kind: StreamKind,
    /// Codec description up to the first comma.
    pub format: String,
    pub is_default: bool,
    pub metadata: Vec<(String, String)>,
}

/// Everything recovered for one input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputMetadata {
    pub index: u32,
    /// Demuxer name, e.g. "mpegts" or "concat".
    pub format: Option<String>,
    pub duration: Option<Duration>,
    pub chapters: Vec<ChapterInfo>,
    pub streams: Vec<StreamInfo>,
    pub metadata: Vec<(String, String)>,
}

/// Whether a line opens an input block.
pub fn is_input_marker(line: &DiagnosticLine) -> bool {
    line.indent == 0 && line.text().starts_with("Input #")
}

/// Extracts [`InputMetadata`] from input blocks.
#[derive(Debug, Default)]
pub struct MetadataExtractor {
    seen: HashSet<u32>,
}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts metadata from an input block.
    ///
    /// Returns `Ok(None)` when the block is not an input block or its input was
    /// already extracted. An unrecognised stream type is an error.
    pub fn extract(&mut self, block: &StructuredBlock) -> CoreResult<Option<InputMetadata>> {
        let Some(caps) = INPUT_RE.captures(&block.name) else {
            return Ok(None);
        };
        let index = parse_u32(&caps[1], &block.name)?;
        if self.seen.contains(&index) {
            return Ok(None);
        }

        let mut input = InputMetadata {
            index,
            format: caps.get(2).map(|m| m.as_str().trim().to_string()),
            metadata: block.metadata.clone(),
            ..InputMetadata::default()
        };

        for child in block.descendants() {
            if let Some(caps) = DURATION_RE.captures(&child.name) {
                if input.duration.is_none() {
                    input.duration = parse_ffmpeg_duration(&caps[1]);
                }
            } else if let Some(caps) = CHAPTER_RE.captures(&child.name) {
                input.chapters.push(ChapterInfo {
                    input: parse_u32(&caps[1], &child.name)?,
                    index: parse_u32(&caps[2], &child.name)?,
                    start_seconds: parse_f64(&caps[3], &child.name)?,
                    end_seconds: parse_f64(&caps[4], &child.name)?,
                    title: child.metadata_value("title").map(str::to_string),
                });
            } else if let Some(caps) = STREAM_RE.captures(&child.name) {
                let tag = &caps[5];
                let kind = StreamKind::from_tag(tag)
                    .ok_or_else(|| CoreError::UnknownStreamType(tag.to_string()))?;
                let pid = caps
                    .get(3)
                    .map(|m| u32::from_str_radix(m.as_str(), 16))
                    .transpose()
                    .map_err(|e| CoreError::MetadataParse(format!("{}: {e}", child.name)))?;
                input.streams.push(StreamInfo {
                    input: parse_u32(&caps[1], &child.name)?,
                    index: parse_u32(&caps[2], &child.name)?,
                    pid,
                    language: caps
                        .get(4)
                        .map(|m| m.as_str().to_string())
                        .filter(|l| !l.is_empty() && l != "und"),
                    kind,
                    format: caps[6].trim().to_string(),
                    is_default: child.name.contains("(default)"),
                    metadata: child.metadata.clone(),
                });
            }
        }

        self.seen.insert(index);
        Ok(Some(input))
    }

    /// Reads a whole diagnostic stream, returning metadata for each input in
    /// the order the inputs were reported.
    pub fn read_all<R: BufRead>(
        &mut self,
        reader: &mut ProcessTextStreamReader<R>,
    ) -> CoreResult<Vec<InputMetadata>> {
        let mut inputs = Vec::new();
        while let Some(header) = reader.read_until_block(is_input_marker, |_| {})? {
            let block = reader.read_block(&header)?;
            if let Some(input) = self.extract(&block)? {
                inputs.push(input);
            }
        }
        Ok(inputs)
    }
}

fn parse_u32(value: &str, line: &str) -> CoreResult<u32> {
    value
        .parse()
        .map_err(|_| CoreError::MetadataParse(format!("bad number '{value}' in '{line}'")))
}

fn parse_f64(value: &str, line: &str) -> CoreResult<f64> {
    value
        .parse()
        .map_err(|_| CoreError::MetadataParse(format!("bad number '{value}' in '{line}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn extract_all(text: &str) -> CoreResult<Vec<InputMetadata>> {
        let mut reader = ProcessTextStreamReader::new(Cursor::new(text.as_bytes().to_vec()));
        MetadataExtractor::new().read_all(&mut reader)
    }

    #[test]
    fn test_minimal_input_block() {
        let inputs = extract_all("Input #0\n  Duration: 00:01:30.00,\n  Stream #0:0: Video: h264\n").unwrap();
        assert_eq!(inputs.len(), 1);
        let input = &inputs[0];
        assert_eq!(input.duration, Some(Duration::from_secs(90)));
        assert_eq!(input.streams.len(), 1);
        assert_eq!(input.streams[0].kind, StreamKind::Video);
        assert_eq!(input.streams[0].format, "h264");
    }

    #[test]
    fn test_full_bluray_style_block() {
        let text = "\
[info] ffmpeg version 7.0 Copyright (c) 2000-2024 the FFmpeg developers
[info] Input #0, mpegts, from 'tcp://127.0.0.1:40000':
[info]   Duration: 01:45:12.50, start: 11.650667, bitrate: 28000 kb/s
[info]   Program 1
[info]     Stream #0:0[0x1011]: Video: h264 (High) (HDMV / 0x564D4448), yuv420p, 1920x1080 (default)
[info]     Stream #0:1[0x1100](eng): Audio: truehd (AC-3 / 0x332D4341), 48000 Hz, 7.1
[info]     Stream #0:2[0x1200](fra): Subtitle: hdmv_pgs_subtitle ([144][0][0][0] / 0x0090)
[info] Input #1, ffmetadata, from '/tmp/x/chapters':
[info]   Duration: N/A, bitrate: N/A
[info]   Chapters:
[info]     Chapter #1:0: start 0.000000, end 612.000000
[info]       Metadata:
[info]         title           : Opening
[info]     Chapter #1:1: start 612.000000, end 6312.500000
[info] Input #0, mpegts, from 'again':
[info]   Stream #0:0: Audio: mp2
[info] Stream mapping:
";
        let inputs = extract_all(text).unwrap();
        assert_eq!(inputs.len(), 2);

        let main = &inputs[0];
        assert_eq!(main.format.as_deref(), Some("mpegts"));
        assert_eq!(main.duration, Some(Duration::from_secs_f64(6312.5)));
        assert_eq!(main.streams.len(), 3);
        let video = &main.streams[0];
        assert_eq!(video.pid, Some(0x1011));
        assert!(video.is_default);
        assert_eq!(video.format, "h264 (High) (HDMV / 0x564D4448)");
        let audio = &main.streams[1];
        assert_eq!(audio.kind, StreamKind::Audio);
        assert_eq!(audio.language.as_deref(), Some("eng"));
        assert_eq!(audio.format, "truehd (AC-3 / 0x332D4341)");
        assert_eq!(main.streams[2].kind, StreamKind::Subtitle);

        let chapters = &inputs[1];
        assert_eq!(chapters.duration, None);
        assert_eq!(chapters.chapters.len(), 2);
        assert_eq!(chapters.chapters[0].title.as_deref(), Some("Opening"));
        assert_eq!(chapters.chapters[1].start_seconds, 612.0);
        assert_eq!(chapters.chapters[1].title, None);
    }

    #[test]
    fn test_unknown_stream_type_is_an_error() {
        let err = extract_all("Input #0, mpegts:\n  Stream #0:3[0x1400]: Unknown: none\n").unwrap_err();
        assert!(matches!(err, CoreError::UnknownStreamType(tag) if tag == "Unknown"));
    }

    #[test]
    fn test_truncated_block_yields_partial_metadata() {
        let inputs = extract_all("Input #0, mpegts:\n  Duration: 00:00:10.00, start").unwrap();
        assert_eq!(inputs[0].duration, Some(Duration::from_secs(10)));
        assert!(inputs[0].streams.is_empty());
    }
}
