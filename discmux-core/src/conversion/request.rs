//! What a caller asks a conversion job to produce.

use crate::catalog::{Chapter, Segment, StreamDescriptor};
#[cfg(test)]
use crate::catalog::StreamKind;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// How one output stream is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum CodecChoice {
    /// Copy the elementary stream unchanged.
    #[default]
    Copy,
    /// Re-encode with the named transcoder codec, passing extra options through verbatim.
    Encode {
        codec: String,
        #[serde(default)]
        options: Vec<String>,
    },
}

/// One stream of an output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStream {
    /// Catalog stream id ([`StreamDescriptor::id`]).
    pub stream_id: u32,
    #[serde(default)]
    pub codec: CodecChoice,
}

/// One output file of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Final file name; the transcoder writes to a working name next to it.
    pub path: PathBuf,
    /// Muxer name passed with `-f` (e.g. "matroska", "mpegts").
    pub format: String,
    pub streams: Vec<OutputStream>,
    /// Whether the job's chapter list is written into this output.
    #[serde(default)]
    pub include_chapters: bool,
}

/// A complete export request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Segments in playback order.
    pub segments: Vec<Segment>,
    /// Streams of the first segment.
    pub streams: Vec<StreamDescriptor>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    pub outputs: Vec<OutputSpec>,
    /// Expected running time in seconds, reported in progress snapshots.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

impl ConversionRequest {
    /// Sum of the raw lengths of all segments.
    pub fn total_input_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.raw_length).sum()
    }

    /// Whether any output wants chapters and there are chapters to write.
    pub fn needs_chapters(&self) -> bool {
        !self.chapters.is_empty() && self.outputs.iter().any(|o| o.include_chapters)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_seconds
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn stream(&self, id: u32) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.id == id)
    }

    /// Checks the request is internally consistent.
    pub fn validate(&self) -> CoreResult<()> {
        if self.segments.is_empty() {
            return Err(CoreError::Config("no segments to convert".to_string()));
        }
        if self.outputs.is_empty() {
            return Err(CoreError::Config("no outputs requested".to_string()));
        }

        let mut ids = HashSet::new();
        for segment in &self.segments {
            if !ids.insert(segment.id.as_str()) {
                return Err(CoreError::Config(format!(
                    "segment '{}' is listed twice",
                    segment.id
                )));
            }
        }

        let mut paths = HashSet::new();
        for output in &self.outputs {
            if output.path.file_name().is_none() {
                return Err(CoreError::Config(format!(
                    "output path '{}' has no file name",
                    output.path.display()
                )));
            }
            if !paths.insert(output.path.as_path()) {
                return Err(CoreError::Config(format!(
                    "output '{}' is listed twice",
                    output.path.display()
                )));
            }
            if output.format.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "output '{}' has no container format",
                    output.path.display()
                )));
            }
            if output.streams.is_empty() {
                return Err(CoreError::Config(format!(
                    "output '{}' selects no streams",
                    output.path.display()
                )));
            }
            for stream in &output.streams {
                if self.stream(stream.stream_id).is_none() {
                    return Err(CoreError::Config(format!(
                        "output '{}' references unknown stream {}",
                        output.path.display(),
                        stream.stream_id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Two segments of 1 MB and 4 MB with one video and one audio stream.
#[cfg(test)]
pub(crate) fn sample_request() -> ConversionRequest {
    ConversionRequest {
        segments: vec![
            Segment { id: "00001.m2ts".into(), raw_length: 1_000_000 },
            Segment { id: "00002.m2ts".into(), raw_length: 4_000_000 },
        ],
        streams: vec![
            StreamDescriptor { id: 0x1011, kind: StreamKind::Video, language: None, is_default: true },
            StreamDescriptor { id: 0x1100, kind: StreamKind::Audio, language: Some("eng".into()), is_default: true },
        ],
        chapters: vec![Chapter { start_seconds: 0.0, end_seconds: 60.0, name: "One".into() }],
        outputs: vec![OutputSpec {
            path: PathBuf::from("/out/movie.mkv"),
            format: "matroska".into(),
            streams: vec![
                OutputStream { stream_id: 0x1011, codec: CodecChoice::Copy },
                OutputStream { stream_id: 0x1100, codec: CodecChoice::Copy },
            ],
            include_chapters: true,
        }],
        duration_seconds: None,
    }
}
