//! JSON job plans.
//!
//! A plan is what the disc catalog hands to the CLI: where the segment files
//! live, which segments make up the title in playback order, the streams of
//! the first segment, the chapter marks and the outputs to produce.
//!
//! ```json
//! {
//!   "stream_dir": "/media/disc/BDMV/STREAM",
//!   "segments": ["00001.m2ts", "00002.m2ts"],
//!   "streams": [{ "id": 4113, "kind": "video", "is_default": true }],
//!   "chapters": [{ "start_seconds": 0.0, "end_seconds": 612.0, "name": "Opening" }],
//!   "outputs": [{
//!     "path": "/srv/movies/movie.mkv",
//!     "format": "matroska",
//!     "streams": [{ "stream_id": 4113, "codec": { "mode": "copy" } }]
//!   }]
//! }
//! ```

use anyhow::{Context, Result};
use discmux_core::catalog::{Chapter, FileSegmentSource, StreamDescriptor};
use discmux_core::conversion::OutputSpec;
use discmux_core::stream::{PassthroughDecryptor, unit_sizes};
use discmux_core::{ConversionRequest, CoreResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_unit_size() -> usize {
    unit_sizes::BLURAY_ALIGNED_UNIT
}

/// A job plan as read from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct JobPlan {
    /// Directory holding the segment files.
    pub stream_dir: PathBuf,
    /// Encryption unit size of the disc format.
    #[serde(default = "default_unit_size")]
    pub unit_size: usize,
    /// Segment file names in playback order.
    pub segments: Vec<String>,
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Running time, when the catalog knows it.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

impl JobPlan {
    /// Reads and parses a plan file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job plan '{}'", path.display()))?;
        let plan: JobPlan = serde_json::from_str(&text)
            .with_context(|| format!("Invalid job plan '{}'", path.display()))?;
        Ok(plan)
    }

    /// Segment source for the plan's stream directory.
    ///
    /// Segments are read as stored; decryption providers plug in through
    /// the core library, not through the plan.
    pub fn segment_source(&self) -> FileSegmentSource {
        FileSegmentSource::new(
            &self.stream_dir,
            self.unit_size,
            Arc::new(PassthroughDecryptor),
        )
    }

    /// Builds the conversion request, taking segment lengths from disk.
    pub fn to_request(&self, source: &FileSegmentSource) -> CoreResult<ConversionRequest> {
        let segments = self
            .segments
            .iter()
            .map(|id| source.segment(id))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(ConversionRequest {
            segments,
            streams: self.streams.clone(),
            chapters: self.chapters.clone(),
            outputs: self.outputs.clone(),
            duration_seconds: self.duration_seconds,
        })
    }
}
