// ============================================================================
// discmux-core/src/catalog.rs
// ============================================================================
//
// CATALOG TYPES: Data Supplied by the Disc Catalog Collaborator
//
// Playlist / clip-info / IFO parsing lives outside this crate. What reaches
// the core is an ordered segment list, the stream descriptors of the first
// segment and the chapter list. This module defines those shapes and the
// file-backed segment source that turns a segment into a decrypted stream.

use crate::error::{CoreError, CoreResult};
use crate::stream::{ByteSource, DecryptedUnitStream, DecryptorProvider};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One transport-stream segment (a `.m2ts` clip or a `.VOB` file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Identifier; for file-backed sources, the file name inside the stream directory.
    pub id: String,
    /// Length of the encrypted segment in bytes.
    pub raw_length: u64,
}

/// Kind of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
}

impl StreamKind {
    /// Maps the transcoder's type tag ("Video", "Audio", ...) to a kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Video" => Some(StreamKind::Video),
            "Audio" => Some(StreamKind::Audio),
            "Subtitle" => Some(StreamKind::Subtitle),
            "Data" => Some(StreamKind::Data),
            "Attachment" => Some(StreamKind::Attachment),
            _ => None,
        }
    }

    /// Stream specifier letter used in transcoder options (`-c:v`, `-c:a`, ...).
    pub fn specifier(self) -> char {
        match self {
            StreamKind::Video => 'v',
            StreamKind::Audio => 'a',
            StreamKind::Subtitle => 's',
            StreamKind::Data => 'd',
            StreamKind::Attachment => 't',
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
            StreamKind::Data => "data",
            StreamKind::Attachment => "attachment",
        };
        f.pad(name)
    }
}

/// A stream as described by the disc catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Transport-stream PID (BluRay) or stream id (DVD).
    pub id: u32,
    pub kind: StreamKind,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// A chapter mark in presentation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(default)]
    pub name: String,
}

/// Opens the raw bytes of a segment as a plaintext stream.
pub trait SegmentSource: Send + Sync {
    fn open_segment(&self, segment: &Segment) -> CoreResult<ByteSource>;
}

/// Segments stored as files in one directory (e.g. `BDMV/STREAM`).
#[derive(Clone)]
pub struct FileSegmentSource {
    stream_dir: PathBuf,
    unit_size: usize,
    provider: Arc<dyn DecryptorProvider>,
}

impl FileSegmentSource {
    pub fn new(
        stream_dir: impl Into<PathBuf>,
        unit_size: usize,
        provider: Arc<dyn DecryptorProvider>,
    ) -> Self {
        Self {
            stream_dir: stream_dir.into(),
            unit_size,
            provider,
        }
    }

    pub fn stream_dir(&self) -> &Path {
        &self.stream_dir
    }

    /// Builds a [`Segment`] for `id`, taking its length from the file size.
    pub fn segment(&self, id: &str) -> CoreResult<Segment> {
        let path = self.stream_dir.join(id);
        let metadata = std::fs::metadata(&path).map_err(|e| CoreError::SourceReadFailed {
            segment_id: id.to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Ok(Segment {
            id: id.to_string(),
            raw_length: metadata.len(),
        })
    }
}

impl SegmentSource for FileSegmentSource {
    fn open_segment(&self, segment: &Segment) -> CoreResult<ByteSource> {
        let path = self.stream_dir.join(&segment.id);
        log::debug!("Opening segment {} ({})", segment.id, path.display());

        let file = File::open(&path).map_err(|e| CoreError::SourceReadFailed {
            segment_id: segment.id.clone(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let decryptor = self.provider.decryptor_for(segment)?;
        let stream = DecryptedUnitStream::new(
            BufReader::new(file),
            segment.raw_length,
            self.unit_size,
            decryptor,
        )?;
        Ok(Box::new(stream))
    }
}
