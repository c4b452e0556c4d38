//! Core library for extracting optical-disc segments through an external
//! transcoder without writing decrypted content to disk.
//!
//! The pieces, leaves first:
//!
//! - [`stream::DecryptedUnitStream`] turns an encrypted segment plus a
//!   [`stream::UnitDecryptor`] into a seekable plaintext stream.
//! - [`bridge::VirtualInputBridge`] exposes any byte source to another
//!   process as a named pipe or loopback socket.
//! - [`diagnostics::ProcessTextStreamReader`] parses the transcoder's live,
//!   indentation-structured stderr; [`diagnostics::MetadataExtractor`] turns
//!   it into stream, chapter and duration metadata.
//! - [`conversion::ConversionJob`] ties everything into one export with
//!   byte-based progress and crash-safe output finalization.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use discmux_core::catalog::FileSegmentSource;
//! use discmux_core::config::JobConfigBuilder;
//! use discmux_core::conversion::{
//!     CodecChoice, ConversionJob, ConversionRequest, OutputSpec, OutputStream,
//! };
//! use discmux_core::external::SidecarSpawner;
//! use discmux_core::stream::{PassthroughDecryptor, unit_sizes};
//! use std::sync::{Arc, mpsc};
//!
//! let source = FileSegmentSource::new(
//!     "/media/disc/BDMV/STREAM",
//!     unit_sizes::BLURAY_ALIGNED_UNIT,
//!     Arc::new(PassthroughDecryptor),
//! );
//! let request = ConversionRequest {
//!     segments: vec![source.segment("00001.m2ts").unwrap()],
//!     streams: vec![],
//!     chapters: vec![],
//!     outputs: vec![OutputSpec {
//!         path: "/tmp/movie.mkv".into(),
//!         format: "matroska".into(),
//!         streams: vec![OutputStream { stream_id: 0x1011, codec: CodecChoice::Copy }],
//!         include_chapters: false,
//!     }],
//!     duration_seconds: None,
//! };
//!
//! let (tx, rx) = mpsc::channel();
//! let job = ConversionJob::new(JobConfigBuilder::new().build().unwrap(), request, Arc::new(source))
//!     .with_progress(tx);
//! let worker = std::thread::spawn(move || job.run(&SidecarSpawner));
//! for snapshot in rx {
//!     println!("{:?}", snapshot.percentage);
//! }
//! let report = worker.join().unwrap().unwrap();
//! println!("produced {:?}", report.outputs);
//! ```

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod conversion;
pub mod diagnostics;
pub mod error;
pub mod external;
pub mod file_logging;
pub mod stream;
pub mod utils;

// Re-exports for public API
pub use catalog::{Chapter, FileSegmentSource, Segment, SegmentSource, StreamDescriptor, StreamKind};
pub use config::{EndpointKind, JobConfig, JobConfigBuilder};
pub use conversion::{
    ConversionJob, ConversionReport, ConversionRequest, JobHandle, JobState, ProgressSnapshot,
    probe_inputs,
};
pub use diagnostics::InputMetadata;
pub use error::{CoreError, CoreResult};
pub use external::check_dependency;
pub use utils::{format_bytes, format_duration, parse_ffmpeg_time};
