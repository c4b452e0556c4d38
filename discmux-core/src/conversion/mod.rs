//! Conversion jobs: from a segment list to finalized output files.
//!
//! [`ConversionJob`] composes the pieces of the crate into one export. It
//! owns every virtual input it creates, runs the transcoder, aggregates
//! byte-based progress and finalizes output files only after a successful
//! exit. [`probe_inputs`] runs the same inputs through the transcoder without
//! outputs to recover stream and chapter metadata.

pub mod command;
pub mod finalize;
pub mod job;
pub mod progress;
pub mod request;

pub use command::{InputAddresses, build_invocation, build_probe_invocation};
pub use finalize::{FinalizeReport, OutputFile, finalize_outputs, working_path};
pub use job::{ConversionJob, ConversionReport, JobHandle, JobState, probe_inputs};
pub use progress::{ProgressAggregator, ProgressSnapshot};
pub use request::{CodecChoice, ConversionRequest, OutputSpec, OutputStream};
