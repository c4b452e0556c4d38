//! Reading and interpreting the transcoder's diagnostic output.
//!
//! The transcoder writes human-oriented, indentation-structured text to
//! stderr. This module turns that text into [`StructuredBlock`]s, extracts
//! per-input metadata from them and recognises the periodic statistics line.
//! Parsing is best-effort: truncated or unexpected output yields partial
//! results rather than errors.

pub mod block;
pub mod metadata;
pub mod progress;
pub mod reader;

pub use block::StructuredBlock;
pub use metadata::{ChapterInfo, InputMetadata, MetadataExtractor, StreamInfo, is_input_marker};
pub use progress::{StatsLine, is_stats_line, parse_stats_line};
pub use reader::{DiagnosticLine, LineObserver, ProcessTextStreamReader};
