//! Small ancillary "files" synthesized in memory.
//!
//! Both documents are served through their own virtual input so nothing is
//! ever written to the filesystem.

use crate::catalog::{Chapter, StreamDescriptor};
use std::fmt::Write as _;

/// Renders an `ffconcat` manifest that lists `addresses` in playback order.
///
/// Every catalog stream is declared with its id. The concat demuxer only
/// gives its output streams an id through `exact_stream_id`, and outputs
/// select streams by that id.
pub fn concat_manifest(addresses: &[String], streams: &[StreamDescriptor]) -> String {
    let mut doc = String::from("ffconcat version 1.0\n");
    for stream in streams {
        let _ = writeln!(doc, "stream\nexact_stream_id 0x{:x}", stream.id);
    }
    for address in addresses {
        let _ = writeln!(doc, "file '{}'", escape_concat_path(address));
    }
    doc
}

/// Renders chapters as an `;FFMETADATA1` document with a millisecond timebase.
pub fn chapter_metadata(chapters: &[Chapter]) -> String {
    let mut doc = String::from(";FFMETADATA1\n");
    for chapter in chapters {
        let start = (chapter.start_seconds * 1000.0).round().max(0.0) as u64;
        let end = (chapter.end_seconds * 1000.0).round().max(0.0) as u64;
        doc.push_str("\n[CHAPTER]\nTIMEBASE=1/1000\n");
        let _ = writeln!(doc, "START={start}");
        let _ = writeln!(doc, "END={}", end.max(start));
        if !chapter.name.is_empty() {
            let _ = writeln!(doc, "title={}", escape_metadata_value(&chapter.name));
        }
    }
    doc
}

// Inside single quotes the only special character is the quote itself.
fn escape_concat_path(path: &str) -> String {
    path.replace('\'', r"'\''")
}

fn escape_metadata_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
