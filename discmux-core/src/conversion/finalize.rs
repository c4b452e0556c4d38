//! Output finalization: working names become final names only after the
//! transcoder succeeded.

use crate::error::CoreError;
use log::{debug, warn};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// An output file and the name it is written under while the job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub working: PathBuf,
    pub final_path: PathBuf,
}

impl OutputFile {
    pub fn new(final_path: impl Into<PathBuf>, suffix: &str) -> Self {
        let final_path = final_path.into();
        Self {
            working: working_path(&final_path, suffix),
            final_path,
        }
    }
}

/// `movie.mkv` + `.part` -> `movie.mkv.part`, in the same directory.
pub fn working_path(final_path: &Path, suffix: &str) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    final_path.with_file_name(name)
}

/// Result of renaming working files.
#[derive(Debug, Default)]
pub struct FinalizeReport {
    /// Final paths that now exist.
    pub finalized: Vec<PathBuf>,
    /// Per-file problems; none of them stopped the other renames.
    pub problems: Vec<CoreError>,
}

impl FinalizeReport {
    /// Final paths whose working file was never produced.
    pub fn missing(&self) -> Vec<PathBuf> {
        self.problems
            .iter()
            .filter_map(|p| match p {
                CoreError::OutputMissing(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Renames every working file to its final name.
///
/// A missing working file is reported as [`CoreError::OutputMissing`] and
/// skipped.
pub fn finalize_outputs(files: &[OutputFile]) -> FinalizeReport {
    let mut report = FinalizeReport::default();
    for file in files {
        match fs::rename(&file.working, &file.final_path) {
            Ok(()) => {
                debug!(
                    "Finalized {} -> {}",
                    file.working.display(),
                    file.final_path.display()
                );
                report.finalized.push(file.final_path.clone());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "Transcoder did not produce {}; skipping",
                    file.working.display()
                );
                report
                    .problems
                    .push(CoreError::OutputMissing(file.final_path.clone()));
            }
            Err(e) => {
                warn!(
                    "Could not rename {} to {}: {e}",
                    file.working.display(),
                    file.final_path.display()
                );
                report.problems.push(CoreError::Io(e));
            }
        }
    }
    report
}
