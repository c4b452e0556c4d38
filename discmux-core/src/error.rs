// ============================================================================
// discmux-core/src/error.rs
// ============================================================================
//
// ERROR HANDLING: Custom Error Types for discmux-core
//
// This module defines the error taxonomy of the core: fatal source and
// transcoder failures, non-fatal per-file finalization problems, and the
// ambient configuration / process-start errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the core library.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decryption of unit {unit} in segment '{segment_id}' failed: {message}")]
    DecryptionFailure {
        segment_id: String,
        unit: u64,
        message: String,
    },

    #[error("Reading segment '{segment_id}' failed: {cause}")]
    SourceReadFailed { segment_id: String, cause: String },

    #[error("Transcoder exited with {}", exit_code_text(.exit_code))]
    TranscodeFailed {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("Output file missing after transcode: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("Unrecognized stream type: {0}")]
    UnknownStreamType(String),

    #[error("Failed to parse transcoder metadata: {0}")]
    MetadataParse(String),

    #[error("Failed to start command '{0}': {1}")]
    CommandStart(String, #[source] io::Error),

    #[error("Required dependency '{0}' not found")]
    DependencyNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Virtual input setup failed: {0}")]
    BridgeSetup(String),

    #[error("Job cancelled")]
    Cancelled,
}

/// Result type for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Creates a `CommandStart` error for a command that could not be spawned.
pub fn command_start_error(cmd_name: impl Into<String>, err: io::Error) -> CoreError {
    CoreError::CommandStart(cmd_name.into(), err)
}

impl CoreError {
    /// Returns the captured transcoder diagnostics, if this error carries any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            CoreError::TranscodeFailed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcode_failed_display() {
        let err = CoreError::TranscodeFailed {
            exit_code: Some(1),
            diagnostics: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Transcoder exited with exit code 1");
        assert_eq!(err.diagnostics(), Some("boom"));

        let err = CoreError::TranscodeFailed {
            exit_code: None,
            diagnostics: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_decryption_failure_display() {
        let err = CoreError::DecryptionFailure {
            segment_id: "00001.m2ts".to_string(),
            unit: 20,
            message: "title key rejected".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Decryption of unit 20 in segment '00001.m2ts' failed: title key rejected"
        );
    }
}
