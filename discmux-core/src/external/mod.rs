// ============================================================================
// discmux-core/src/external/mod.rs
// ============================================================================
//
// EXTERNAL TOOLS: The Transcoder Process Boundary
//
// This module encapsulates everything that touches the external transcoder
// binary: checking that it exists, spawning it with a prepared argument list,
// and observing its lifetime. The orchestrator only sees the traits defined
// here, so tests can substitute a scripted fake process.
//
// KEY COMPONENTS:
// - TranscoderInvocation: program + arguments + the inputs/outputs they name
// - TranscoderProcess / TranscoderSpawner: process abstraction
// - SidecarSpawner: implementation on top of ffmpeg-sidecar
// - check_dependency: "-version" probe of the transcoder binary

use crate::error::{CoreError, CoreResult};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

// ============================================================================
// SUBMODULES
// ============================================================================

/// ffmpeg-sidecar backed process spawner.
pub mod ffmpeg;

/// Scripted fake transcoder for tests.
#[cfg(feature = "test-mocks")]
pub mod mocks;

pub use ffmpeg::{SidecarProcess, SidecarSpawner};

// ============================================================================
// PROCESS ABSTRACTION
// ============================================================================

/// A fully prepared transcoder command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderInvocation {
    pub program: PathBuf,
    /// Arguments in order, not including the program itself.
    pub args: Vec<String>,
    /// Addresses passed with `-i`, in order.
    pub inputs: Vec<String>,
    /// Output paths (working names), in order.
    pub outputs: Vec<PathBuf>,
}

impl TranscoderInvocation {
    /// The command line as a single loggable string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().map(|a| {
                if a.contains(' ') {
                    format!("\"{a}\"")
                } else {
                    a.clone()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a transcoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A running transcoder process.
pub trait TranscoderProcess: Send {
    /// Takes the diagnostic (stderr) stream. Returns `None` after the first call.
    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Returns the exit status if the process has ended, without blocking.
    fn try_wait(&mut self) -> CoreResult<Option<ProcessExit>>;

    /// Blocks until the process ends.
    fn wait(&mut self) -> CoreResult<ProcessExit>;

    /// Asks the process to terminate.
    fn kill(&mut self) -> CoreResult<()>;
}

/// Something that can start a transcoder process.
pub trait TranscoderSpawner {
    type Process: TranscoderProcess;

    fn spawn(&self, invocation: &TranscoderInvocation) -> CoreResult<Self::Process>;
}

// ============================================================================
// DEPENDENCY CHECKING
// ============================================================================

/// Checks that the transcoder binary exists and starts.
///
/// Runs `<program> -version` and discards its output.
///
/// # Returns
///
/// * `Ok(())` - if the command could be started
/// * `Err(CoreError::DependencyNotFound)` - if the binary does not exist
/// * `Err(CoreError::CommandStart)` - if it exists but could not be started
pub fn check_dependency(program: &Path) -> CoreResult<()> {
    let result = Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match result {
        Ok(status) => {
            log::debug!("Found dependency {} ({status})", program.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("Dependency '{}' not found.", program.display());
            Err(CoreError::DependencyNotFound(program.display().to_string()))
        }
        Err(e) => {
            log::error!(
                "Failed to start dependency check command '{}': {}",
                program.display(),
                e
            );
            Err(CoreError::CommandStart(program.display().to_string(), e))
        }
    }
}
