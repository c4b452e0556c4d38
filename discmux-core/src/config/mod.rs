//! Configuration structures and constants for discmux conversion jobs.
//!
//! This module provides the knobs that govern how virtual inputs are exposed
//! to the transcoder, how long the orchestrator waits at each barrier, and how
//! output files are named while a job is in flight.

mod builder;

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use builder::JobConfigBuilder;

// Default constants

/// Suffix appended to every output file while the transcoder is writing it.
pub const DEFAULT_WORKING_SUFFIX: &str = ".part";

/// Size of the copy buffer each bridge uses between its source and endpoint.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024;

/// How long to wait for every bridge to report "listening".
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// How long disposal waits for a bridge task to exit.
pub const DEFAULT_DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval at which the orchestrator checks process exit and cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a virtual input is addressed by the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// POSIX named pipe inside a private directory.
    Fifo,
    /// Loopback TCP listener, addressed as `tcp://127.0.0.1:<port>`.
    Tcp,
}

impl EndpointKind {
    /// Preferred endpoint kind for the current platform.
    pub fn platform_default() -> Self {
        if cfg!(unix) {
            EndpointKind::Fifo
        } else {
            EndpointKind::Tcp
        }
    }
}

impl std::str::FromStr for EndpointKind {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" | "pipe" => Ok(EndpointKind::Fifo),
            "tcp" | "socket" => Ok(EndpointKind::Tcp),
            other => Err(CoreError::Config(format!("unknown endpoint kind '{other}'"))),
        }
    }
}

/// Configuration of a conversion job.
///
/// All fields have sensible defaults; [`JobConfigBuilder`] provides a fluent
/// way to override them.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Transcoder binary. Defaults to ffmpeg-sidecar's resolved ffmpeg path.
    pub transcoder_path: PathBuf,

    /// Suffix for working file names, removed on successful finalization.
    pub working_suffix: String,

    /// How virtual inputs are exposed.
    pub endpoint_kind: EndpointKind,

    /// Directory for pipe endpoints. `None` creates a private temp directory.
    pub pipe_dir: Option<PathBuf>,

    /// Per-bridge copy buffer size in bytes.
    pub copy_buffer_size: usize,

    pub readiness_timeout: Duration,

    pub dispose_timeout: Duration,

    pub poll_interval: Duration,

    /// Replace existing files at the final output paths.
    pub overwrite: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            transcoder_path: ffmpeg_sidecar::paths::ffmpeg_path(),
            working_suffix: DEFAULT_WORKING_SUFFIX.to_string(),
            endpoint_kind: EndpointKind::platform_default(),
            pipe_dir: None,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            dispose_timeout: DEFAULT_DISPOSE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            overwrite: false,
        }
    }
}

impl JobConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> CoreResult<()> {
        if self.working_suffix.is_empty() {
            return Err(CoreError::Config(
                "working suffix must not be empty".to_string(),
            ));
        }
        if self.working_suffix.contains(std::path::MAIN_SEPARATOR) {
            return Err(CoreError::Config(format!(
                "working suffix '{}' must not contain a path separator",
                self.working_suffix
            )));
        }
        if self.copy_buffer_size == 0 {
            return Err(CoreError::Config(
                "copy buffer size must be greater than zero".to_string(),
            ));
        }
        if self.readiness_timeout.is_zero()
            || self.dispose_timeout.is_zero()
            || self.poll_interval.is_zero()
        {
            return Err(CoreError::Config("timeouts must be non-zero".to_string()));
        }
        if !cfg!(unix) && self.endpoint_kind == EndpointKind::Fifo {
            return Err(CoreError::Config(
                "fifo endpoints are only available on unix".to_string(),
            ));
        }
        Ok(())
    }
}
