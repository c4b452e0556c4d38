// ============================================================================
// discmux-core/src/config/builder.rs
// ============================================================================
//
// CONFIGURATION BUILDER: Builder Pattern for JobConfig
//
// Provides a fluent API for creating JobConfig instances. Unset fields keep
// the defaults from `JobConfig::default()`; `build` validates the result.

use super::{EndpointKind, JobConfig};
use crate::error::CoreResult;
use std::path::PathBuf;
use std::time::Duration;

/// Builder for creating [`JobConfig`] instances.
///
/// # Examples
///
/// ```rust
/// use discmux_core::config::{EndpointKind, JobConfigBuilder};
///
/// let config = JobConfigBuilder::new()
///     .transcoder_path("/usr/local/bin/ffmpeg")
///     .working_suffix(".tmp")
///     .endpoint_kind(EndpointKind::Tcp)
///     .build()
///     .unwrap();
/// assert_eq!(config.working_suffix, ".tmp");
/// ```
#[derive(Debug, Clone, Default)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcoder_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.transcoder_path = path.into();
        self
    }

    pub fn working_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.working_suffix = suffix.into();
        self
    }

    pub fn endpoint_kind(mut self, kind: EndpointKind) -> Self {
        self.config.endpoint_kind = kind;
        self
    }

    pub fn pipe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pipe_dir = Some(dir.into());
        self
    }

    pub fn copy_buffer_size(mut self, bytes: usize) -> Self {
        self.config.copy_buffer_size = bytes;
        self
    }

    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.config.readiness_timeout = timeout;
        self
    }

    pub fn dispose_timeout(mut self, timeout: Duration) -> Self {
        self.config.dispose_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.overwrite = overwrite;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> CoreResult<JobConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
