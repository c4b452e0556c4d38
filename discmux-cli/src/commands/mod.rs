//! Command implementations for the CLI.
//!
//! Each submodule contains the implementation of a specific command.

/// Module containing the implementation of the `export` command.
/// This command streams a plan's segments through ffmpeg into its output files.
pub mod export;

/// Module containing the implementation of the `probe` command.
pub mod probe;

use crate::cli::JobArgs;
use anyhow::{Context, Result};
use discmux_core::{JobConfig, JobConfigBuilder, check_dependency};

/// Builds the job configuration from CLI overrides and checks that the
/// transcoder can be started.
pub fn prepare_config(args: &JobArgs, overwrite: bool) -> Result<JobConfig> {
    let mut builder = JobConfigBuilder::new().overwrite(overwrite);
    if let Some(kind) = args.endpoint {
        builder = builder.endpoint_kind(kind);
    }
    if let Some(suffix) = &args.suffix {
        builder = builder.working_suffix(suffix.clone());
    }
    if let Some(transcoder) = &args.transcoder {
        builder = builder.transcoder_path(transcoder.clone());
    }
    if let Some(dir) = &args.pipe_dir {
        builder = builder.pipe_dir(dir.clone());
    }
    let config = builder.build()?;

    check_dependency(&config.transcoder_path)
        .with_context(|| format!("Cannot run '{}'", config.transcoder_path.display()))?;
    log::debug!("Using transcoder {}", config.transcoder_path.display());
    Ok(config)
}
