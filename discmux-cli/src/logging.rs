// ============================================================================
// discmux-cli/src/logging.rs
// ============================================================================
//
// LOGGING SETUP: Console or File Logging for the CLI
//
// Only one global logger can be installed. Without `--log-file` the CLI uses
// env_logger on stderr; with it, all output goes to a log4rs file appender
// configured by discmux-core.
//
// USAGE:
// The console logger respects the RUST_LOG environment variable:
// - RUST_LOG=info (default): Normal operation logs
// - RUST_LOG=debug: Detailed debugging information, including every
//   line ffmpeg prints (target "transcoder")
// - RUST_LOG=trace: Very verbose debugging information

use anyhow::Result;
use log::LevelFilter;
use std::path::{Path, PathBuf};

/// Returns the current local timestamp formatted as "YYYYMMDD_HHMMSS".
///
/// # Example
/// ```
/// let log_filename = format!("discmux_{}.log", discmux_cli::logging::get_timestamp());
/// assert!(log_filename.starts_with("discmux_"));
/// ```
pub fn get_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Resolves `--log-file`: a directory gets a timestamped file inside it.
pub fn resolve_log_path(requested: &Path) -> PathBuf {
    if requested.is_dir() {
        requested.join(format!("discmux_{}.log", get_timestamp()))
    } else {
        requested.to_path_buf()
    }
}

/// Installs the global logger.
///
/// Returns the log file in use, if any.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<Option<PathBuf>> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    match log_file {
        Some(requested) => {
            let path = resolve_log_path(requested);
            discmux_core::file_logging::setup_file_logging(&path, level)?;
            log::info!("discmux {} logging to {}", env!("CARGO_PKG_VERSION"), path.display());
            Ok(Some(path))
        }
        None => {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(level.as_str().to_ascii_lowercase()),
            )
            .format_timestamp(None)
            .format_target(false)
            .try_init()?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_shape() {
        let ts = get_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "_");
        assert!(ts.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_directory_gets_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_log_path(dir.path());
        assert_eq!(path.parent(), Some(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("discmux_") && name.ends_with(".log"));

        let explicit = dir.path().join("run.log");
        assert_eq!(resolve_log_path(&explicit), explicit);
    }
}
