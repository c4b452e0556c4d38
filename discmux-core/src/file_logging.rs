//! File logging for unattended runs, backed by log4rs.

use anyhow::Result;
use log::LevelFilter;
use log4rs::{
    append::file::FileAppender,
    config::{Appender, Config, Logger, Root},
    encode::pattern::PatternEncoder,
};
use std::path::Path;

/// Routes all log output to `log_file`.
///
/// Relayed transcoder lines (target `transcoder`) are capped at debug
/// verbosity even when `log_level` is trace.
pub fn setup_file_logging(log_file: &Path, log_level: LevelFilter) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}",
        )))
        .build(log_file)?;

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .logger(
            Logger::builder()
                .appender("file")
                .additive(false)
                .build("transcoder", log_level.min(LevelFilter::Debug)),
        )
        .build(Root::builder().appender("file").build(log_level))?;

    log4rs::init_config(config)?;
    Ok(())
}
