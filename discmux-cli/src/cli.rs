// discmux-cli/src/cli.rs
//
// Defines the command-line argument structures using clap.

use clap::{Args, Parser, Subcommand};
use discmux_core::EndpointKind;
use std::path::PathBuf;

// --- CLI Argument Definition ---

#[derive(Parser, Debug)]
#[command(
    author,
    version, // Reads from Cargo.toml via "cargo" feature in clap
    about = "discmux: disc segment extraction and re-multiplexing",
    long_about = "Streams decrypted disc segments into ffmpeg through virtual inputs, \
                  without writing plaintext to disk, and produces the requested output files."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to this file instead of the console. A directory gets a
    /// timestamped log file inside it.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reports the streams, chapters and duration ffmpeg sees in a plan's segments
    Probe(ProbeArgs),
    /// Converts a plan's segments into its output files
    Export(ExportArgs),
}

/// Options shared by every command that runs the transcoder.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// JSON job plan describing segments, streams, chapters and outputs
    #[arg(required = true, value_name = "PLAN")]
    pub plan: PathBuf,

    /// How virtual inputs are exposed to ffmpeg: "fifo" (unix) or "tcp"
    #[arg(long, value_name = "KIND", value_parser = parse_endpoint)]
    pub endpoint: Option<EndpointKind>,

    /// Suffix of output files while they are being written
    #[arg(long, value_name = "SUFFIX")]
    pub suffix: Option<String>,

    /// ffmpeg binary to run
    #[arg(long, value_name = "PATH", env = "DISCMUX_TRANSCODER")]
    pub transcoder: Option<PathBuf>,

    /// Directory in which the private pipe directory is created
    #[arg(long, value_name = "DIR")]
    pub pipe_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Print the metadata as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Replace output files that already exist
    #[arg(long)]
    pub overwrite: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Print the conversion report as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_endpoint(value: &str) -> Result<EndpointKind, String> {
    value.parse().map_err(|e: discmux_core::CoreError| e.to_string())
}
