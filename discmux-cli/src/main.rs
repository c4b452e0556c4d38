// discmux-cli/src/main.rs
//
// Entry point of the discmux command-line tool.
//
// Responsibilities:
// - Parsing command-line arguments with clap.
// - Installing console or file logging.
// - Dispatching to the probe / export command implementations.
// - Mapping errors to a non-zero exit code.

use clap::Parser;
use discmux_cli::{Cli, Commands, logging, run_export, run_probe};
use std::process;

fn main() {
    let cli = Cli::parse();

    let log_path = match logging::init(cli.verbose, cli.log_file.as_deref()) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: failed to set up logging: {e:#}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Probe(args) => run_probe(args),
        Commands::Export(args) => run_export(args),
    };

    if let Err(e) = result {
        if log_path.is_some() {
            log::error!("{e:#}");
        }
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
