// discmux-cli/src/lib.rs
//
// Library portion of the discmux CLI application.
// Contains argument definitions, job plans and command logic.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod plan;

// Re-export items needed by the binary or integration tests
pub use cli::{Cli, Commands, ExportArgs, JobArgs, ProbeArgs};
pub use commands::export::run_export;
pub use commands::probe::run_probe;
pub use plan::JobPlan;
