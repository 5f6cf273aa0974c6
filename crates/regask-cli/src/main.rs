//! # regask CLI
//!
//! Command-line interface for the registry question pipeline.
//!
//! This binary provides human-friendly access to `regask-core` functionality.
//! Run `regask --help` for usage information.

mod cli;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
