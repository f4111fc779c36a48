//! `schoolyear` operator binary.
//!
//! # Responsibility
//! - Parse flags and environment into a command.
//! - Start file logging when a log directory is configured.
//! - Map command failures to a message on stderr and a non-zero exit code.

mod cli;

use clap::Parser;
use log::error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    if let Err(err) = cli::init_cli_logging(&cli) {
        eprintln!("warning: file logging disabled: {err}");
    }

    match cli::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(
                "event=cli_command module=cli status=error exit_code={} error={}",
                err.exit_code(),
                err
            );
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
