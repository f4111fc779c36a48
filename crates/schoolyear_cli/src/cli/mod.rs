//! Command-line surface.
//!
//! # Responsibility
//! - Define flags, environment fallbacks and subcommands.
//! - Dispatch each subcommand to its implementation in `commands`.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use schoolyear_core::{default_log_level, init_logging, LoggingConfig};
use std::path::PathBuf;

pub use error::CliError;

/// School year closure tool.
///
/// Archives a finished academic year, promotes students through the grade
/// ladder and resets attendance and workshops for the next year.
#[derive(Parser, Debug)]
#[command(name = "schoolyear")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the SQLite database
    #[arg(
        long,
        global = true,
        env = "SCHOOLYEAR_DB_PATH",
        default_value = "schoolyear.sqlite3"
    )]
    pub db: PathBuf,

    /// Directory for rotating log files; logging stays off when unset
    #[arg(long, global = true, env = "SCHOOLYEAR_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SCHOOLYEAR_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Create the database or migrate it to the latest schema
    Init,

    /// Load students, workshops and attendance sessions from a JSON snapshot
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show closure statistics and the phrase that confirms closure
    Preview {
        #[arg(short, long)]
        year: String,
    },

    /// Close an academic year
    Close {
        #[arg(short, long)]
        year: String,

        /// Confirmation phrase, exactly as shown by `preview`
        #[arg(short, long)]
        confirm: String,

        /// Name recorded in the closure ledger
        #[arg(short, long)]
        operator: String,

        /// Ledger description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show whether a year is open, in progress or closed
    Status {
        #[arg(short, long)]
        year: String,
    },

    /// List closure ledger entries
    Ledger,

    /// Show archived row counts for a year
    Archive {
        #[arg(short, long)]
        year: String,
    },

    /// Restore a closed year from its archive (not supported)
    Restore {
        #[arg(short, long)]
        year: String,

        #[arg(short, long)]
        confirm: String,
    },

    /// Remove a closure lock left behind by an interrupted run
    Unlock {
        #[arg(short, long)]
        year: String,
    },
}

/// Starts file logging when `--log-dir` or `SCHOOLYEAR_LOG_DIR` is set.
pub fn init_cli_logging(cli: &Cli) -> Result<(), CliError> {
    let Some(log_dir) = cli.log_dir.as_ref() else {
        return Ok(());
    };
    let log_dir = if log_dir.is_absolute() {
        log_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|source| CliError::Io {
                path: log_dir.clone(),
                source,
            })?
            .join(log_dir)
    };
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());

    let mut config = LoggingConfig::new(level, log_dir);
    config.echo_warnings = !cli.json;
    init_logging(&config).map_err(CliError::Logging)
}

pub fn execute(cli: Cli) -> Result<(), CliError> {
    let db = cli.db.as_path();
    let json = cli.json;

    match cli.command {
        Commands::Init => commands::cmd_init(db, json),
        Commands::Import { file } => commands::cmd_import(db, json, &file),
        Commands::Preview { year } => commands::cmd_preview(db, json, &year),
        Commands::Close {
            year,
            confirm,
            operator,
            description,
        } => commands::cmd_close(db, json, year, confirm, operator, description),
        Commands::Status { year } => commands::cmd_status(db, json, &year),
        Commands::Ledger => commands::cmd_ledger(db, json),
        Commands::Archive { year } => commands::cmd_archive(db, json, &year),
        Commands::Restore { year, confirm } => commands::cmd_restore(db, &year, &confirm),
        Commands::Unlock { year } => commands::cmd_unlock(db, json, &year),
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands};
    use clap::Parser;

    #[test]
    fn close_takes_the_phrase_verbatim() {
        let cli = Cli::try_parse_from([
            "schoolyear",
            "--db",
            "/tmp/school.sqlite3",
            "close",
            "--year",
            "2024",
            "--confirm",
            "CERRAR AÑO 2024",
            "--operator",
            "direccion",
        ])
        .expect("close should parse");

        assert_eq!(
            cli.command,
            Commands::Close {
                year: "2024".to_string(),
                confirm: "CERRAR AÑO 2024".to_string(),
                operator: "direccion".to_string(),
                description: None,
            }
        );
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["schoolyear", "ledger", "--json", "--db", "x.sqlite3"])
            .expect("ledger should parse");
        assert!(cli.json);
        assert_eq!(cli.db.to_str(), Some("x.sqlite3"));
        assert_eq!(cli.command, Commands::Ledger);
    }

    #[test]
    fn close_requires_an_operator() {
        let result = Cli::try_parse_from([
            "schoolyear",
            "close",
            "--year",
            "2024",
            "--confirm",
            "CERRAR AÑO 2024",
        ]);
        assert!(result.is_err());
    }
}
