// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `punchclock`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "punchclock",
    version,
    about = "Automate scheduled check-in/check-out against a network-gated portal.",
    long_about = None
)]
pub struct CliArgs {
    /// Directory holding tasks, settings and cookies.
    ///
    /// Default: the platform data directory plus `punchclock`.
    #[arg(long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Settings file (TOML). Defaults to `settings.toml` in the data dir.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PUNCHCLOCK_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted.
    Run {
        /// Run a single pass and exit.
        #[arg(long)]
        once: bool,
    },
    /// Add a task.
    Add(AddArgs),
    /// List tasks.
    List {
        /// Only tasks on this day (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,
    },
    /// Clear progress, restriction and abnormal state of a task.
    Reset { id: String },
    /// Mark a task as fully done.
    Complete { id: String },
    /// Delete a task.
    Remove { id: String },
    /// Clear the network restriction on every task.
    ClearRestrictions,
    /// Run a full network check, including the route trace.
    Network,
    /// Try logging in with the configured credentials.
    Login,
}

#[derive(Debug, Clone, Args)]
pub struct AddArgs {
    #[arg(long)]
    pub name: String,
    /// Day of the task (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub date: Option<String>,
    /// Check-in time (HH:MM).
    #[arg(long = "check-in")]
    pub check_in: String,
    /// Check-out time (HH:MM).
    #[arg(long = "check-out")]
    pub check_out: String,
    /// Do not raise notifications for this task.
    #[arg(long)]
    pub no_notify: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
