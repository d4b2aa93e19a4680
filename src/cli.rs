// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `starter`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "starter",
    version,
    about = "Run a graph of startup tasks across a main thread and worker pools.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Starter.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Starter.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STARTER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the dispatch order, but don't run any task.
    #[arg(long)]
    pub dry_run: bool,

    /// Override `[scheduler].await_timeout_ms`.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Behave like a secondary process: `main_process_only` tasks are skipped.
    #[arg(long)]
    pub secondary_process: bool,
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
