//! # siphon-cli
//!
//! Command-line interface for the Siphon ingestion pipeline.
//!
//! ## Commands
//!
//! - `siphon run` - Run a scheduled sync for the configured properties
//! - `siphon reconcile` - Re-sync a trailing window to pick up corrections
//! - `siphon plan` - Show what a run would sync, without doing anything
//! - `siphon status` - Show per-property watermarks
//!
//! ## Configuration
//!
//! The pipeline is configured through a TOML file (see
//! [`config::PipelineConfig`]); the path comes from `--config` or the
//! `SIPHON_CONFIG` environment variable.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;
pub mod config;

use clap::{Parser, Subcommand};

use siphon_core::observability::LogFormat;

/// Siphon CLI - quota-governed ingestion pipeline.
#[derive(Debug, Parser)]
#[command(name = "siphon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the pipeline configuration file.
    #[arg(long, env = "SIPHON_CONFIG", default_value = "siphon.toml")]
    pub config: std::path::PathBuf,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Log format.
    #[arg(long, default_value = "pretty")]
    pub log_format: LogFormatArg,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            config_path: self.config.clone(),
            format: self.format.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a scheduled sync for the configured properties.
    Run(commands::run::RunArgs),
    /// Re-sync a trailing window to pick up late or corrected data.
    Reconcile(commands::reconcile::ReconcileArgs),
    /// Show what a run would sync, without touching quota or stores.
    Plan(commands::plan::PlanArgs),
    /// Show per-property watermarks.
    Status(commands::status::StatusArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// Log format flag.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
    /// JSON structured logs (for production).
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// Effective CLI configuration, detached from the parsed arguments.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Path to the pipeline configuration file.
    pub config_path: std::path::PathBuf,
    /// Output format.
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "siphon",
            "--config",
            "/etc/siphon.toml",
            "--format",
            "json",
            "status",
        ]);
        let config = cli.config();
        assert_eq!(
            config.config_path,
            std::path::PathBuf::from("/etc/siphon.toml")
        );
        assert!(matches!(config.format, OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Status(_)));
    }
}
