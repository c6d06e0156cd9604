//! Reconcile command - re-sync a trailing window.
//!
//! Late-arriving corrections from the remote side are picked up by
//! re-fetching recent days; the upsert semantics of the fact store make
//! this safe to run at any time.

use anyhow::Result;
use clap::Args;

use siphon_ingest::orchestrator::RunOptions;

use crate::Config;
use crate::config::PipelineConfig;

/// Arguments for the reconcile command.
#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Only sync these properties (default: all configured).
    #[arg(long = "property", short = 'p')]
    pub properties: Vec<String>,

    /// Override the configured trailing window, in days.
    #[arg(long)]
    pub window_days: Option<u32>,
}

/// Execute the reconcile command.
///
/// # Errors
///
/// Returns an error if the config is invalid, the pipeline cannot be
/// wired, or any unit fails.
pub async fn execute(args: ReconcileArgs, config: &Config) -> Result<()> {
    let mut pipeline = PipelineConfig::load(&config.config_path)?;
    if let Some(days) = args.window_days {
        pipeline.orchestrator.reconcile_window_days = days;
    }
    let orchestrator = super::build_orchestrator(&pipeline)?;

    let properties = super::run::select_properties(&pipeline, &args.properties)?;
    let summary = orchestrator.run(RunOptions::reconcile(properties)).await?;
    super::print_summary(&summary, &config.format)?;

    if !summary.failed.is_empty() {
        anyhow::bail!("{} unit(s) failed", summary.failed.len());
    }
    Ok(())
}
