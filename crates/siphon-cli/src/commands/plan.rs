//! Plan command - dry-run the planner without touching anything.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;

use siphon_core::DateRange;
use siphon_ingest::orchestrator::RunOptions;

use crate::config::PipelineConfig;
use crate::{Config, OutputFormat};

/// Arguments for the plan command.
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Only plan these properties (default: all configured).
    #[arg(long = "property", short = 'p')]
    pub properties: Vec<String>,

    /// Plan as if this backfill range was requested (YYYY-MM-DD).
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Backfill end date (YYYY-MM-DD).
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Plan a reconcile run instead of a scheduled one.
    #[arg(long)]
    pub reconcile: bool,
}

/// Execute the plan command.
///
/// # Errors
///
/// Returns an error if the config is invalid or the pipeline cannot be
/// wired.
pub async fn execute(args: PlanArgs, config: &Config) -> Result<()> {
    let pipeline = PipelineConfig::load(&config.config_path)?;
    let orchestrator = super::build_orchestrator(&pipeline)?;

    let properties = super::run::select_properties(&pipeline, &args.properties)?;
    let mut options = if args.reconcile {
        RunOptions::reconcile(properties)
    } else {
        RunOptions::scheduled(properties)
    };
    if let (Some(from), Some(to)) = (args.from, args.to) {
        let range = DateRange::new(from, to).context("invalid --from/--to range")?;
        options = options.with_override_range(range);
    }

    let summary = orchestrator.run(options.dry_run()).await?;

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary.planned)
                    .context("failed to serialize plans")?
            );
        }
        OutputFormat::Text => {
            if summary.planned.is_empty() {
                println!("Nothing to plan");
                return Ok(());
            }
            for plan in &summary.planned {
                match plan.range {
                    Some(range) => {
                        let resume = if plan.resume { " (resume)" } else { "" };
                        println!(
                            "{} / {}: {} ({} days){resume}",
                            plan.property,
                            plan.source,
                            range,
                            range.len_days()
                        );
                    }
                    None => {
                        println!("{} / {}: up to date", plan.property, plan.source);
                    }
                }
            }
        }
    }
    Ok(())
}
