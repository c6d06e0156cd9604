//! Run command - scheduled sync for the configured properties.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::Args;

use siphon_core::DateRange;
use siphon_ingest::orchestrator::RunOptions;

use crate::Config;
use crate::config::PipelineConfig;

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Only sync these properties (default: all configured).
    #[arg(long = "property", short = 'p')]
    pub properties: Vec<String>,

    /// Backfill start date (YYYY-MM-DD); overrides watermark planning.
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Backfill end date (YYYY-MM-DD).
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Stop starting new days after this many minutes.
    #[arg(long)]
    pub deadline_minutes: Option<u32>,
}

/// Execute the run command.
///
/// # Errors
///
/// Returns an error if the config is invalid or the pipeline cannot be
/// wired. Per-unit failures are reported in the summary and via a
/// non-zero exit, not as early errors.
pub async fn execute(args: RunArgs, config: &Config) -> Result<()> {
    let pipeline = PipelineConfig::load(&config.config_path)?;
    let orchestrator = super::build_orchestrator(&pipeline)?;

    let mut options = RunOptions::scheduled(select_properties(&pipeline, &args.properties)?);
    if let (Some(from), Some(to)) = (args.from, args.to) {
        let range = DateRange::new(from, to).context("invalid --from/--to range")?;
        options = options.with_override_range(range);
    }
    if let Some(minutes) = args.deadline_minutes {
        options = options.with_deadline(Utc::now() + Duration::minutes(i64::from(minutes)));
    }

    let summary = orchestrator.run(options).await?;
    super::print_summary(&summary, &config.format)?;

    if !summary.failed.is_empty() {
        anyhow::bail!("{} unit(s) failed", summary.failed.len());
    }
    Ok(())
}

/// Filters the configured properties down to the requested ones.
pub(crate) fn select_properties(
    config: &PipelineConfig,
    requested: &[String],
) -> Result<Vec<siphon_ingest::orchestrator::PropertyConfig>> {
    let all = config.property_configs()?;
    if requested.is_empty() {
        anyhow::ensure!(!all.is_empty(), "no properties configured");
        return Ok(all);
    }
    let selected: Vec<_> = all
        .into_iter()
        .filter(|p| requested.iter().any(|r| r == p.property.as_str()))
        .collect();
    anyhow::ensure!(
        !selected.is_empty(),
        "none of the requested properties are configured"
    );
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn run_args_parse_override_range() {
        let cli = TestCli::parse_from([
            "test",
            "--from",
            "2024-05-01",
            "--to",
            "2024-05-07",
            "--property",
            "https://example.com/",
        ]);
        assert_eq!(
            cli.args.from,
            Some(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
        assert_eq!(cli.args.properties, vec!["https://example.com/"]);
    }

    #[test]
    fn from_requires_to() {
        let result = TestCli::try_parse_from(["test", "--from", "2024-05-01"]);
        assert!(result.is_err());
    }
}
