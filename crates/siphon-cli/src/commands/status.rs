//! Status command - show per-property watermarks.

use anyhow::{Context, Result};
use clap::Args;

use siphon_ingest::watermark::WatermarkStore;

use crate::config::PipelineConfig;
use crate::{Config, OutputFormat};

/// Arguments for the status command.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Only show these properties (default: all stored).
    #[arg(long = "property", short = 'p')]
    pub properties: Vec<String>,
}

/// Execute the status command.
///
/// # Errors
///
/// Returns an error if the watermark store cannot be opened.
pub async fn execute(args: StatusArgs, config: &Config) -> Result<()> {
    let pipeline = PipelineConfig::load(&config.config_path)?;
    let watermarks = super::open_watermarks(&pipeline)?;

    let mut rows = watermarks.list().await?;
    if !args.properties.is_empty() {
        rows.retain(|wm| args.properties.iter().any(|p| p == wm.property.as_str()));
    }

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize watermarks")?
            );
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No watermarks stored");
                return Ok(());
            }
            for wm in &rows {
                let last_date = wm
                    .last_date
                    .map_or_else(|| "never".to_string(), |d| d.to_string());
                let mut line = format!(
                    "{} / {}: {} (status: {})",
                    wm.property, wm.source, last_date, wm.last_run_status
                );
                if let Some(reason) = &wm.failure_reason {
                    line.push_str(&format!(" - {reason}"));
                }
                println!("{line}");
            }
        }
    }
    Ok(())
}
