//! CLI command implementations.

pub mod plan;
pub mod reconcile;
pub mod run;
pub mod status;

use std::sync::Arc;

use anyhow::{Context, Result};

use siphon_ingest::admission::memory::InMemoryAdmissionController;
use siphon_ingest::facts::fs::JsonlFactStore;
use siphon_ingest::orchestrator::{Orchestrator, RunSummary};
use siphon_ingest::source::replay::ReplaySource;
use siphon_ingest::watermark::fs::JsonFileWatermarkStore;

use crate::OutputFormat;
use crate::config::PipelineConfig;

/// Wires the file-backed stores and replay source into an orchestrator.
pub(crate) fn build_orchestrator(config: &PipelineConfig) -> Result<Orchestrator> {
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    let watermarks = Arc::new(JsonFileWatermarkStore::open(
        config.data_dir.join("watermarks.json"),
    )?);
    let facts = Arc::new(JsonlFactStore::open(config.data_dir.join("facts.jsonl"))?);
    let admission = Arc::new(InMemoryAdmissionController::with_default_config(
        config.admission.to_admission_config(),
    ));
    let source = Arc::new(ReplaySource::new(&config.export_dir));

    Ok(Orchestrator::builder()
        .admission(admission)
        .watermarks(watermarks)
        .facts(facts)
        .source(source)
        .config(config.orchestrator.to_orchestrator_config())
        .build()?)
}

/// Opens the watermark store alone, for read-only commands.
pub(crate) fn open_watermarks(config: &PipelineConfig) -> Result<JsonFileWatermarkStore> {
    Ok(JsonFileWatermarkStore::open(
        config.data_dir.join("watermarks.json"),
    )?)
}

/// Prints a run summary in the requested format.
pub(crate) fn print_summary(summary: &RunSummary, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(summary).context("failed to serialize summary")?
            );
        }
        OutputFormat::Text => {
            println!("Run {} finished", summary.run_id);
            println!();
            println!("  Rows upserted:    {}", summary.rows_upserted);
            println!("  Succeeded:        {}", summary.succeeded.len());
            if !summary.quota_exhausted.is_empty() {
                println!("  Quota exhausted:  {}", summary.quota_exhausted.len());
                for unit in &summary.quota_exhausted {
                    println!("    {} / {}", unit.property, unit.source);
                }
            }
            if !summary.failed.is_empty() {
                println!("  Failed:           {}", summary.failed.len());
                for failure in &summary.failed {
                    println!(
                        "    {} / {}: {}",
                        failure.property, failure.source, failure.reason
                    );
                }
            }
            if !summary.lease_skipped.is_empty() {
                println!("  Lease skipped:    {}", summary.lease_skipped.len());
            }
            if !summary.deadline_stopped.is_empty() {
                println!("  Deadline stopped: {}", summary.deadline_stopped.len());
            }
        }
    }
    Ok(())
}
