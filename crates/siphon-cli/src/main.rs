//! Siphon CLI - the `siphon` binary entry point.

use anyhow::Result;
use clap::Parser;

use siphon_cli::{Cli, Commands};
use siphon_core::observability::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format.into());
    let config = cli.config();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Run(args) => siphon_cli::commands::run::execute(args, &config).await,
            Commands::Reconcile(args) => {
                siphon_cli::commands::reconcile::execute(args, &config).await
            }
            Commands::Plan(args) => siphon_cli::commands::plan::execute(args, &config).await,
            Commands::Status(args) => siphon_cli::commands::status::execute(args, &config).await,
        }
    })
}
