//! ReportHarvest CLI: bounded-concurrency report downloader.
//!
//! Fetches one rendered report per identifier, converts each to CSV, and
//! packs every result into a single ZIP archive.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
