//! `netkit` command-line client

mod cli;
mod commands;
mod errors;
mod tracing;

use crate::cli::Cli;
use crate::tracing::{TracingConfig, init_tracing};
use clap::Parser;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.log_level.into(),
        ..Default::default()
    })?;

    commands::run(cli.command).await?;
    Ok(())
}
