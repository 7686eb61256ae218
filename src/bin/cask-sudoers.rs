// src/bin/cask-sudoers.rs

use anyhow::Result;
use caskgrant::cli::SudoersArgs;
use caskgrant::commands::cmd_generate;
use clap::Parser;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = SudoersArgs::parse();
    cmd_generate(&args)?;
    Ok(())
}
