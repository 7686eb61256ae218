// src/bin/cask-reinstall.rs

use anyhow::Result;
use caskgrant::cli::ReinstallArgs;
use caskgrant::commands::cmd_reinstall;
use clap::Parser;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = ReinstallArgs::parse();
    cmd_reinstall(&args)
}
