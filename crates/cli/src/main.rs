// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mangle` — interactive distortion client.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mangle_core::ClientConfig;

#[derive(Parser)]
#[command(name = "mangle", about = "Distortion cluster client")]
struct Args {
    /// Path to the client configuration file
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the console usable: tracing goes to stderr and stays quiet
    // unless asked for.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = ClientConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    mangle::shell::run(cfg).await?;
    Ok(())
}
