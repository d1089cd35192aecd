// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mangle-worker` — a typed distortion worker node.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mangle_core::WorkerConfig;

#[derive(Parser)]
#[command(name = "mangle-worker", about = "Distortion worker node")]
struct Args {
    /// Path to the worker configuration file
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = WorkerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, shutting down");
            signal_token.cancel();
        }
    });

    mangle_worker::run(cfg, shutdown).await?;
    Ok(())
}
