// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mangled` — the cluster coordinator daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mangle_coordinator::{Coordinator, Ctx, LogSink};
use mangle_core::CoordinatorConfig;

#[derive(Parser)]
#[command(name = "mangled", about = "Distortion cluster coordinator")]
struct Args {
    /// Path to the coordinator configuration file
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = CoordinatorConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let ctx = Arc::new(Ctx::new(LogSink::spawn()));
    let coordinator = Coordinator::bind(&cfg, Arc::clone(&ctx)).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, shutting down");
            signal_token.cancel();
        }
    });

    coordinator.run(shutdown).await;
    ctx.log.shutdown().await;
    Ok(())
}
