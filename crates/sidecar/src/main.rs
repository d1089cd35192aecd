// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mangle-sidecar` — append-only consumer of framed log records.
//!
//! Reads 256-byte Log frames from stdin until EOF, stamps each with the
//! frame's own timestamp in human-readable local time, and appends
//! `[ts] message` lines to the log file. Frames that fail to decode are
//! skipped; the pipe stays aligned because every record is exactly one
//! frame.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{Local, TimeZone};
use clap::Parser;
use tokio::io::AsyncReadExt;

use mangle_wire::{Frame, FrameType, FRAME_LEN};

#[derive(Parser)]
#[command(name = "mangle-sidecar", about = "Coordinator log sink")]
struct Args {
    /// File the log lines are appended to
    #[arg(long, default_value = "arkham/logs.txt")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(dir) = args.log_file.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
    }
    let mut out = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
        .with_context(|| format!("opening {}", args.log_file.display()))?;

    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; FRAME_LEN];
    loop {
        match stdin.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("reading log pipe"),
        }

        let Ok(frame) = Frame::decode(&buf) else { continue };
        if frame.frame_type != FrameType::Log {
            continue;
        }

        let stamp = format_timestamp(frame.timestamp);
        writeln!(out, "[{stamp}] {}", frame.payload_text())
            .with_context(|| format!("appending to {}", args.log_file.display()))?;
    }

    Ok(())
}

fn format_timestamp(epoch: u32) -> String {
    match Local.timestamp_opt(i64::from(epoch), 0) {
        chrono::LocalResult::Single(dt) => dt.format("%a %b %e %T %Y").to_string(),
        _ => epoch.to_string(),
    }
}
