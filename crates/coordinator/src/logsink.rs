// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-way framed log pipe to the sidecar process.
//!
//! The coordinator owns the sidecar child and its stdin. Every significant
//! state change becomes one Log frame — always exactly 256 bytes — so the
//! sidecar can read whole records. A writer task serialises emissions; the
//! rest of the coordinator only ever enqueues.

use std::process::Stdio;

use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mangle_wire::{write_frame, Frame, FrameType, MAX_PAYLOAD};

struct Pipe {
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
    child: Child,
}

/// Handle for emitting log records toward the sidecar.
pub struct LogSink {
    pipe: Mutex<Option<Pipe>>,
}

impl LogSink {
    /// Spawn the sidecar and start the writer task. If the sidecar cannot be
    /// spawned the coordinator keeps running without it.
    pub fn spawn() -> Self {
        let mut command = sidecar_command();
        match command.stdin(Stdio::piped()).spawn() {
            Ok(mut child) => match child.stdin.take() {
                Some(mut stdin) => {
                    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                    let writer = tokio::spawn(async move {
                        // Ends when the channel closes and drains; dropping
                        // stdin then gives the sidecar its EOF.
                        while let Some(message) = rx.recv().await {
                            let Ok(frame) = log_frame(&message) else { continue };
                            if let Err(e) = write_frame(&mut stdin, &frame).await {
                                warn!("log sidecar pipe write failed: {e}");
                                return;
                            }
                        }
                    });
                    Self { pipe: Mutex::new(Some(Pipe { tx, writer, child })) }
                }
                None => {
                    warn!("log sidecar spawned without a stdin pipe; logging disabled");
                    Self::disabled()
                }
            },
            Err(e) => {
                warn!("failed to spawn log sidecar: {e}; logging disabled");
                Self::disabled()
            }
        }
    }

    /// A sink that traces locally but never writes to a sidecar.
    pub fn disabled() -> Self {
        Self { pipe: Mutex::new(None) }
    }

    /// Record one state change. Mirrored to local tracing; forwarded to the
    /// sidecar when one is attached.
    pub fn emit(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "mangle::events", "{message}");
        if let Some(pipe) = self.pipe.lock().as_ref() {
            let _ = pipe.tx.send(message);
        }
    }

    /// Close the pipe and wait for the sidecar to drain and exit.
    pub async fn shutdown(&self) {
        let pipe = self.pipe.lock().take();
        if let Some(Pipe { tx, writer, mut child }) = pipe {
            drop(tx);
            let _ = writer.await;
            if let Err(e) = child.wait().await {
                warn!("log sidecar did not exit cleanly: {e}");
            }
        }
    }
}

/// Truncate to the frame payload limit; log records are best-effort ASCII.
fn log_frame(message: &str) -> Result<Frame, mangle_wire::FrameError> {
    let bytes = message.as_bytes();
    let end = bytes.len().min(MAX_PAYLOAD);
    Frame::new(FrameType::Log, bytes[..end].to_vec())
}

/// Prefer the sidecar binary next to our own executable, falling back to
/// `PATH`.
fn sidecar_command() -> Command {
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("mangle-sidecar")))
        .filter(|path| path.exists());
    match sibling {
        Some(path) => Command::new(path),
        None => Command::new("mangle-sidecar"),
    }
}

#[cfg(test)]
#[path = "logsink_tests.rs"]
mod tests;
