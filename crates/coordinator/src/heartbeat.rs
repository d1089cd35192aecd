// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator-side heartbeat loop for one worker link.
//!
//! The coordinator is the active side: it sends a probe every interval and
//! reads the reply with a deadline of the same interval. The worker never
//! keeps a timer. Between beats the loop drains registry commands and
//! forwards promotion frames on the link it owns.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mangle_wire::{markers, read_frame, write_frame, Frame, FrameError, FrameType};

use crate::registry::WorkerCommand;

/// Why the heartbeat loop ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// The worker announced its shutdown with a Disconnect frame.
    Clean,
    /// Probe failed, reply timed out, or the reply was not a heartbeat.
    Dead(String),
    /// Coordinator shutdown interrupted the loop.
    Shutdown,
}

/// Probe the worker until it disconnects, dies, or the coordinator shuts
/// down. Returns how the link ended; the caller removes the worker from the
/// registry.
pub async fn run<S>(
    stream: &mut S,
    cmds: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    period: Duration,
    shutdown: &CancellationToken,
) -> WorkerExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return WorkerExit::Shutdown,

            cmd = cmds.recv() => match cmd {
                Some(WorkerCommand::Promote) => {
                    debug!("forwarding principal promotion");
                    let frame = Frame::empty(FrameType::PrincipalWorker);
                    if let Err(e) = write_frame(stream, &frame).await {
                        return WorkerExit::Dead(format!("promotion write failed: {e}"));
                    }
                }
                // Registry entry dropped; shutdown will follow.
                None => return WorkerExit::Shutdown,
            },

            _ = ticker.tick() => {
                match beat(stream, period).await {
                    Ok(Beat::Alive) => {}
                    Ok(Beat::Disconnected) => return WorkerExit::Clean,
                    Err(reason) => return WorkerExit::Dead(reason),
                }
            }
        }
    }
}

enum Beat {
    Alive,
    Disconnected,
}

async fn beat<S>(stream: &mut S, deadline: Duration) -> Result<Beat, String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let probe = Frame::text(FrameType::Heartbeat, markers::HEARTBEAT)
        .map_err(|e| format!("probe encode failed: {e}"))?;
    write_frame(stream, &probe).await.map_err(|e| format!("probe write failed: {e}"))?;

    let reply = match timeout(deadline, read_frame(stream)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(FrameError::ConnectionClosed)) => return Err("link closed".to_string()),
        Ok(Err(e)) => return Err(format!("reply read failed: {e}")),
        Err(_) => return Err("reply deadline elapsed".to_string()),
    };

    match reply.frame_type {
        FrameType::Heartbeat => Ok(Beat::Alive),
        FrameType::Disconnect => Ok(Beat::Disconnected),
        other => Err(format!("unexpected reply {other:?}")),
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
