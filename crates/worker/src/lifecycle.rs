// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker lifecycle: register upstream, react to the coordinator, serve
//! clients while principal.
//!
//! States run forward only — Connecting → Standby → Principal →
//! Terminating — except the Standby → Principal promotion. The upstream
//! link is purely reactive: heartbeats are answered, never initiated. On
//! shutdown the worker announces its Disconnect upstream, stops accepting,
//! shuts every client link to unblock its session, and joins.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mangle_core::WorkerConfig;
use mangle_wire::{join_fields, read_frame, write_frame, Frame, FrameError, FrameType};

use crate::session::{self, SessionCtx, SessionError};

/// Errors that stop the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to connect to coordinator at {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("coordinator rejected registration with {0}")]
    Rejected(String),

    #[error("failed to open serving endpoint on {addr}: {source}")]
    Serve { addr: String, source: io::Error },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Count of in-flight client sessions, so an upstream loss can let running
/// distortions finish before the worker exits.
#[derive(Default)]
pub struct SessionGauge {
    active: AtomicUsize,
    idle: Notify,
}

impl SessionGauge {
    pub fn enter(gauge: &Arc<SessionGauge>) -> SessionGuard {
        gauge.active.fetch_add(1, Ordering::SeqCst);
        SessionGuard(Arc::clone(gauge))
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct SessionGuard(Arc<SessionGauge>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Run the worker until shutdown or upstream loss.
pub async fn run(cfg: WorkerConfig, shutdown: CancellationToken) -> Result<(), WorkerError> {
    let addr = format!("{}:{}", cfg.coord_ip, cfg.coord_port);
    let mut upstream = TcpStream::connect(&addr)
        .await
        .map_err(|source| WorkerError::Connect { addr: addr.clone(), source })?;

    let hello = join_fields(&[cfg.kind.as_str(), &cfg.serve_ip, &cfg.serve_port.to_string()]);
    write_frame(&mut upstream, &Frame::text(FrameType::WorkerConnect, &hello)?).await?;

    let reply = read_frame(&mut upstream).await?;
    let mut principal = match reply.frame_type {
        FrameType::PrincipalWorker => true,
        FrameType::WorkerConnect => false,
        other => return Err(WorkerError::Rejected(format!("{other:?}"))),
    };
    info!(kind = %cfg.kind, principal, "registered with coordinator");

    // Reads and writes on the upstream link happen from different select
    // arms; split the halves so they borrow independently.
    let (mut up_rx, mut up_tx) = upstream.into_split();

    let ctx = Arc::new(SessionCtx::new(cfg.worker_dir.clone())?);
    let gauge = Arc::new(SessionGauge::default());
    let serve_token = shutdown.child_token();

    let mut server: Option<JoinHandle<()>> = None;
    if principal {
        server =
            Some(spawn_server(&cfg, Arc::clone(&ctx), Arc::clone(&gauge), serve_token.clone())
                .await?);
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutting down, notifying coordinator");
                let bye = Frame::text(FrameType::Disconnect, cfg.kind.as_str())?;
                let _ = write_frame(&mut up_tx, &bye).await;
                break;
            }

            frame = read_frame(&mut up_rx) => match frame {
                Ok(frame) => match frame.frame_type {
                    FrameType::Heartbeat => {
                        let reply = Frame::empty(FrameType::Heartbeat);
                        if write_frame(&mut up_tx, &reply).await.is_err() {
                            info!("coordinator link lost");
                            gauge.wait_idle().await;
                            break;
                        }
                    }
                    FrameType::PrincipalWorker => {
                        if !principal {
                            principal = true;
                            info!(kind = %cfg.kind, "promoted to principal");
                            match spawn_server(
                                &cfg,
                                Arc::clone(&ctx),
                                Arc::clone(&gauge),
                                serve_token.clone(),
                            )
                            .await
                            {
                                Ok(handle) => server = Some(handle),
                                Err(e) => {
                                    error!("cannot serve after promotion: {e}");
                                    break;
                                }
                            }
                        }
                    }
                    FrameType::Disconnect => {
                        info!("coordinator disconnected");
                        break;
                    }
                    other => debug!("ignoring upstream frame {other:?}"),
                },
                Err(_) => {
                    // Let in-flight distortions finish before terminating.
                    info!("coordinator link lost");
                    gauge.wait_idle().await;
                    break;
                }
            }
        }
    }

    serve_token.cancel();
    if let Some(handle) = server {
        let _ = handle.await;
    }
    info!("worker stopped");
    Ok(())
}

/// Bind the file-serving endpoint and start accepting client links.
async fn spawn_server(
    cfg: &WorkerConfig,
    ctx: Arc<SessionCtx>,
    gauge: Arc<SessionGauge>,
    token: CancellationToken,
) -> Result<JoinHandle<()>, WorkerError> {
    let addr = format!("{}:{}", cfg.serve_ip, cfg.serve_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| WorkerError::Serve { addr: addr.clone(), source })?;
    info!(%addr, "serving client transfers");
    Ok(tokio::spawn(accept_loop(listener, ctx, gauge, token)))
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionCtx>,
    gauge: Arc<SessionGauge>,
    token: CancellationToken,
) {
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((mut stream, peer)) => {
                    let ctx = Arc::clone(&ctx);
                    let token = token.clone();
                    let guard = SessionGauge::enter(&gauge);
                    sessions.spawn(async move {
                        let _guard = guard;
                        tokio::select! {
                            _ = token.cancelled() => {
                                debug!(%peer, "session interrupted by shutdown");
                            }
                            result = session::run(&mut stream, &ctx) => match result {
                                Ok(()) => {}
                                Err(SessionError::Frame(FrameError::ConnectionClosed)) => {
                                    info!(%peer, "client link lost, cursor retained");
                                }
                                Err(e) => warn!(%peer, "session ended: {e}"),
                            }
                        }
                    });
                }
                Err(e) => error!("accept error: {e}"),
            }
        }
    }
    while sessions.join_next().await.is_some() {}
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
