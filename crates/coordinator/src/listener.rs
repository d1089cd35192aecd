// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Acceptor loops and per-link connection handlers.
//!
//! Two listeners (clients, workers), one spawned task per accepted link. All
//! handlers share a [`Ctx`] behind an `Arc`; sockets are owned exclusively by
//! their handler task. Shutdown is a `CancellationToken` raced against every
//! blocking read.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mangle_core::{CoordinatorConfig, MediaKind, HEARTBEAT_INTERVAL};
use mangle_wire::{
    join_fields, markers, read_frame, split_n, write_frame, Frame, FrameError, FrameType,
};

use crate::heartbeat::{self, WorkerExit};
use crate::logsink::LogSink;
use crate::registry::{ClientRegistry, WorkerRegistry, WorkerRole};

/// Errors from starting or running the coordinator.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {endpoint} endpoint on {addr}: {source}")]
    Bind { endpoint: &'static str, addr: String, source: std::io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared coordinator state for all connection handlers.
pub struct Ctx {
    pub workers: WorkerRegistry,
    pub clients: ClientRegistry,
    pub log: LogSink,
    pub heartbeat_interval: Duration,
}

impl Ctx {
    pub fn new(log: LogSink) -> Self {
        Self {
            workers: WorkerRegistry::new(),
            clients: ClientRegistry::new(),
            log,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    /// Override the heartbeat period (tests use short intervals).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// The coordinator with its two bound endpoints.
pub struct Coordinator {
    client_listener: TcpListener,
    worker_listener: TcpListener,
    ctx: Arc<Ctx>,
}

impl Coordinator {
    /// Bind both endpoints from config. Binding before running lets callers
    /// read back ephemeral ports.
    pub async fn bind(cfg: &CoordinatorConfig, ctx: Arc<Ctx>) -> Result<Self, ServeError> {
        let client_addr = format!("{}:{}", cfg.client_ip, cfg.client_port);
        let client_listener = TcpListener::bind(&client_addr).await.map_err(|source| {
            ServeError::Bind { endpoint: "client", addr: client_addr.clone(), source }
        })?;

        let worker_addr = format!("{}:{}", cfg.worker_ip, cfg.worker_port);
        let worker_listener = TcpListener::bind(&worker_addr).await.map_err(|source| {
            ServeError::Bind { endpoint: "worker", addr: worker_addr.clone(), source }
        })?;

        info!(client = %client_addr, worker = %worker_addr, "coordinator listening");
        Ok(Self { client_listener, worker_listener, ctx })
    }

    pub fn client_addr(&self) -> Result<std::net::SocketAddr, ServeError> {
        Ok(self.client_listener.local_addr()?)
    }

    pub fn worker_addr(&self) -> Result<std::net::SocketAddr, ServeError> {
        Ok(self.worker_listener.local_addr()?)
    }

    /// Accept links until shutdown, then join every handler task.
    pub async fn run(self, shutdown: CancellationToken) {
        self.ctx.log.emit("Coordinator started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                accepted = self.client_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "client link accepted");
                        let ctx = Arc::clone(&self.ctx);
                        let token = shutdown.clone();
                        tasks.spawn(async move {
                            client_task(stream, peer, ctx, token).await;
                        });
                    }
                    Err(e) => error!("client accept error: {e}"),
                },

                accepted = self.worker_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "worker link accepted");
                        let ctx = Arc::clone(&self.ctx);
                        let token = shutdown.clone();
                        tasks.spawn(async move {
                            worker_task(stream, ctx, token).await;
                        });
                    }
                    Err(e) => error!("worker accept error: {e}"),
                },
            }
        }

        // Dropping the listeners stops new links; cancelled handlers unwind
        // on their own select arms.
        while tasks.join_next().await.is_some() {}
        self.ctx.log.emit("Coordinator stopped");
    }
}

async fn client_task(
    mut stream: TcpStream,
    peer: std::net::SocketAddr,
    ctx: Arc<Ctx>,
    shutdown: CancellationToken,
) {
    let id = ctx.clients.register(peer);
    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = handle_client(&mut stream, &ctx) => match result {
            Ok(()) => {}
            Err(FrameError::ConnectionClosed) => debug!(%peer, "client link closed"),
            Err(e) => warn!(%peer, "client link error: {e}"),
        }
    }
    ctx.clients.remove(id);
}

/// Serve one client link: connect handshake, distortion dispatch, disconnect.
pub(crate) async fn handle_client<S>(stream: &mut S, ctx: &Ctx) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = read_frame(stream).await?;
        match frame.frame_type {
            FrameType::ClientConnect => {
                let payload = frame.payload_text();
                let reply = match split_n::<3>(&payload) {
                    Some([user, ip, port]) if !user.is_empty() => {
                        ctx.log.emit(format!("Client connected: {user} from {ip}:{port}"));
                        Frame::empty(FrameType::ClientConnect)
                    }
                    _ => {
                        ctx.log.emit("Client connect rejected: malformed payload");
                        Frame::text(FrameType::ClientConnect, markers::CON_KO)?
                    }
                };
                write_frame(stream, &reply).await?;
            }

            FrameType::DistortReq => {
                let payload = frame.payload_text();
                let reply = dispatch(ctx, &payload)?;
                write_frame(stream, &reply).await?;
            }

            FrameType::Disconnect => {
                ctx.log.emit("Client disconnected");
                return Ok(());
            }

            other => {
                // Unexpected type for this link: drop the frame, log, close.
                warn!("unexpected client frame {other:?}");
                ctx.log.emit(format!("Client link closed on unexpected frame {other:?}"));
                return Ok(());
            }
        }
    }
}

/// Answer a DistortReq: the current principal's endpoint, or a KO marker.
/// The coordinator never reserves or tracks the job.
fn dispatch(ctx: &Ctx, payload: &str) -> Result<Frame, FrameError> {
    let Some([kind_str, file]) = split_n::<2>(payload) else {
        ctx.log.emit("Distort request rejected: malformed payload");
        return Frame::text(FrameType::DistortReq, markers::MEDIA_KO);
    };

    let Ok(kind) = kind_str.parse::<MediaKind>() else {
        ctx.log.emit(format!("Distort request for unknown media '{kind_str}'"));
        return Frame::text(FrameType::DistortReq, markers::MEDIA_KO);
    };

    match ctx.workers.principal(kind) {
        Some((host, port)) => {
            ctx.log.emit(format!("Distort request {kind}/{file}: routed to {host}:{port}"));
            Frame::text(FrameType::DistortReq, &join_fields(&[&host, &port.to_string()]))
        }
        None => {
            ctx.log.emit(format!("Distort request {kind}/{file}: no principal available"));
            Frame::text(FrameType::DistortReq, markers::DISTORT_KO)
        }
    }
}

async fn worker_task(mut stream: TcpStream, ctx: Arc<Ctx>, shutdown: CancellationToken) {
    if let Err(e) = handle_worker(&mut stream, &ctx, &shutdown).await {
        warn!("worker link error: {e}");
    }
}

/// Serve one worker link: registration, role reply, then the heartbeat loop
/// until the worker leaves or dies. Removal re-elects under the registry
/// lock.
pub(crate) async fn handle_worker<S>(
    stream: &mut S,
    ctx: &Ctx,
    shutdown: &CancellationToken,
) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        frame = read_frame(stream) => frame?,
    };

    if first.frame_type != FrameType::WorkerConnect {
        warn!("worker link opened with {:?}", first.frame_type);
        return Ok(());
    }

    let payload = first.payload_text();
    let Some([kind_str, host, port_str]) = split_n::<3>(&payload) else {
        ctx.log.emit("Worker rejected: malformed connect payload");
        return Ok(());
    };
    let (Ok(kind), Ok(port)) = (kind_str.parse::<MediaKind>(), port_str.parse::<u16>()) else {
        ctx.log.emit(format!("Worker rejected: bad connect payload '{payload}'"));
        return Ok(());
    };

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let (id, role) = ctx.workers.register(kind, host.to_string(), port, cmd_tx);
    ctx.log.emit(format!("Worker connected: {kind} at {host}:{port} ({role:?})"));

    let reply = match role {
        WorkerRole::Principal => Frame::empty(FrameType::PrincipalWorker),
        WorkerRole::Standby => Frame::empty(FrameType::WorkerConnect),
    };
    if let Err(e) = write_frame(stream, &reply).await {
        ctx.workers.remove(id);
        ctx.log.emit(format!("Worker removed: {kind} at {host}:{port} (role reply failed)"));
        return Err(e);
    }

    let exit = heartbeat::run(stream, &mut cmd_rx, ctx.heartbeat_interval, shutdown).await;

    if matches!(exit, WorkerExit::Shutdown) {
        // Coordinator is going down; no re-election on the way out.
        return Ok(());
    }

    if let Some(removal) = ctx.workers.remove(id) {
        let how = match &exit {
            WorkerExit::Clean | WorkerExit::Shutdown => "disconnected".to_string(),
            WorkerExit::Dead(reason) => format!("died: {reason}"),
        };
        ctx.log.emit(format!("Worker removed: {} at {}:{} ({how})", removal.kind, removal.host, removal.port));
        match removal.promoted {
            Some((new_host, new_port)) => ctx.log.emit(format!(
                "Promoted standby {} worker at {new_host}:{new_port} to principal",
                removal.kind
            )),
            None if removal.was_principal => {
                ctx.log.emit(format!("No {} workers left to promote", removal.kind));
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
