// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker and client registries.
//!
//! The worker registry is the routing authority: it records every connected
//! worker in registration order and keeps the invariant that each media kind
//! with at least one worker has exactly one principal. Entries hold metadata
//! plus a command sender to the connection task that owns the link — the
//! socket itself is never stored here.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use mangle_core::MediaKind;

pub type WorkerId = u64;
pub type ClientId = u64;

/// Role of a registered worker within its media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Principal,
    Standby,
}

/// Command delivered to the connection task owning a worker link.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Forward a PrincipalWorker frame: the worker was just elected.
    Promote,
}

#[derive(Debug)]
struct WorkerEntry {
    id: WorkerId,
    kind: MediaKind,
    host: String,
    port: u16,
    role: WorkerRole,
    cmd: mpsc::UnboundedSender<WorkerCommand>,
}

/// Outcome of removing a worker, for logging and diagnostics.
#[derive(Debug)]
pub struct Removal {
    pub kind: MediaKind,
    pub host: String,
    pub port: u16,
    pub was_principal: bool,
    /// Endpoint of the standby promoted in this worker's place, if any.
    pub promoted: Option<(String, u16)>,
}

/// Registry of connected workers, in registration order.
#[derive(Default)]
pub struct WorkerRegistry {
    entries: Mutex<Vec<WorkerEntry>>,
    next_id: AtomicU64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker and decide its role atomically: the first worker of
    /// a kind becomes principal, later ones stand by.
    pub fn register(
        &self,
        kind: MediaKind,
        host: String,
        port: u16,
        cmd: mpsc::UnboundedSender<WorkerCommand>,
    ) -> (WorkerId, WorkerRole) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        let role = if entries.iter().any(|w| w.kind == kind && w.role == WorkerRole::Principal) {
            WorkerRole::Standby
        } else {
            WorkerRole::Principal
        };
        entries.push(WorkerEntry { id, kind, host, port, role, cmd });
        (id, role)
    }

    /// Endpoint of the current principal for a kind, if one exists.
    pub fn principal(&self, kind: MediaKind) -> Option<(String, u16)> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|w| w.kind == kind && w.role == WorkerRole::Principal)
            .map(|w| (w.host.clone(), w.port))
    }

    /// Remove a worker. If it was the principal of its kind, promote the
    /// earliest-registered survivor of the same kind; the promotion command
    /// is enqueued under the registry lock so no query can observe the gap.
    pub fn remove(&self, id: WorkerId) -> Option<Removal> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|w| w.id == id)?;
        let removed = entries.remove(index);

        let mut promoted = None;
        if removed.role == WorkerRole::Principal {
            if let Some(next) = entries.iter_mut().find(|w| w.kind == removed.kind) {
                next.role = WorkerRole::Principal;
                // The owning task may already be gone; removal of that entry
                // will run its own election.
                let _ = next.cmd.send(WorkerCommand::Promote);
                promoted = Some((next.host.clone(), next.port));
            }
        }

        Some(Removal {
            kind: removed.kind,
            host: removed.host,
            port: removed.port,
            was_principal: removed.role == WorkerRole::Principal,
            promoted,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Count of principals per kind; the election invariant check.
    pub fn principal_count(&self, kind: MediaKind) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|w| w.kind == kind && w.role == WorkerRole::Principal)
            .count()
    }
}

/// Registry of connected clients. Bookkeeping only — routing never consults
/// it.
#[derive(Default)]
pub struct ClientRegistry {
    entries: Mutex<HashMap<ClientId, SocketAddr>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: SocketAddr) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, peer);
        id
    }

    pub fn remove(&self, id: ClientId) {
        self.entries.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
