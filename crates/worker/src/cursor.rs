// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-file transfer-resume cursors.
//!
//! A cursor records how far a distortion job has progressed for one
//! filename: which phase it is in and how many bytes of the current transfer
//! have completed. Cursors live in an in-process map and are mirrored to
//! `<state_dir>/<file>.cursor` JSON records, so a successor worker process
//! sharing the directory attaches to the same cursor after a failover.
//!
//! Phases are strictly monotonic: 0 (receiving) → 1 (distorting) →
//! 2 (sending). An update never regresses the phase; concurrent attachers
//! synchronise on the phase alone.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Transfer phase for one filename.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Phase {
    Receiving,
    Distorting,
    Sending,
}

/// Resume state for one filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub phase: Phase,
    /// Bytes completed in the current transfer: received bytes while
    /// receiving, sent-and-acknowledged bytes while sending.
    pub transferred: u64,
}

impl Cursor {
    fn fresh() -> Self {
        Self { phase: Phase::Receiving, transferred: 0 }
    }
}

/// Shared cursor store, keyed by filename.
pub struct CursorStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Cursor>>,
}

impl CursorStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, cache: Mutex::new(HashMap::new()) })
    }

    /// Start a fresh cursor for a new job, discarding any previous state for
    /// the filename.
    pub fn create(&self, file: &str) -> Cursor {
        let cursor = Cursor::fresh();
        self.cache.lock().insert(file.to_string(), cursor);
        self.persist(file, cursor);
        cursor
    }

    /// Attach to the cursor for `file`: the in-process one if present, else
    /// the on-disk record, else a fresh cursor.
    pub fn attach(&self, file: &str) -> Cursor {
        let mut cache = self.cache.lock();
        if let Some(cursor) = cache.get(file) {
            return *cursor;
        }
        let cursor = self.load(file).unwrap_or_else(Cursor::fresh);
        cache.insert(file.to_string(), cursor);
        cursor
    }

    /// Record progress. The phase never regresses; a stale writer loses.
    pub fn update(&self, file: &str, cursor: Cursor) -> Cursor {
        let mut cache = self.cache.lock();
        let merged = match cache.get(file) {
            Some(existing) if existing.phase > cursor.phase => *existing,
            _ => cursor,
        };
        cache.insert(file.to_string(), merged);
        self.persist(file, merged);
        merged
    }

    /// Drop the cursor once the job is fully delivered.
    pub fn remove(&self, file: &str) {
        self.cache.lock().remove(file);
        let _ = std::fs::remove_file(self.path(file));
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(format!("{file}.cursor"))
    }

    fn load(&self, file: &str) -> Option<Cursor> {
        let bytes = std::fs::read(self.path(file)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn persist(&self, file: &str, cursor: Cursor) {
        match serde_json::to_vec(&cursor) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(self.path(file), bytes) {
                    warn!("cursor record for '{file}' not persisted: {e}");
                }
            }
            Err(e) => warn!("cursor record for '{file}' not serialised: {e}"),
        }
    }
}

#[cfg(test)]
#[path = "cursor_tests.rs"]
mod tests;
