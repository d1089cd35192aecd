// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use mangle_core::MediaKind;
use mangle_wire::{FrameError, FrameType};

/// Errors surfaced to the operator. Negative protocol payloads map to their
/// own variants so the console shows them verbatim.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("coordinator rejected the connection (CON_KO)")]
    ConnectionRejected,

    #[error("no {0} workers available (DISTORT_KO)")]
    NoWorker(MediaKind),

    #[error("media kind not recognised by the coordinator (MEDIA_KO)")]
    MediaRejected,

    #[error("worker refused the distortion request (CON_KO)")]
    WorkerRefused,

    #[error("worker reported an upload integrity failure (CHECK_KO)")]
    UploadRejected,

    #[error("distorted file failed its local integrity check (CHECK_KO)")]
    IntegrityFailed,

    #[error("expected a {expected:?} frame, got {got:?}")]
    UnexpectedFrame { expected: FrameType, got: FrameType },

    #[error("malformed reply payload")]
    MalformedReply,
}
