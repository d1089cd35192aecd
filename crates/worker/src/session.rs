// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client transfer and distortion session.
//!
//! One session per accepted client link, in three phases driven by the
//! file's resume cursor: receive the upload, distort it, stream the result
//! back. A link loss leaves the cursor behind so a later ResumeDistort —
//! from this process or a successor sharing the working directory — picks
//! up at the boundary of the last completed work. Phase transitions are
//! strictly monotonic.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use mangle_core::md5_hex;
use mangle_wire::{
    join_fields, markers, read_frame, split_n, write_frame, Frame, FrameError, FrameType,
    MAX_PAYLOAD,
};

use crate::cursor::{Cursor, CursorStore, Phase};
use crate::distort;

/// Errors ending a session. Transport errors leave the resume cursor in
/// place; everything else is a hard stop.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("malformed distortion request")]
    BadRequest,

    #[error("upload of '{0}' failed its integrity check")]
    IntegrityFailed(String),

    #[error("client rejected the distorted '{0}'")]
    ClientRejected(String),
}

/// Shared state for all sessions of one worker.
pub struct SessionCtx {
    pub worker_dir: PathBuf,
    pub cursors: Arc<CursorStore>,
}

impl SessionCtx {
    pub fn new(worker_dir: PathBuf) -> io::Result<Self> {
        let cursors = Arc::new(CursorStore::open(worker_dir.join("state"))?);
        Ok(Self { worker_dir, cursors })
    }
}

/// Drive one client link from initial request to teardown.
pub async fn run<S>(stream: &mut S, ctx: &SessionCtx) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = read_frame(stream).await?;
    let resume = match first.frame_type {
        FrameType::StartDistort => false,
        FrameType::ResumeDistort => true,
        other => {
            return Err(SessionError::Protocol(format!("session opened with {other:?}")));
        }
    };

    let payload = first.payload_text().into_owned();
    let parsed = split_n::<5>(&payload).and_then(|[user, file, size, md5, factor]| {
        let size = size.parse::<u64>().ok()?;
        let factor = factor.parse::<u32>().ok()?;
        Some((user.to_string(), file.to_string(), size, md5.to_string(), factor))
    });
    let Some((user, file, size, md5, factor)) = parsed else {
        let reply = Frame::text(first.frame_type, markers::CON_KO)?;
        write_frame(stream, &reply).await?;
        return Err(SessionError::BadRequest);
    };

    let mut cursor =
        if resume { ctx.cursors.attach(&file) } else { ctx.cursors.create(&file) };
    write_frame(stream, &Frame::text(first.frame_type, markers::OK)?).await?;
    info!(%user, %file, size, factor, resume, phase = ?cursor.phase, "distortion session opened");

    let upload_dir = ctx.worker_dir.join("uploads").join(&user);
    tokio::fs::create_dir_all(&upload_dir).await?;
    let upload_path = upload_dir.join(&file);

    if cursor.phase == Phase::Receiving {
        cursor = receive_upload(stream, ctx, &upload_path, &file, size, &md5, resume, cursor)
            .await?;
    }

    let output = if cursor.phase == Phase::Distorting {
        info!(%file, factor, "distorting");
        let output = distort::apply(&upload_path, factor)?;
        cursor = ctx.cursors.update(&file, Cursor { phase: Phase::Sending, transferred: 0 });
        output
    } else {
        distort::output_path(&upload_path)
    };

    send_back(stream, ctx, &output, &file, cursor).await?;
    ctx.cursors.remove(&file);
    info!(%file, "distortion delivered");
    Ok(())
}

/// Phase 0: write acknowledged chunks into the upload file until `size`
/// bytes have landed, then settle the integrity check. On success the
/// cursor advances to the distorting phase.
#[allow(clippy::too_many_arguments)]
async fn receive_upload<S>(
    stream: &mut S,
    ctx: &SessionCtx,
    path: &Path,
    file: &str,
    size: u64,
    declared_md5: &str,
    resume: bool,
    mut cursor: Cursor,
) -> Result<Cursor, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true);
    if resume {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    let mut out = options.open(path).await?;

    while cursor.transferred < size {
        // A transport error here leaves the cursor for the next resume.
        let frame = read_frame(stream).await?;
        if frame.frame_type != FrameType::FileData {
            return Err(SessionError::Protocol(format!(
                "expected file data, got {:?}",
                frame.frame_type
            )));
        }
        out.write_all(&frame.payload).await?;
        write_frame(stream, &Frame::text(FrameType::FileData, markers::OK)?).await?;
        cursor.transferred += frame.payload.len() as u64;
        cursor = ctx.cursors.update(file, cursor);
    }
    out.flush().await?;
    drop(out);

    let actual = md5_hex(path)?;
    if !actual.eq_ignore_ascii_case(declared_md5) {
        write_frame(stream, &Frame::text(FrameType::EndDistort, markers::CHECK_KO)?).await?;
        let _ = tokio::fs::remove_file(path).await;
        ctx.cursors.remove(file);
        return Err(SessionError::IntegrityFailed(file.to_string()));
    }

    write_frame(stream, &Frame::text(FrameType::EndDistort, markers::CHECK_OK)?).await?;
    let ack = read_frame(stream).await?;
    if ack.frame_type != FrameType::EndDistort || !ack.payload_is(markers::OK) {
        return Err(SessionError::Protocol("upload check not acknowledged".to_string()));
    }

    Ok(ctx.cursors.update(file, Cursor { phase: Phase::Distorting, transferred: 0 }))
}

/// Phase 2: announce the output, then stream acknowledged chunks from the
/// recorded offset and settle the client's verdict.
async fn send_back<S>(
    stream: &mut S,
    ctx: &SessionCtx,
    output: &Path,
    file: &str,
    mut cursor: Cursor,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outsize = tokio::fs::metadata(output).await?.len();
    let outmd5 = md5_hex(output)?;
    let header = join_fields(&[&outsize.to_string(), &outmd5]);
    write_frame(stream, &Frame::text(FrameType::StartDistortBack, &header)?).await?;

    let ack = read_frame(stream).await?;
    if ack.frame_type != FrameType::StartDistortBack || !ack.payload_is(markers::OK) {
        return Err(SessionError::Protocol("download not accepted".to_string()));
    }

    let mut src = tokio::fs::File::open(output).await?;
    src.seek(io::SeekFrom::Start(cursor.transferred)).await?;

    let mut buf = [0u8; MAX_PAYLOAD];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        write_frame(stream, &Frame::new(FrameType::FileData, buf[..n].to_vec())?).await?;
        let ack = read_frame(stream).await?;
        if ack.frame_type != FrameType::FileData || !ack.payload_is(markers::OK) {
            return Err(SessionError::Protocol("chunk not acknowledged".to_string()));
        }
        cursor.transferred += n as u64;
        cursor = ctx.cursors.update(file, cursor);
    }

    let verdict = read_frame(stream).await?;
    if verdict.frame_type != FrameType::EndDistort {
        return Err(SessionError::Protocol(format!(
            "expected final verdict, got {:?}",
            verdict.frame_type
        )));
    }
    let delivered = verdict.payload_is(markers::CHECK_OK);
    write_frame(stream, &Frame::text(FrameType::EndDistort, markers::OK)?).await?;

    if !delivered {
        warn!(%file, "client reported an integrity mismatch");
        ctx.cursors.remove(file);
        return Err(SessionError::ClientRejected(file.to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
