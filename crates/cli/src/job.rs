// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The distortion orchestrator: one job from request to verified result.
//!
//! Upload runs as a strict chunk/ack exchange; any transport failure flags
//! the worker dead, sleeps out the failover grace, asks the coordinator for
//! the successor, and resumes with the same request payload — rewound to the
//! last unacknowledged chunk. The download half mirrors the procedure, with
//! the successor's cursor skipping it ahead to the sending phase.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use mangle_core::{md5_hex, MediaKind, FAILOVER_GRACE};
use mangle_wire::{
    join_fields, markers, read_frame, split_n, write_frame, Frame, FrameError, FrameType,
    MAX_PAYLOAD,
};

use crate::coordinator::CoordinatorLink;
use crate::error::ClientError;

/// Everything one distortion job needs.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub user: String,
    pub user_dir: PathBuf,
    pub filename: String,
    pub kind: MediaKind,
    pub factor: u32,
    /// How long to wait after a worker death before re-querying the
    /// coordinator.
    pub grace: Duration,
}

impl JobSpec {
    pub fn new(user: &str, user_dir: &std::path::Path, filename: &str, kind: MediaKind, factor: u32) -> Self {
        Self {
            user: user.to_string(),
            user_dir: user_dir.to_path_buf(),
            filename: filename.to_string(),
            kind,
            factor,
            grace: FAILOVER_GRACE,
        }
    }
}

/// Job progress, 0–100: the upload covers 0–50, the download 50–100.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU8>);

impl Progress {
    pub fn percent(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, value: u8) {
        self.0.store(value.min(100), Ordering::Relaxed);
    }
}

/// Run one distortion job to completion.
pub async fn run(
    link: &CoordinatorLink,
    spec: &JobSpec,
    progress: &Progress,
) -> Result<(), ClientError> {
    let input = spec.user_dir.join(&spec.filename);
    let size = tokio::fs::metadata(&input).await?.len();
    let md5 = md5_hex(&input)?;
    let request = join_fields(&[
        &spec.user,
        &spec.filename,
        &size.to_string(),
        &md5,
        &spec.factor.to_string(),
    ]);

    let mut worker = connect_worker(link, spec, &request, false).await?;

    upload(&mut worker, link, spec, &request, &input, size, progress).await?;
    if size == 0 {
        progress.set(50);
    }

    let output = spec.user_dir.join(format!("{}_distorted", spec.filename));
    let outmd5 = download(&mut worker, link, spec, &request, &output, progress).await?;

    // Local verdict on what actually landed.
    let actual = md5_hex(&output)?;
    if !actual.eq_ignore_ascii_case(&outmd5) {
        let verdict = Frame::text(FrameType::EndDistort, markers::CHECK_KO)?;
        let _ = write_frame(&mut worker, &verdict).await;
        let _ = tokio::fs::remove_file(&output).await;
        return Err(ClientError::IntegrityFailed);
    }

    let verdict = Frame::text(FrameType::EndDistort, markers::CHECK_OK)?;
    write_frame(&mut worker, &verdict).await?;
    let ack = read_frame(&mut worker).await?;
    if ack.frame_type != FrameType::EndDistort {
        return Err(ClientError::UnexpectedFrame {
            expected: FrameType::EndDistort,
            got: ack.frame_type,
        });
    }

    progress.set(100);
    info!(file = %spec.filename, "distortion complete");
    Ok(())
}

/// Connect to the current principal and open (or resume) the job.
async fn connect_worker(
    link: &CoordinatorLink,
    spec: &JobSpec,
    request: &str,
    resume: bool,
) -> Result<TcpStream, ClientError> {
    let (ip, port) = link.request_worker(spec.kind, &spec.filename).await?;
    let mut stream = TcpStream::connect((ip.as_str(), port)).await?;

    let open_type = if resume { FrameType::ResumeDistort } else { FrameType::StartDistort };
    write_frame(&mut stream, &Frame::text(open_type, request)?).await?;
    let reply = read_frame(&mut stream).await?;
    if reply.frame_type != open_type || reply.payload_is(markers::CON_KO) {
        return Err(ClientError::WorkerRefused);
    }
    Ok(stream)
}

/// Declare the worker dead, wait out the grace period, and re-attach to
/// whichever worker the coordinator elects. Fails the job if no worker of
/// the kind survives.
async fn failover(
    link: &CoordinatorLink,
    spec: &JobSpec,
    request: &str,
) -> Result<TcpStream, ClientError> {
    warn!(file = %spec.filename, "worker link lost, waiting for re-election");
    tokio::time::sleep(spec.grace).await;
    let stream = connect_worker(link, spec, request, true).await?;
    info!(file = %spec.filename, "resumed on a new worker");
    Ok(stream)
}

/// Transport failures trigger failover; everything else aborts the job.
fn is_transport(err: &FrameError) -> bool {
    matches!(err, FrameError::ConnectionClosed | FrameError::Io(_))
}

/// Stream the input file in acknowledged chunks, rewinding to the last
/// unacknowledged chunk after each failover.
async fn upload(
    worker: &mut TcpStream,
    link: &CoordinatorLink,
    spec: &JobSpec,
    request: &str,
    input: &std::path::Path,
    size: u64,
    progress: &Progress,
) -> Result<(), ClientError> {
    let mut file = tokio::fs::File::open(input).await?;
    let mut sent: u64 = 0;
    let mut buf = [0u8; MAX_PAYLOAD];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        match exchange_chunk(worker, &buf[..n]).await {
            Ok(()) => {
                sent += n as u64;
                if size > 0 {
                    progress.set(((sent * 50) / size) as u8);
                }
            }
            Err(ClientError::Frame(e)) if is_transport(&e) => {
                *worker = failover(link, spec, request).await?;
                file.seek(std::io::SeekFrom::Start(sent)).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One chunk out, one `OK` back.
async fn exchange_chunk(worker: &mut TcpStream, chunk: &[u8]) -> Result<(), ClientError> {
    let frame = Frame::new(FrameType::FileData, chunk.to_vec())?;
    write_frame(worker, &frame).await?;
    let reply = read_frame(worker).await?;
    if reply.frame_type != FrameType::FileData {
        return Err(ClientError::UnexpectedFrame {
            expected: FrameType::FileData,
            got: reply.frame_type,
        });
    }
    if !reply.payload_is(markers::OK) {
        return Err(ClientError::MalformedReply);
    }
    Ok(())
}

/// Receive the distorted mirror. One loop handles the whole post-upload
/// conversation, because after a failover the resumed worker replays from
/// whatever phase its cursor recorded: the upload confirmation may repeat,
/// and the download header is re-announced before the chunks continue.
async fn download(
    worker: &mut TcpStream,
    link: &CoordinatorLink,
    spec: &JobSpec,
    request: &str,
    output: &std::path::Path,
    progress: &Progress,
) -> Result<String, ClientError> {
    let mut out = tokio::fs::File::create(output).await?;
    let mut received: u64 = 0;
    let mut outsize: Option<u64> = None;
    let mut outmd5 = String::new();

    loop {
        if let Some(total) = outsize {
            if received >= total {
                break;
            }
        }

        let frame = match read_frame(worker).await {
            Ok(frame) => frame,
            Err(e) if is_transport(&e) => {
                *worker = failover(link, spec, request).await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match frame.frame_type {
            // Upload confirmation; repeats if a successor replayed it.
            FrameType::EndDistort => {
                if !frame.payload_is(markers::CHECK_OK) {
                    return Err(ClientError::UploadRejected);
                }
                write_frame(worker, &Frame::text(FrameType::EndDistort, markers::OK)?).await?;
            }

            FrameType::StartDistortBack => {
                let text = frame.payload_text().into_owned();
                let Some([size_str, md5_str]) = split_n::<2>(&text) else {
                    return Err(ClientError::MalformedReply);
                };
                outsize = Some(size_str.parse().map_err(|_| ClientError::MalformedReply)?);
                outmd5 = md5_str.to_string();
                write_frame(
                    worker,
                    &Frame::text(FrameType::StartDistortBack, markers::OK)?,
                )
                .await?;
            }

            FrameType::FileData => {
                out.write_all(&frame.payload).await?;
                write_frame(worker, &Frame::text(FrameType::FileData, markers::OK)?).await?;
                received += frame.payload.len() as u64;
                if let Some(total) = outsize {
                    if total > 0 {
                        progress.set(50 + ((received.min(total) * 50) / total) as u8);
                    }
                }
            }

            other => {
                return Err(ClientError::UnexpectedFrame {
                    expected: FrameType::FileData,
                    got: other,
                });
            }
        }
    }

    out.flush().await?;
    Ok(outmd5)
}
