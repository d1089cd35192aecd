// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame transport over async byte streams.
//!
//! Frames are fixed-size, so reads and writes are exact. There are no
//! timeouts here: liveness is the heartbeat protocol's job, and callers that
//! need a deadline wrap these in `tokio::time::timeout`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{Frame, FrameError, FRAME_LEN};

/// Write one frame, always exactly [`FRAME_LEN`] bytes.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one frame. EOF on a frame boundary maps to
/// [`FrameError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_LEN];
    match reader.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }
    Frame::decode(&buf)
}

#[cfg(test)]
#[path = "io_tests.rs"]
mod tests;
