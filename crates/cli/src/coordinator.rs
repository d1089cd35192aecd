// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the coordinator link.
//!
//! One TCP link per client, shared by the interactive shell and every job
//! task. Request/reply pairs hold the stream lock for their full exchange,
//! so frames never interleave on the link.

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use mangle_core::MediaKind;
use mangle_wire::{join_fields, markers, read_frame, split_n, write_frame, Frame, FrameType};

use crate::error::ClientError;

/// An established, acknowledged link to the coordinator.
pub struct CoordinatorLink {
    stream: Mutex<TcpStream>,
    user: String,
}

impl std::fmt::Debug for CoordinatorLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorLink")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl CoordinatorLink {
    /// Connect and run the `user&ip&port` handshake.
    pub async fn connect(addr: &str, user: &str) -> Result<Self, ClientError> {
        let mut stream = TcpStream::connect(addr).await?;
        let local = stream.local_addr()?;
        let payload = join_fields(&[user, &local.ip().to_string(), &local.port().to_string()]);
        write_frame(&mut stream, &Frame::text(FrameType::ClientConnect, &payload)?).await?;

        let reply = read_frame(&mut stream).await?;
        if reply.frame_type != FrameType::ClientConnect {
            return Err(ClientError::UnexpectedFrame {
                expected: FrameType::ClientConnect,
                got: reply.frame_type,
            });
        }
        if reply.payload_is(markers::CON_KO) {
            return Err(ClientError::ConnectionRejected);
        }

        debug!(%addr, %user, "connected to coordinator");
        Ok(Self { stream: Mutex::new(stream), user: user.to_string() })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Ask which worker serves `kind`. The coordinator answers with the
    /// current principal's endpoint; it never reserves the job.
    pub async fn request_worker(
        &self,
        kind: MediaKind,
        file: &str,
    ) -> Result<(String, u16), ClientError> {
        let mut stream = self.stream.lock().await;
        let payload = join_fields(&[kind.as_str(), file]);
        write_frame(&mut *stream, &Frame::text(FrameType::DistortReq, &payload)?).await?;

        let reply = read_frame(&mut *stream).await?;
        if reply.frame_type != FrameType::DistortReq {
            return Err(ClientError::UnexpectedFrame {
                expected: FrameType::DistortReq,
                got: reply.frame_type,
            });
        }
        if reply.payload_is(markers::DISTORT_KO) {
            return Err(ClientError::NoWorker(kind));
        }
        if reply.payload_is(markers::MEDIA_KO) {
            return Err(ClientError::MediaRejected);
        }

        let text = reply.payload_text().into_owned();
        let Some([ip, port]) = split_n::<2>(&text) else {
            return Err(ClientError::MalformedReply);
        };
        let port = port.parse().map_err(|_| ClientError::MalformedReply)?;
        Ok((ip.to_string(), port))
    }

    /// Announce a clean logout. The coordinator drops the client record.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let mut stream = self.stream.lock().await;
        let bye = Frame::text(FrameType::Disconnect, &self.user)?;
        write_frame(&mut *stream, &bye).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
