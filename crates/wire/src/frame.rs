// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encoding and decoding.

use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Total size of every frame on the wire.
pub const FRAME_LEN: usize = 256;

/// Maximum number of payload bytes a frame can carry.
pub const MAX_PAYLOAD: usize = 247;

const DATA_OFFSET: usize = 3;
const CHECKSUM_OFFSET: usize = 250;
const TIMESTAMP_OFFSET: usize = 252;

/// Frame type byte, one per protocol operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Client registers with the coordinator (`user&ip&port`).
    ClientConnect,
    /// Worker registers with the coordinator (`kind&ip&port`); also the
    /// "you are a standby" acknowledgement.
    WorkerConnect,
    /// Client opens a distortion upload (`user&file&size&md5&factor`).
    StartDistort,
    /// Worker opens the distorted-file download (`size&md5`).
    StartDistortBack,
    /// One chunk of file bytes, or its `OK` acknowledgement.
    FileData,
    /// End-of-transfer integrity verdict (`CHECK_OK`/`CHECK_KO`/`OK`).
    EndDistort,
    /// Clean shutdown notice from any peer.
    Disconnect,
    /// Coordinator promotes a worker to principal (empty payload).
    PrincipalWorker,
    /// Client asks the coordinator for a worker (`kind&file`).
    DistortReq,
    /// Client re-attaches to a distortion after failover; payload as
    /// `StartDistort`.
    ResumeDistort,
    /// Liveness probe and its reply.
    Heartbeat,
    /// Coordinator → sidecar log record (ASCII message).
    Log,
}

impl FrameType {
    /// The wire code of this frame type.
    pub fn code(self) -> u8 {
        match self {
            FrameType::ClientConnect => 0x01,
            FrameType::WorkerConnect => 0x02,
            FrameType::StartDistort => 0x03,
            FrameType::StartDistortBack => 0x04,
            FrameType::FileData => 0x05,
            FrameType::EndDistort => 0x06,
            FrameType::Disconnect => 0x07,
            FrameType::PrincipalWorker => 0x08,
            FrameType::DistortReq => 0x10,
            FrameType::ResumeDistort => 0x11,
            FrameType::Heartbeat => 0x12,
            FrameType::Log => 0x20,
        }
    }

    /// Look up a frame type by wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => FrameType::ClientConnect,
            0x02 => FrameType::WorkerConnect,
            0x03 => FrameType::StartDistort,
            0x04 => FrameType::StartDistortBack,
            0x05 => FrameType::FileData,
            0x06 => FrameType::EndDistort,
            0x07 => FrameType::Disconnect,
            0x08 => FrameType::PrincipalWorker,
            0x10 => FrameType::DistortReq,
            0x11 => FrameType::ResumeDistort,
            0x12 => FrameType::Heartbeat,
            0x20 => FrameType::Log,
            _ => return None,
        })
    }
}

/// Errors from encoding, decoding, or transporting frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte limit")]
    PayloadTooLarge(usize),

    #[error("frame checksum mismatch")]
    InvalidChecksum,

    #[error("frame data length {0} out of range")]
    InvalidLength(u16),

    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded frame: type, payload bytes, and the sender's epoch timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
    pub timestamp: u32,
}

impl Frame {
    /// Build a frame stamped with the current time.
    ///
    /// Fails if the payload exceeds [`MAX_PAYLOAD`] bytes.
    pub fn new(frame_type: FrameType, payload: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { frame_type, payload, timestamp: unix_now() })
    }

    /// Build a frame carrying an ASCII payload.
    pub fn text(frame_type: FrameType, payload: &str) -> Result<Self, FrameError> {
        Self::new(frame_type, payload.as_bytes().to_vec())
    }

    /// Build an empty-payload frame. Infallible: zero bytes always fit.
    pub fn empty(frame_type: FrameType) -> Self {
        Self { frame_type, payload: Vec::new(), timestamp: unix_now() }
    }

    /// Serialize to the fixed wire representation.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = self.frame_type.code();
        let len = self.payload.len() as u16;
        buf[1..3].copy_from_slice(&len.to_be_bytes());
        buf[DATA_OFFSET..DATA_OFFSET + self.payload.len()].copy_from_slice(&self.payload);
        buf[TIMESTAMP_OFFSET..].copy_from_slice(&self.timestamp.to_be_bytes());
        let sum = checksum(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    /// Parse a wire frame, verifying checksum, type, and length.
    pub fn decode(buf: &[u8; FRAME_LEN]) -> Result<Self, FrameError> {
        let declared = u16::from_be_bytes([buf[CHECKSUM_OFFSET], buf[CHECKSUM_OFFSET + 1]]);
        if checksum(buf) != declared {
            return Err(FrameError::InvalidChecksum);
        }
        let frame_type = FrameType::from_code(buf[0]).ok_or(FrameError::UnknownType(buf[0]))?;
        let len = u16::from_be_bytes([buf[1], buf[2]]);
        if len as usize > MAX_PAYLOAD {
            return Err(FrameError::InvalidLength(len));
        }
        let timestamp = u32::from_be_bytes([
            buf[TIMESTAMP_OFFSET],
            buf[TIMESTAMP_OFFSET + 1],
            buf[TIMESTAMP_OFFSET + 2],
            buf[TIMESTAMP_OFFSET + 3],
        ]);
        Ok(Self {
            frame_type,
            payload: buf[DATA_OFFSET..DATA_OFFSET + len as usize].to_vec(),
            timestamp,
        })
    }

    /// The payload interpreted as text. Authoritative length is the payload
    /// length, never a terminator.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Whether the payload equals the given textual marker.
    pub fn payload_is(&self, marker: &str) -> bool {
        self.payload == marker.as_bytes()
    }
}

/// 16-bit additive checksum over all bytes except the checksum field.
fn checksum(buf: &[u8; FRAME_LEN]) -> u16 {
    let mut sum: u32 = 0;
    for &b in &buf[..CHECKSUM_OFFSET] {
        sum += u32::from(b);
    }
    for &b in &buf[TIMESTAMP_OFFSET..] {
        sum += u32::from(b);
    }
    (sum % 65536) as u16
}

/// Current Unix time, low 32 bits.
fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
