// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mangle_wire::{Frame, FrameType, FRAME_LEN, MAX_PAYLOAD};

use super::*;

#[tokio::test]
async fn disabled_sink_accepts_emissions() {
    let sink = LogSink::disabled();
    sink.emit("Worker connected");
    sink.shutdown().await;
}

#[test]
fn log_frame_carries_the_message() {
    let frame = log_frame("Worker removed: Text at 10.0.0.1:9200").unwrap();
    assert_eq!(frame.frame_type, FrameType::Log);
    assert_eq!(frame.payload_text(), "Worker removed: Text at 10.0.0.1:9200");
    assert_eq!(frame.encode().len(), FRAME_LEN);
}

#[test]
fn long_messages_are_truncated_to_one_frame() {
    let long = "x".repeat(MAX_PAYLOAD + 100);
    let frame = log_frame(&long).unwrap();
    assert_eq!(frame.payload.len(), MAX_PAYLOAD);
    let decoded = Frame::decode(&frame.encode()).unwrap();
    assert_eq!(decoded.payload.len(), MAX_PAYLOAD);
}
