//! End-to-end scenario: a write larger than the configured initial window
//! is split into window-sized `DATA` frames, with the writer blocking
//! between them until the reader's implicit `WINDOW_UPDATE` arrives.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

mod common;

use common::RecordDataFrames;
use junction_mux::{Config, Role, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn flow_control_ramp() {
    let config = Config {
        initial_stream_window_size: 1024,
        max_stream_window_size: 1024,
        ..Config::default()
    };

    let (a_io, b_io) = tokio::io::duplex(64 * 1024);
    let a_io = RecordDataFrames::new(a_io);
    let frames = a_io.frames_handle();

    let a = Session::new(a_io, Role::Initiator, config).unwrap();
    let b = Session::new(b_io, Role::Responder, config).unwrap();

    let mut a_stream = a.open_stream().unwrap();
    let mut b_stream = b.accept_stream().await.unwrap();

    let payload = vec![0xABu8; 2048];
    let payload_for_writer = payload.clone();
    let writer = tokio::spawn(async move {
        a_stream.write_all(&payload_for_writer).await.unwrap();
        a_stream
    });

    let mut received = vec![0u8; 2048];
    b_stream.read_exact(&mut received).await.unwrap();
    assert_eq!(received, payload);

    let _a_stream = writer.await.unwrap();

    let observed = frames.lock().unwrap().clone();
    let data_frames: Vec<_> = observed.into_iter().filter(|f| f.len > 0).collect();
    assert_eq!(data_frames.len(), 2, "expected exactly two DATA frames: {data_frames:?}");
    assert_eq!(data_frames[0].len, 1024);
    assert_eq!(data_frames[1].len, 1024);
    assert_eq!(data_frames[0].stream_id, data_frames[1].stream_id);
}
