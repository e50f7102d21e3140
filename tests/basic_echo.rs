//! End-to-end scenario: open a stream, echo a handful of bytes, close
//! both sides, and confirm the stream drops out of both stream tables.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

mod common;

use junction_mux::{Config, Role, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn basic_echo() {
    let (a_io, b_io) = tokio::io::duplex(4096);
    let a = Session::new(a_io, Role::Initiator, Config::default()).unwrap();
    let b = Session::new(b_io, Role::Responder, Config::default()).unwrap();

    // Each session already runs its own reader/writer tasks in the
    // background (spawned inside `Session::new`), so `accept_stream` can
    // simply be awaited here without a dedicated task for it.
    let mut a_stream = a.open_stream().unwrap();
    let mut b_stream = b.accept_stream().await.unwrap();

    a_stream.write_all(&[0x01, 0x02, 0x03]).await.unwrap();
    let mut buf = [0u8; 3];
    b_stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, [0x01, 0x02, 0x03]);

    b_stream.write_all(&buf).await.unwrap();
    let mut echoed = [0u8; 3];
    a_stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, [0x01, 0x02, 0x03]);

    a_stream.close().await.unwrap();
    b_stream.close().await.unwrap();

    // Give both sessions' reader tasks a moment to process the FINs and
    // drop the now-closed stream out of their tables.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(a.stream_count(), 0);
    assert_eq!(b.stream_count(), 0);
}
