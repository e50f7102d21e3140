//! End-to-end scenario: a writer sends a message then half-closes; the
//! reader drains exactly those bytes and then observes a clean EOF rather
//! than an error.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

mod common;

use junction_mux::{Config, Role, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn write_then_close_write_yields_clean_eof() {
    let (a_io, b_io) = tokio::io::duplex(4096);
    let a = Session::new(a_io, Role::Initiator, Config::default()).unwrap();
    let b = Session::new(b_io, Role::Responder, Config::default()).unwrap();

    let mut a_stream = a.open_stream().unwrap();
    let mut b_stream = b.accept_stream().await.unwrap();

    let message = b"Hello EOF World!";
    a_stream.write_all(message).await.unwrap();
    a_stream.close_write().await.unwrap();

    let mut collected = Vec::new();
    b_stream.read_to_end(&mut collected).await.unwrap();
    assert_eq!(collected, message);

    // A second read past EOF keeps returning zero rather than blocking or
    // erroring.
    let mut buf = [0u8; 8];
    let n = b_stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}
