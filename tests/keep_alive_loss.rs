//! End-to-end scenario: B stops answering keep-alive `PING`s; A's session
//! notices within `connectionReadTimeout` and tears itself down, resetting
//! every stream it still had open.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

mod common;

use common::DropPing;
use junction_mux::stream::State;
use junction_mux::{Config, Role, Session};
use std::time::Duration;

#[tokio::test]
async fn missed_keepalive_closes_the_session() {
    let config = Config {
        keepalive_interval: Some(Duration::from_millis(50)),
        connection_read_timeout: Duration::from_millis(200),
        ..Config::default()
    };

    let (a_io, b_io) = tokio::io::duplex(4096);
    // B's outgoing frames pass through a filter that silently drops every
    // PING (both A's probes once echoed and B's own), so A never sees a
    // reply to any keep-alive it sends.
    let b_io = DropPing::new(b_io);

    let a = Session::new(a_io, Role::Initiator, config).unwrap();
    let b = Session::new(b_io, Role::Responder, config).unwrap();

    let a_stream = a.open_stream().unwrap();
    let _b_stream = b.accept_stream().await.unwrap();

    // interval (50ms) + read timeout (200ms) = 250ms until the session
    // notices; padded generously for scheduling jitter under test load.
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(a.is_closed(), "session should have torn itself down after a missed keep-alive");
    assert_eq!(a_stream.state(), State::Reset);
}
