//! End-to-end scenario: an initiator offers a list of candidates, the
//! listener only recognizes two of them, and both sides converge on the
//! first mutually-supported one.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

mod common;

use junction_mux::config::NegotiationConfig;
use junction_mux::multistream::{listener_negotiate, select_one_of};

#[tokio::test]
async fn offers_converge_on_first_supported_candidate() {
    let (mut initiator_io, mut listener_io) = tokio::io::duplex(4096);

    let listener = tokio::spawn(async move {
        listener_negotiate(
            &mut listener_io,
            |token| token == "/proto/c" || token == "/proto/d",
            NegotiationConfig::fast(),
        )
        .await
    });

    let candidates = vec![
        "/proto/x".to_string(),
        "/proto/d".to_string(),
        "/proto/c".to_string(),
    ];
    let chosen = select_one_of(&mut initiator_io, &candidates, NegotiationConfig::fast())
        .await
        .unwrap();

    assert_eq!(chosen.as_deref(), Some("/proto/d"));
    assert_eq!(listener.await.unwrap().unwrap(), "/proto/d");
}
