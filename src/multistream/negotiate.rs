//! Multistream-select negotiation state machines: listener and initiator.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Modeled on `litep2p`'s `listener_select_proto`/`dialer_select_proto`
//! split (`examples/other_examples/..._litep2p-0.12.3-src-multistream_select-mod.rs`),
//! with the retry/backoff loop built in the teacher's idiom: a bounded
//! number of attempts with an increasing delay, the same shape as the
//! teacher's keep-alive interval handling in `mux/inner.rs`.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, warn};

use crate::config::{NegotiationConfig, MULTISTREAM_NA, MULTISTREAM_PROTOCOL_ID};
use crate::error::{Error, Result};

use super::codec::{protocol_payload, read_message, write_message};

/// Run the listener side of multistream-select over `pipe`.
///
/// `lookup` returns `true` if the given token names a protocol we can
/// serve; it is consulted exact-match first (the caller is expected to
/// have already done exact matching before falling back to a predicate, if
/// any — see [`crate::multistream::switch::Switch`]).
///
/// Returns the agreed-upon protocol token once `lookup` accepts one.
pub async fn listener_negotiate<S, F>(
    pipe: &mut S,
    mut lookup: F,
    config: NegotiationConfig,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(&str) -> bool,
{
    let header = read_with_retry(pipe, config).await?;
    if header != MULTISTREAM_PROTOCOL_ID.as_bytes() {
        return Err(Error::BadVersion);
    }
    write_message(pipe, protocol_payload(MULTISTREAM_PROTOCOL_ID)).await?;
    loop {
        let token_bytes = read_with_retry(pipe, config).await?;
        let token = String::from_utf8_lossy(&token_bytes).into_owned();
        trace!(%token, "listener received candidate");
        if lookup(&token) {
            write_message(pipe, token.as_bytes()).await?;
            debug!(%token, "listener accepted candidate");
            return Ok(token);
        }
        write_message(pipe, MULTISTREAM_NA.as_bytes()).await?;
    }
}

/// Run the initiator side of multistream-select over `pipe`, offering
/// `candidates` in order. Returns `Ok(None)` if every candidate was
/// rejected (`na`); fails with [`Error::BadResponse`] (and the caller
/// should reset the pipe) if the peer replies with anything else.
pub async fn select_one_of<S>(
    pipe: &mut S,
    candidates: &[String],
    config: NegotiationConfig,
) -> Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_message(pipe, protocol_payload(MULTISTREAM_PROTOCOL_ID)).await?;
    let header = read_with_retry(pipe, config).await?;
    if header != MULTISTREAM_PROTOCOL_ID.as_bytes() {
        return Err(Error::BadVersion);
    }
    for candidate in candidates {
        trace!(candidate = %candidate, "initiator offering candidate");
        write_message(pipe, candidate.as_bytes()).await?;
        let response = read_with_retry(pipe, config).await?;
        if response == candidate.as_bytes() {
            debug!(chosen = %candidate, "initiator negotiated protocol");
            return Ok(Some(candidate.clone()));
        }
        if response == MULTISTREAM_NA.as_bytes() {
            trace!(candidate = %candidate, "peer replied na, trying next");
            continue;
        }
        warn!(?response, "unexpected multistream response");
        return Err(Error::BadResponse(String::from_utf8_lossy(&response).into_owned()));
    }
    Ok(None)
}

/// Read one message, retrying up to `config.max_retries` times on a timed
/// out read (each attempt `n` waits `retry_delay * n` before retrying),
/// per spec.md §4.C.
async fn read_with_retry<S: AsyncRead + Unpin>(
    pipe: &mut S,
    config: NegotiationConfig,
) -> Result<bytes::Bytes> {
    let mut attempt = 0u32;
    loop {
        match tokio::time::timeout(config.read_timeout, read_message(pipe)).await {
            Ok(result) => return result,
            Err(_elapsed) if attempt < config.max_retries => {
                attempt += 1;
                warn!(attempt, "multistream read timed out, retrying");
                tokio::time::sleep(config.retry_delay * attempt).await;
            }
            Err(_elapsed) => return Err(Error::Deadline),
        }
    }
}

/// Helper used by callers that need a `retry_delay` floor of zero without
/// special-casing `Duration::ZERO` arithmetic at the call site.
pub const fn no_delay() -> Duration {
    Duration::from_millis(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn basic_selection_between_listener_and_initiator() {
        let (mut initiator_io, mut listener_io) = duplex(4096);
        let listener = tokio::spawn(async move {
            listener_negotiate(
                &mut listener_io,
                |token| token == "/proto/c" || token == "/proto/d",
                NegotiationConfig::fail_fast(),
            )
            .await
        });
        let candidates = vec![
            "/proto/x".to_string(),
            "/proto/d".to_string(),
            "/proto/c".to_string(),
        ];
        let chosen = select_one_of(&mut initiator_io, &candidates, NegotiationConfig::fail_fast())
            .await
            .unwrap();
        assert_eq!(chosen.as_deref(), Some("/proto/d"));
        assert_eq!(listener.await.unwrap().unwrap(), "/proto/d");
    }

    #[tokio::test]
    async fn exhausted_candidates_returns_none() {
        let (mut initiator_io, mut listener_io) = duplex(4096);
        let listener = tokio::spawn(async move {
            listener_negotiate(&mut listener_io, |_| false, NegotiationConfig::fail_fast()).await
        });
        let candidates = vec!["/proto/a".to_string(), "/proto/b".to_string()];
        let chosen = select_one_of(&mut initiator_io, &candidates, NegotiationConfig::fail_fast())
            .await
            .unwrap();
        assert_eq!(chosen, None);
        drop(initiator_io);
        assert!(listener.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn bad_version_on_listener_side() {
        let (mut initiator_io, mut listener_io) = duplex(4096);
        write_message(&mut initiator_io, b"/not/multistream").await.unwrap();
        let err = listener_negotiate(&mut listener_io, |_| true, NegotiationConfig::fail_fast())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadVersion));
    }
}
