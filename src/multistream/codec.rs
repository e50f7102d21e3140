//! Multistream-select wire codec: `varint(len+1) | payload(len) | '\n'`.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! The varint encodes the length of payload *plus* the trailing newline, so
//! a reader can size one contiguous read. Grounded on `unsigned-varint`,
//! the crate `litep2p`'s `multistream_select` module uses for exactly this
//! (see `examples/other_examples/..._litep2p-..._multistream_select-mod.rs`),
//! and on the teacher's single-write discipline for outbound frames
//! (`ws_sink.feed`/`.send` called once per logical message in
//! `mux/inner.rs::process_frame_recv_task`) generalized to
//! "one write per message" here.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MULTISTREAM_MAX_MESSAGE_LEN;
use crate::error::{Error, Result};

/// Read one length-delimited, newline-terminated multistream message,
/// returning the payload without the trailing `\n`.
///
/// Fails with [`Error::MessageTooLarge`] if the declared length (including
/// the newline) exceeds [`MULTISTREAM_MAX_MESSAGE_LEN`]; the caller is
/// expected to reset the carrying stream on this error, per spec.md §4.B.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let len_with_newline = read_varint_len(reader).await?;
    if len_with_newline == 0 || len_with_newline > MULTISTREAM_MAX_MESSAGE_LEN {
        return Err(Error::MessageTooLarge(len_with_newline));
    }
    let mut buf = vec![0u8; len_with_newline];
    reader.read_exact(&mut buf).await?;
    if buf.pop() != Some(b'\n') {
        return Err(Error::protocol("multistream message missing trailing newline"));
    }
    Ok(Bytes::from(buf))
}

/// Write one multistream message: `varint(payload.len() + 1) | payload |
/// '\n'`, concatenated and written in a single `write_all` call so the
/// message cannot be fragmented across TCP segments by an eager flush
/// upstream.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() + 1 > MULTISTREAM_MAX_MESSAGE_LEN {
        return Err(Error::MessageTooLarge(payload.len() + 1));
    }
    let mut buf = BytesMut::with_capacity(payload.len() + 6);
    encode_varint_len(payload.len() as u64 + 1, &mut buf);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(b"\n");
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode a `/`-prefixed protocol id as a multistream message payload. The
/// protocol id itself carries no trailing newline; [`write_message`] adds
/// exactly one.
pub fn protocol_payload(protocol_id: &str) -> &[u8] {
    protocol_id.as_bytes()
}

fn encode_varint_len(value: u64, out: &mut BytesMut) {
    let mut buf = unsigned_varint::encode::u64_buffer();
    out.extend_from_slice(unsigned_varint::encode::u64(value, &mut buf));
}

/// The wire format gives no upfront byte count, so this reads one byte at
/// a time (as the teacher's own framing reads grow their buffer
/// incrementally) until the continuation bit clears, then hands the
/// accumulated bytes to `unsigned_varint::decode` for the actual value.
async fn read_varint_len<R: AsyncRead + Unpin>(reader: &mut R) -> Result<usize> {
    let mut buf = [0u8; 10];
    let mut len = 0usize;
    loop {
        if len == buf.len() {
            return Err(Error::protocol("multistream varint too long"));
        }
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        buf[len] = byte[0];
        len += 1;
        if byte[0] & 0x80 == 0 {
            break;
        }
    }
    let (value, _) = unsigned_varint::decode::u64(&buf[..len])
        .map_err(|_| Error::protocol("malformed multistream varint"))?;
    usize::try_from(value).map_err(|_| Error::protocol("multistream varint overflowed usize"))
}
