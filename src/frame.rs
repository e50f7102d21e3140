//! Muxer frame wire format: a fixed 12-byte header plus payload.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! `version(1) | type(1) | flags(2) | stream_id(4) | length(4)`, all
//! big-endian, followed by `length` bytes of payload. Stream id 0 is
//! reserved for session-level frames (`PING`, `GO_AWAY`). The opcode and
//! flag bits are fixed bit-exact to the yamux wire format.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Header size in bytes: `version(1) + type(1) + flags(2) + stream_id(4) + length(4)`.
pub const HEADER_LEN: usize = 12;
/// The only wire version this crate speaks.
pub const VERSION: u8 = 0;
/// Stream id reserved for session-level frames.
pub const SESSION_STREAM_ID: u32 = 0;

/// Minimal `bitflags`-shaped flag set, hand-rolled so the crate does not
/// need to depend on `bitflags` for four bits. Mirrors the `SYN`/`ACK`/
/// `FIN`/`RST` bitmask fixed bit-exact on the wire.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> $ty {
                self.0
            }

            pub fn from_bits_truncate(bits: $ty) -> Self {
                let mut known = 0;
                $(known |= $value;)*
                Self(bits & known)
            }

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

bitflags_like! {
    /// Control flags carried in a frame header.
    pub struct Flags: u16 {
        const SYN = 0x1;
        const ACK = 0x2;
        const FIN = 0x4;
        const RST = 0x8;
    }
}

/// Frame type, the `type` byte of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Carries application bytes (or, with zero length, a bare FIN/RST).
    Data = 0,
    /// Grants additional send budget to the peer.
    WindowUpdate = 1,
    /// Session-level liveness probe; opaque 8-byte payload echoed with ACK.
    Ping = 2,
    /// Announces that no new streams will be accepted.
    GoAway = 3,
}

impl OpCode {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(OpCode::Data),
            1 => Ok(OpCode::WindowUpdate),
            2 => Ok(OpCode::Ping),
            3 => Ok(OpCode::GoAway),
            other => Err(Error::protocol(format!("unknown frame type {other}"))),
        }
    }
}

/// `GO_AWAY` error codes carried in its 4-byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GoAwayCode {
    Normal = 0,
    ProtocolError = 1,
    InternalError = 2,
}

/// A decoded or about-to-be-encoded muxer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub flags: Flags,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Construct a `DATA` frame. `flags` must not include flags that make
    /// no sense on `DATA` (enforced at the caller; this constructor is
    /// deliberately permissive so callers can compose SYN/ACK/FIN/RST
    /// freely, as the stream writer algorithm does).
    pub fn data(stream_id: u32, payload: Bytes, flags: Flags) -> Self {
        Self {
            opcode: OpCode::Data,
            flags,
            stream_id,
            payload,
        }
    }

    /// Construct a `WINDOW_UPDATE` frame. Payload is always exactly the
    /// 4-byte big-endian delta.
    pub fn window_update(stream_id: u32, delta: u32, flags: Flags) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(delta);
        Self {
            opcode: OpCode::WindowUpdate,
            flags,
            stream_id,
            payload: buf.freeze(),
        }
    }

    /// Construct a `PING` frame carrying an opaque 8-byte id. `ack`
    /// controls whether the ACK flag (a pong) is set.
    pub fn ping(opaque_id: u64, ack: bool) -> Self {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u64(opaque_id);
        Self {
            opcode: OpCode::Ping,
            flags: if ack { Flags::ACK } else { Flags::empty() },
            stream_id: SESSION_STREAM_ID,
            payload: buf.freeze(),
        }
    }

    /// Construct a `GO_AWAY` frame with the given error code.
    pub fn go_away(code: GoAwayCode) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(code as u32);
        Self {
            opcode: OpCode::GoAway,
            flags: Flags::empty(),
            stream_id: SESSION_STREAM_ID,
            payload: buf.freeze(),
        }
    }

    /// A zero-length `DATA` frame carrying only the `RST` flag.
    pub fn reset(stream_id: u32) -> Self {
        Self::data(stream_id, Bytes::new(), Flags::RST)
    }

    /// A zero-length `DATA` frame carrying only the `FIN` flag.
    pub fn fin(stream_id: u32, extra: Flags) -> Self {
        Self::data(stream_id, Bytes::new(), Flags::FIN | extra)
    }

    /// Decode the opaque id out of a `PING` payload.
    pub fn ping_id(&self) -> Result<u64> {
        if self.opcode != OpCode::Ping || self.payload.len() != 8 {
            return Err(Error::protocol("malformed PING payload"));
        }
        Ok((&self.payload[..]).get_u64())
    }

    /// Decode the delta out of a `WINDOW_UPDATE` payload.
    pub fn window_delta(&self) -> Result<u32> {
        if self.opcode != OpCode::WindowUpdate || self.payload.len() != 4 {
            return Err(Error::protocol("malformed WINDOW_UPDATE payload"));
        }
        Ok((&self.payload[..]).get_u32())
    }

    /// Encode this frame onto the wire. Fails if the payload exceeds
    /// `max_frame_data_size`, and refuses to build a `WINDOW_UPDATE`/`PING`/
    /// `GO_AWAY` with a payload of the wrong fixed size.
    pub fn encode(&self, max_frame_data_size: u32) -> Result<Bytes> {
        self.check_fixed_payload_size()?;
        if self.payload.len() > max_frame_data_size as usize {
            return Err(Error::protocol(format!(
                "payload of {} bytes exceeds max_frame_data_size {max_frame_data_size}",
                self.payload.len()
            )));
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(VERSION);
        buf.put_u8(self.opcode as u8);
        buf.put_u16(self.flags.bits());
        buf.put_u32(self.stream_id);
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    fn check_fixed_payload_size(&self) -> Result<()> {
        match self.opcode {
            OpCode::WindowUpdate if self.payload.len() != 4 => Err(Error::protocol(
                "WINDOW_UPDATE payload must be exactly 4 bytes",
            )),
            OpCode::Ping if self.payload.len() != 8 => {
                Err(Error::protocol("PING payload must be exactly 8 bytes"))
            }
            OpCode::GoAway if self.payload.len() != 4 => {
                Err(Error::protocol("GO_AWAY payload must be exactly 4 bytes"))
            }
            _ => Ok(()),
        }
    }

    /// Decode a frame's header from exactly [`HEADER_LEN`] bytes. Returns
    /// the opcode/flags/stream_id and the declared payload length; the
    /// caller is responsible for reading that many further bytes (this
    /// split lets the session reader avoid buffering the whole frame
    /// before it knows how much more to read).
    pub fn decode_header(header: &[u8]) -> Result<(OpCode, Flags, u32, u32)> {
        if header.len() < HEADER_LEN {
            return Err(Error::ShortHeader);
        }
        let mut cur = header;
        let version = cur.get_u8();
        if version != VERSION {
            return Err(Error::BadVersion);
        }
        let opcode = OpCode::from_u8(cur.get_u8())?;
        let flags = Flags::from_bits_truncate(cur.get_u16());
        let stream_id = cur.get_u32();
        let length = cur.get_u32();
        Ok((opcode, flags, stream_id, length))
    }

    /// Decode a complete frame (header + payload) out of `bytes`, which
    /// must contain exactly `HEADER_LEN + length` bytes for the frame
    /// described by its own header.
    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::ShortHeader);
        }
        let header = bytes.split_to(HEADER_LEN);
        let (opcode, flags, stream_id, length) = Self::decode_header(&header)?;
        if bytes.len() as u32 != length {
            return Err(Error::LengthMismatch {
                expected: length,
                actual: bytes.len() as u32,
            });
        }
        let frame = Frame {
            opcode,
            flags,
            stream_id,
            payload: bytes,
        };
        frame.check_fixed_payload_size()?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_round_trips() {
        let frame = Frame::data(7, Bytes::from_static(b"hello"), Flags::SYN);
        let encoded = frame.encode(1024).unwrap();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn window_update_round_trips() {
        let frame = Frame::window_update(3, 4096, Flags::empty());
        let encoded = frame.encode(1024).unwrap();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded.window_delta().unwrap(), 4096);
    }

    #[test]
    fn ping_round_trips() {
        let frame = Frame::ping(0xdead_beef_0000_0001, false);
        let encoded = frame.encode(1024).unwrap();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded.ping_id().unwrap(), 0xdead_beef_0000_0001);
    }

    #[test]
    fn go_away_round_trips() {
        let frame = Frame::go_away(GoAwayCode::ProtocolError);
        let encoded = frame.encode(1024).unwrap();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded.payload.as_ref(), &(GoAwayCode::ProtocolError as u32).to_be_bytes());
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(1); // not VERSION
        bytes.put_u8(0);
        bytes.put_u16(0);
        bytes.put_u32(0);
        bytes.put_u32(0);
        let err = Frame::decode(bytes.freeze()).unwrap_err();
        assert!(matches!(err, Error::BadVersion));
    }

    #[test]
    fn short_header_is_rejected() {
        let bytes = Bytes::from_static(&[0u8; 4]);
        let err = Frame::decode(bytes).unwrap_err();
        assert!(matches!(err, Error::ShortHeader));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(VERSION);
        bytes.put_u8(OpCode::Data as u8);
        bytes.put_u16(0);
        bytes.put_u32(1);
        bytes.put_u32(5); // claims 5 bytes of payload
        bytes.extend_from_slice(b"ab"); // but only 2 are present
        let err = Frame::decode(bytes.freeze()).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { expected: 5, actual: 2 }));
    }

    #[test]
    fn encode_refuses_oversized_payload() {
        let frame = Frame::data(1, Bytes::from(vec![0u8; 10]), Flags::empty());
        let err = frame.encode(4).unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn window_update_rejects_wrong_payload_size() {
        let frame = Frame {
            opcode: OpCode::WindowUpdate,
            flags: Flags::empty(),
            stream_id: 1,
            payload: Bytes::from_static(b"xx"),
        };
        assert!(frame.encode(1024).is_err());
    }
}
