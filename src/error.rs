//! Error taxonomy for the frame codec, multistream negotiator, stream, and
//! session.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by this crate.
///
/// Each variant is fatal to a specific scope (the frame, the stream, or
/// the whole session) as documented on the variant itself.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire version mismatch, either in a muxer frame header or in the
    /// multistream-select handshake line. Fatal to the carrying stream or
    /// session, depending on where it was observed.
    #[error("bad version")]
    BadVersion,

    /// Malformed frame, unknown frame type, a flow-control window
    /// underflow, or a FIN/DATA referencing an unknown stream id that the
    /// session considers a protocol violation. Fatal to the session; a
    /// `GO_AWAY` is emitted before teardown.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Frame header present but fewer than 12 bytes were available.
    #[error("short frame header")]
    ShortHeader,

    /// The frame's declared `length` does not match the payload actually
    /// read (short read on the underlying pipe, most commonly).
    #[error("frame length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Bytes declared in the frame header.
        expected: u32,
        /// Bytes actually available to read.
        actual: u32,
    },

    /// A multistream-select message exceeded the configured maximum
    /// length. Fatal to the carrying stream, which is reset.
    #[error("multistream message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// The peer replied to a multistream-select candidate with something
    /// other than an echo of that candidate or the literal `na`. Fatal to
    /// the carrying stream, which is reset.
    #[error("unexpected multistream response: {0:?}")]
    BadResponse(String),

    /// No more candidates were available to offer during negotiation.
    #[error("no protocol could be negotiated")]
    NegotiationFailed,

    /// `openStream` was refused because the session is already at
    /// `maxStreams` live streams. Recoverable: the caller may retry later.
    #[error("stream limit reached")]
    Limit,

    /// A deadline armed on a stream (or one of its read/write halves)
    /// expired. The other half may still be usable.
    #[error("deadline exceeded")]
    Deadline,

    /// The stream was reset, locally or by the remote. Terminal for that
    /// stream.
    #[error("stream reset")]
    Reset,

    /// An operation was attempted on an already-closed stream or session.
    #[error("closed")]
    Closed,

    /// A keep-alive `PING` went unanswered within `connectionReadTimeout`.
    /// Terminal for the whole session.
    #[error("keep-alive timeout")]
    KeepAliveTimeout,

    /// Local and remote stream ids would collide with a 32-bit wraparound.
    /// Fatal to the session.
    #[error("stream id space exhausted")]
    IdExhausted,

    /// The secured remote peer id did not match the one the caller
    /// expected when dialing.
    #[error("remote peer id mismatch")]
    PeerIdMismatch,

    /// None of the offered protocol ids (security or muxer) were accepted
    /// by the peer during an upgrade.
    #[error("no {0} protocol could be agreed upon")]
    UpgradeFailed(&'static str),

    /// Propagated I/O failure from the underlying byte-pipe.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// A short, conscious classification of whether this error indicates
    /// that the *peer* went away cleanly, used by callers that want to
    /// downgrade "connection closed" noise in their own logs.
    pub fn because_closed(&self) -> bool {
        matches!(self, Error::Closed | Error::Reset)
    }

    pub(crate) fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::ProtocolError(msg.into())
    }
}
