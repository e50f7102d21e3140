//! Tunables recognized by the session and the multistream negotiator.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::time::Duration;

use crate::error::{Error, Result};

/// Starting per-direction flow-control window for a new stream, in bytes.
pub const DEFAULT_INITIAL_WINDOW: u32 = 256 * 1024;
/// Upper bound a peer may grow a stream's window to via `WINDOW_UPDATE`.
pub const DEFAULT_MAX_WINDOW: u32 = 16 * 1024 * 1024;
/// Default per-session live stream cap.
pub const DEFAULT_MAX_STREAMS: usize = 1000;
/// Default per-operation read/write deadline applied to a fresh stream.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30);
/// Default keep-alive `PING` cadence. Zero disables keep-alive entirely.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
/// Default idle-pipe tolerance before a session is torn down.
pub const DEFAULT_CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(35);
/// Maximum payload size of a single muxer `DATA` frame.
pub const DEFAULT_MAX_FRAME_DATA_SIZE: u32 = 256 * 1024;
/// Fraction of the window that must be drained, unacknowledged, before a
/// `WINDOW_UPDATE` is emitted (half the initial window, per spec.md §3).
pub const DEFAULT_WINDOW_UPDATE_THRESHOLD_NUM: u32 = 1;
pub const DEFAULT_WINDOW_UPDATE_THRESHOLD_DEN: u32 = 2;

/// Maximum length, in bytes, of a multistream-select message (spec.md §4.B).
pub const MULTISTREAM_MAX_MESSAGE_LEN: usize = 1024;
/// The multistream-select version token.
pub const MULTISTREAM_PROTOCOL_ID: &str = "/multistream/1.0.0";
/// The "not available" token a listener replies with for unknown protocols.
pub const MULTISTREAM_NA: &str = "na";

/// Session-level configuration.
///
/// Mirrors the teacher's `config` module (`config::RWND`,
/// `config::RWND_USIZE`) generalized from a single fixed receive window to
/// the full set of yamux-style knobs spec.md §6 names.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Starting per-direction window for a new stream.
    pub initial_stream_window_size: u32,
    /// Upper bound a peer may grow a stream's window to.
    pub max_stream_window_size: u32,
    /// Per-session live stream cap.
    pub max_streams: usize,
    /// Default read deadline applied to new streams.
    pub stream_read_timeout: Option<Duration>,
    /// Default write deadline applied to new streams.
    pub stream_write_timeout: Option<Duration>,
    /// Keep-alive `PING` cadence. `None` disables keep-alive.
    pub keepalive_interval: Option<Duration>,
    /// Idle-pipe tolerance; must exceed `3 * keepalive_interval` when
    /// keep-alive is enabled.
    pub connection_read_timeout: Duration,
    /// Maximum payload size of a single `DATA` frame.
    pub max_frame_data_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_stream_window_size: DEFAULT_INITIAL_WINDOW,
            max_stream_window_size: DEFAULT_MAX_WINDOW,
            max_streams: DEFAULT_MAX_STREAMS,
            stream_read_timeout: Some(DEFAULT_STREAM_TIMEOUT),
            stream_write_timeout: Some(DEFAULT_STREAM_TIMEOUT),
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            connection_read_timeout: DEFAULT_CONNECTION_READ_TIMEOUT,
            max_frame_data_size: DEFAULT_MAX_FRAME_DATA_SIZE,
        }
    }
}

impl Config {
    /// Check the cross-field invariant spec.md §6 requires
    /// (`connectionReadTimeout` must exceed `3 * keepAliveInterval`) and
    /// that the window bounds are sane.
    pub fn validate(&self) -> Result<()> {
        if self.max_stream_window_size < self.initial_stream_window_size {
            return Err(Error::protocol(
                "max_stream_window_size must be >= initial_stream_window_size",
            ));
        }
        if let Some(keepalive) = self.keepalive_interval {
            if !keepalive.is_zero() && self.connection_read_timeout <= keepalive * 3 {
                return Err(Error::protocol(
                    "connection_read_timeout must exceed 3x keepalive_interval",
                ));
            }
        }
        Ok(())
    }

    /// Window-update threshold in bytes: half of the initial window,
    /// unless the caller has shrunk `initial_stream_window_size` to
    /// something tiny, in which case it's just that window.
    pub(crate) fn window_update_threshold(&self) -> u32 {
        (self.initial_stream_window_size / DEFAULT_WINDOW_UPDATE_THRESHOLD_DEN)
            .max(1)
            * DEFAULT_WINDOW_UPDATE_THRESHOLD_NUM
    }
}

/// Multistream-select negotiator configuration: per-read timeout and retry
/// budget, spec.md §4.C.
#[derive(Debug, Clone, Copy)]
pub struct NegotiationConfig {
    /// Per-read timeout.
    pub read_timeout: Duration,
    /// Maximum number of retries after a timed-out read, if the stream is
    /// still viable.
    pub max_retries: u32,
    /// Base retry delay; the Nth retry waits `retry_delay * n`.
    pub retry_delay: Duration,
}

impl NegotiationConfig {
    /// `failFast`: timeout 5s, 0 retries.
    pub const fn fail_fast() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_delay: Duration::from_millis(0),
        }
    }

    /// `fast`: timeout 10s, 2 retries.
    pub const fn fast() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
        }
    }

    /// `slow`: timeout 60s, 5 retries.
    pub const fn slow() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            max_retries: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self::fast()
    }
}
