//! Validated timing budgets for the reactor and handshakes.

use std::time::Duration;

use thiserror::Error;

use crate::defaults::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS,
    DEFAULT_LIVENESS_TIMEOUT_MS, millis,
};

/// Durations governing heartbeats, liveness, and handshake budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    heartbeat_interval: Duration,
    liveness_timeout: Duration,
    handshake_timeout: Duration,
    connect_timeout: Duration,
}

impl Timing {
    /// Builds a timing set, rejecting combinations the reactor cannot honour.
    ///
    /// The liveness timeout must exceed the heartbeat interval, otherwise a
    /// healthy peer could be condemned between two of its own heartbeats.
    pub fn new(
        heartbeat_interval: Duration,
        liveness_timeout: Duration,
        handshake_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, TimingError> {
        for (name, value) in [
            ("heartbeat interval", heartbeat_interval),
            ("liveness timeout", liveness_timeout),
            ("handshake timeout", handshake_timeout),
            ("connect timeout", connect_timeout),
        ] {
            if value.is_zero() {
                return Err(TimingError::Zero { name });
            }
        }
        if liveness_timeout <= heartbeat_interval {
            return Err(TimingError::LivenessTooShort {
                liveness_ms: liveness_timeout.as_millis(),
                heartbeat_ms: heartbeat_interval.as_millis(),
            });
        }
        Ok(Self {
            heartbeat_interval,
            liveness_timeout,
            handshake_timeout,
            connect_timeout,
        })
    }

    /// Interval between heartbeats sent to each remote peer.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Maximum silence tolerated on a remote connection.
    #[must_use]
    pub const fn liveness_timeout(&self) -> Duration {
        self.liveness_timeout
    }

    /// Budget for the magic-byte exchange with a new peer.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Budget for establishing an outbound TCP connection.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_interval: millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            liveness_timeout: millis(DEFAULT_LIVENESS_TIMEOUT_MS),
            handshake_timeout: millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            connect_timeout: millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

/// Errors raised while validating timing configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimingError {
    /// A duration was configured as zero.
    #[error("{name} must be greater than zero")]
    Zero {
        /// Human-readable name of the offending setting.
        name: &'static str,
    },
    /// The liveness timeout does not leave room for a heartbeat.
    #[error("liveness timeout ({liveness_ms} ms) must exceed the heartbeat interval ({heartbeat_ms} ms)")]
    LivenessTooShort {
        /// Configured liveness timeout.
        liveness_ms: u128,
        /// Configured heartbeat interval.
        heartbeat_ms: u128,
    },
}
