use std::time::Duration;

/// Address both listeners bind to unless overridden.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Interval between heartbeats sent to remote peers.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;

/// Silence tolerated on a remote connection before it is presumed dead.
pub const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 10_000;

/// Budget for the two-message magic exchange with a new peer.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Budget for establishing an outbound TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Owned log filter value used where allocation is required.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Owned bind host used where allocation is required.
#[must_use]
pub fn default_bind_host() -> String {
    DEFAULT_BIND_HOST.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

pub(crate) const fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}
