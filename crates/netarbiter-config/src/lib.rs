//! Shared configuration for the network arbiter.
//!
//! The arbiter is launched by a controller program that knows only two
//! settings: the port it will connect to (`--endpointPort`) and, optionally,
//! the port remote arbiters connect to (`--listenPort`). Everything else has a
//! sensible default and exists for operators: logging, bind address, and the
//! heartbeat and handshake budgets. Omitting `--listenPort` selects
//! outbound-only mode in which no peer listener is bound.

use clap::Parser;

mod defaults;
mod logging;
mod timing;

pub use defaults::{
    DEFAULT_BIND_HOST, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS,
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_LIVENESS_TIMEOUT_MS, DEFAULT_LOG_FILTER,
    default_bind_host, default_log_filter_string, default_log_format,
};
pub use logging::LogFormat;
pub use timing::{Timing, TimingError};

/// Runtime configuration for a single arbiter process.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    name = "netarbiter",
    version,
    about = "Multiplexes remote TCP peers over a single controller connection"
)]
pub struct Config {
    /// Port the controller connects to.
    #[arg(long = "endpointPort", value_name = "PORT")]
    pub endpoint_port: u16,
    /// Port remote arbiters connect to; omit for outbound-only mode.
    #[arg(long = "listenPort", value_name = "PORT")]
    pub listen_port: Option<u16>,
    /// Address both listeners bind to.
    #[arg(long = "bind-host", value_name = "HOST", default_value_t = default_bind_host())]
    pub bind_host: String,
    /// Tracing filter expression, for example `info,netarbiter::reactor=debug`.
    #[arg(long = "log-filter", value_name = "FILTER", default_value_t = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value_t = default_log_format())]
    pub log_format: LogFormat,
    /// Milliseconds between heartbeats sent to remote peers.
    #[arg(long = "heartbeat-interval-ms", value_name = "MS", default_value_t = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,
    /// Milliseconds of silence after which a remote peer is presumed dead.
    #[arg(long = "liveness-timeout-ms", value_name = "MS", default_value_t = DEFAULT_LIVENESS_TIMEOUT_MS)]
    pub liveness_timeout_ms: u64,
    /// Milliseconds allowed for the magic-byte handshake with a new peer.
    #[arg(long = "handshake-timeout-ms", value_name = "MS", default_value_t = DEFAULT_HANDSHAKE_TIMEOUT_MS)]
    pub handshake_timeout_ms: u64,
    /// Milliseconds allowed for establishing an outbound TCP connection.
    #[arg(long = "connect-timeout-ms", value_name = "MS", default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,
}

impl Config {
    /// Parses the configuration from the process arguments.
    pub fn load() -> Result<Self, clap::Error> {
        Self::try_parse()
    }

    /// Parses the configuration from an explicit argument list.
    ///
    /// The first item is treated as the binary name, mirroring
    /// [`std::env::args_os`].
    pub fn load_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    /// Port the controller connects to.
    #[must_use]
    pub const fn endpoint_port(&self) -> u16 {
        self.endpoint_port
    }

    /// Peer listening port, when inbound peers are accepted.
    #[must_use]
    pub const fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    /// Whether remote arbiters may connect to this process.
    #[must_use]
    pub const fn accepts_peers(&self) -> bool {
        self.listen_port.is_some()
    }

    /// Address both listeners bind to.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        self.bind_host.as_str()
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Validated timing budgets derived from the millisecond settings.
    pub fn timing(&self) -> Result<Timing, TimingError> {
        Timing::new(
            std::time::Duration::from_millis(self.heartbeat_interval_ms),
            std::time::Duration::from_millis(self.liveness_timeout_ms),
            std::time::Duration::from_millis(self.handshake_timeout_ms),
            std::time::Duration::from_millis(self.connect_timeout_ms),
        )
    }
}

impl Default for Config {
    /// Loopback-only configuration on ephemeral ports, used by tests and
    /// embedders that bind before reporting addresses.
    fn default() -> Self {
        Self {
            endpoint_port: 0,
            listen_port: None,
            bind_host: String::from("127.0.0.1"),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            liveness_timeout_ms: DEFAULT_LIVENESS_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}
