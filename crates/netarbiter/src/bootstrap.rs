//! Arbiter bootstrap orchestration.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;

use netarbiter_config::{Config, Timing, TimingError};
use thiserror::Error;
use tracing::info;

use crate::health::HealthReporter;
use crate::reactor::{Reactor, RunError};
use crate::registry::SystemClock;
use crate::telemetry::{self, TelemetryError};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the arbiter configuration.
    fn load(&self) -> Result<Config, clap::Error>;
}

/// Loader that parses the process arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, clap::Error> {
        Config::load()
    }
}

/// Loader that hands out a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, clap::Error> {
        Ok(self.config.clone())
    }
}

/// Which listening socket failed to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerRole {
    /// The port the controller connects to.
    Endpoint,
    /// The port remote arbiters connect to.
    Peer,
}

impl std::fmt::Display for ListenerRole {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::Endpoint => "endpoint",
            Self::Peer => "peer",
        })
    }
}

/// Errors surfaced during bootstrap. All of them are fatal.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Usage error reported by the argument parser.
        #[source]
        source: clap::Error,
    },
    /// Timing settings are inconsistent.
    #[error("invalid timing configuration: {source}")]
    Timing {
        /// Validation failure.
        #[source]
        source: TimingError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The bind host did not resolve.
    #[error("failed to resolve {role} address {host}:{port}: {source}")]
    Resolve {
        /// Listener being bound.
        role: ListenerRole,
        /// Configured bind host.
        host: String,
        /// Configured port.
        port: u16,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },
    /// The listener could not be bound.
    #[error("failed to bind {role} listener at {addr}: {source}")]
    Bind {
        /// Listener being bound.
        role: ListenerRole,
        /// Address that was tried.
        addr: SocketAddr,
        /// Socket error.
        #[source]
        source: io::Error,
    },
}

/// A bootstrapped arbiter with its listeners bound, waiting for a controller.
pub struct Arbiter {
    config: Config,
    timing: Timing,
    endpoint: TcpListener,
    peers: Option<mio::net::TcpListener>,
    reporter: Arc<dyn HealthReporter>,
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Arbiter")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .field("peers", &self.peers)
            .finish_non_exhaustive()
    }
}

impl Arbiter {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Address the controller should connect to.
    pub fn endpoint_addr(&self) -> io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Address remote arbiters connect to, when inbound peers are accepted.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peers
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Waits for the controller, then runs the reactor until the controller
    /// exits or disconnects.
    ///
    /// Only one controller is ever accepted; the endpoint listener is closed
    /// as soon as it connects.
    pub fn run(self) -> Result<(), RunError> {
        let Self {
            config,
            timing,
            endpoint,
            peers,
            reporter,
            ..
        } = self;
        info!(
            target: BOOTSTRAP_TARGET,
            endpoint_port = config.endpoint_port(),
            "waiting for controller"
        );
        let stream = accept_controller(&endpoint)?;
        drop(endpoint);

        let mut reactor = Reactor::new(timing, peers, Arc::new(SystemClock), reporter)?;
        reactor.attach_controller(stream)?;
        reactor.run()
    }
}

fn accept_controller(endpoint: &TcpListener) -> Result<std::net::TcpStream, RunError> {
    loop {
        match endpoint.accept() {
            Ok((stream, _)) => return Ok(stream),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(RunError::Accept { source }),
        }
    }
}

/// Bootstraps the arbiter using the supplied collaborators.
///
/// Loads configuration, installs telemetry, validates timing, and binds the
/// endpoint listener plus, when `--listenPort` is given, the peer listener.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Arbiter, BootstrapError> {
    reporter.bootstrap_starting();
    match prepare(loader) {
        Ok((config, timing, endpoint, peers)) => {
            reporter.bootstrap_succeeded(&config);
            Ok(Arbiter {
                config,
                timing,
                endpoint,
                peers,
                reporter,
            })
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

type Prepared = (Config, Timing, TcpListener, Option<mio::net::TcpListener>);

fn prepare(loader: &dyn ConfigLoader) -> Result<Prepared, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    let timing = config
        .timing()
        .map_err(|source| BootstrapError::Timing { source })?;

    let endpoint_addr = resolve(ListenerRole::Endpoint, config.bind_host(), config.endpoint_port())?;
    let endpoint = TcpListener::bind(endpoint_addr).map_err(|source| BootstrapError::Bind {
        role: ListenerRole::Endpoint,
        addr: endpoint_addr,
        source,
    })?;

    let peers = match config.listen_port() {
        Some(port) => {
            let peer_addr = resolve(ListenerRole::Peer, config.bind_host(), port)?;
            let listener = mio::net::TcpListener::bind(peer_addr).map_err(|source| {
                BootstrapError::Bind {
                    role: ListenerRole::Peer,
                    addr: peer_addr,
                    source,
                }
            })?;
            Some(listener)
        }
        None => None,
    };
    Ok((config, timing, endpoint, peers))
}

fn resolve(role: ListenerRole, host: &str, port: u16) -> Result<SocketAddr, BootstrapError> {
    let resolve_error = |source| BootstrapError::Resolve {
        role,
        host: host.to_owned(),
        port,
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| resolve_error(io::Error::from(io::ErrorKind::AddrNotAvailable)))
}
