//! Ownership of every live connection and its id.
//!
//! The registry maps connection ids to [`Connection`] state, allocates ids,
//! registers sockets with the reactor's poller, and implements the
//! connection-level half of command execution. Connections are closed by
//! marking them; [`ConnectionRegistry::prune_closed`] and
//! [`ConnectionRegistry::release`] finish the job during the reactor's
//! cleanup phase.

mod clock;
mod ids;

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use netarbiter_config::Timing;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, Connection, ConnectionOrigin};
use crate::dispatch::ArbiterControl;
use crate::errors::ArbiterError;
use crate::handshake;
use crate::health::HealthReporter;
use crate::protocol::{ConnectionId, ResponsePacket};

#[cfg(test)]
pub(crate) use self::clock::ManualClock;
pub(crate) use self::clock::{Clock, SystemClock};
pub(crate) use self::ids::{ConnectionKind, IdAllocator};

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Failures while admitting a connection to the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Every id in `0..=i16::MAX` is in use.
    #[error("connection id space exhausted")]
    IdsExhausted,
    /// A command connection is already registered.
    #[error("a command connection is already registered")]
    DuplicateCommand,
    /// The socket could not be configured or registered for readiness.
    #[error("failed to configure connection {id}: {source}")]
    Configure {
        /// Id the connection would have received.
        id: ConnectionId,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
}

/// Poll token of a connection. The command connection maps to `Token(0)`.
pub(crate) fn token_for(id: ConnectionId) -> Token {
    Token(usize::try_from(i32::from(id) + 1).unwrap_or_default())
}

/// Connection id behind a poll token, if the token names a connection.
pub(crate) fn id_for(token: Token) -> Option<ConnectionId> {
    let raw = i32::try_from(token.0).ok()?.checked_sub(1)?;
    i16::try_from(raw).ok().map(ConnectionId::from_raw)
}

/// Owns every registered connection.
pub(crate) struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    ids: IdAllocator,
    poller: Registry,
    timing: Timing,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn HealthReporter>,
    exit_requested: bool,
}

impl ConnectionRegistry {
    pub(crate) fn new(
        poller: Registry,
        timing: Timing,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            connections: HashMap::new(),
            ids: IdAllocator::default(),
            poller,
            timing,
            clock,
            reporter,
            exit_requested: false,
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) const fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Admits the controller's socket as the command connection.
    pub(crate) fn register_controller(
        &mut self,
        stream: std::net::TcpStream,
    ) -> Result<ConnectionId, RegistryError> {
        stream
            .set_nonblocking(true)
            .map_err(|source| RegistryError::Configure {
                id: ConnectionId::COMMAND,
                source,
            })?;
        self.register(ConnectionOrigin::Controller, TcpStream::from_std(stream))
    }

    /// Allocates an id for `stream`, registers it for read and write
    /// readiness, and stamps its liveness timestamps.
    pub(crate) fn register(
        &mut self,
        origin: ConnectionOrigin,
        mut stream: TcpStream,
    ) -> Result<ConnectionId, RegistryError> {
        let kind = match origin {
            ConnectionOrigin::Controller => ConnectionKind::Command,
            ConnectionOrigin::Inbound | ConnectionOrigin::Outbound => ConnectionKind::Remote,
        };
        let id = self.ids.allocate(kind)?;
        if let Err(source) = self.configure(id, &mut stream) {
            self.ids.free(id);
            return Err(RegistryError::Configure { id, source });
        }
        let connection = Connection::new(id, origin, stream, self.clock.now());
        match origin {
            ConnectionOrigin::Controller => self.reporter.controller_attached(connection.peer()),
            ConnectionOrigin::Inbound | ConnectionOrigin::Outbound => {
                self.reporter
                    .connection_opened(id, origin, connection.peer());
            }
        }
        self.connections.insert(id, connection);
        debug!(target: REGISTRY_TARGET, connection = %id, %origin, open = self.len(), "connection registered");
        Ok(id)
    }

    fn configure(&self, id: ConnectionId, stream: &mut TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        self.poller.register(
            stream,
            token_for(id),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    /// Dials `host:port`, performs the client side of the handshake, and
    /// registers the result.
    pub(crate) fn connect_outbound(
        &mut self,
        host: &str,
        port: u16,
    ) -> Result<ConnectionId, ArbiterError> {
        let target = format!("{host}:{port}");
        let addresses = match resolve(host, port, self.timing.connect_timeout()) {
            Ok(resolved) => resolved,
            Err(source) => {
                return Err(ArbiterError::AddressUnresolved {
                    target,
                    source: Some(source),
                });
            }
        };
        if addresses.is_empty() {
            return Err(ArbiterError::AddressUnresolved {
                target,
                source: None,
            });
        }

        debug!(target: REGISTRY_TARGET, %target, candidates = addresses.len(), "dialling peer");
        let stream = match dial(&addresses, self.timing.connect_timeout()) {
            Ok(stream) => stream,
            Err(source) => return Err(ArbiterError::from_connect(target, source)),
        };
        if let Err(source) = stream.set_nonblocking(true) {
            return Err(ArbiterError::Io { target, source });
        }
        let mut stream = TcpStream::from_std(stream);
        if let Err(source) = handshake::initiate(&mut stream, self.timing.handshake_timeout()) {
            return Err(ArbiterError::HandshakeFailed { target, source });
        }
        Ok(self.register(ConnectionOrigin::Outbound, stream)?)
    }

    pub(crate) fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub(crate) fn connections_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Open remote connection addressed by a command, if any.
    fn open_remote(&mut self, id: ConnectionId) -> Result<&mut Connection, ArbiterError> {
        if !id.is_remote() {
            return Err(ArbiterError::InvalidConnectionId { id });
        }
        self.connections
            .get_mut(&id)
            .filter(|connection| !connection.is_closed())
            .ok_or(ArbiterError::InvalidConnectionId { id })
    }

    /// Marks a connection closed; the socket stays open until cleanup.
    pub(crate) fn close_connection(
        &mut self,
        id: ConnectionId,
        reason: CloseReason,
    ) -> Result<(), ArbiterError> {
        let connection = self
            .connections
            .get_mut(&id)
            .filter(|connection| !connection.is_closed())
            .ok_or(ArbiterError::InvalidConnectionId { id })?;
        connection.close(reason);
        debug!(target: REGISTRY_TARGET, connection = %id, %reason, "connection marked closed");
        Ok(())
    }

    /// Queues a response for delivery to the controller.
    pub(crate) fn notify_controller(&mut self, response: ResponsePacket) {
        if let Some(command) = self.connections.get_mut(&ConnectionId::COMMAND) {
            command.queue_response(response);
        }
    }

    /// Whether the controller asked the arbiter to stop.
    pub(crate) const fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Removes every connection marked closed from the mapping.
    ///
    /// The returned connections still own their sockets and ids; pass each to
    /// [`Self::release`].
    pub(crate) fn prune_closed(&mut self) -> Vec<Connection> {
        let closed: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|connection| connection.is_closed())
            .map(Connection::id)
            .collect();
        closed
            .into_iter()
            .filter_map(|id| self.connections.remove(&id))
            .collect()
    }

    /// Deregisters and closes a pruned connection, then frees its id.
    pub(crate) fn release(&mut self, mut connection: Connection) {
        let id = connection.id();
        if let Err(error) = self.poller.deregister(connection.stream_mut()) {
            warn!(target: REGISTRY_TARGET, connection = %id, %error, "failed to deregister socket");
        }
        let reason = connection.close_reason().unwrap_or(CloseReason::Shutdown);
        info!(
            target: REGISTRY_TARGET,
            connection = %id,
            origin = %connection.origin(),
            %reason,
            "connection released"
        );
        drop(connection);
        self.ids.free(id);
        self.reporter.connection_closed(id, reason);
    }

    /// Whether reading `id` must wait for output to drain elsewhere.
    ///
    /// Remote peers wait while the command connection is backlogged; the
    /// controller waits while any open peer is.
    pub(crate) fn reads_paused(&self, id: ConnectionId) -> bool {
        if id.is_command() {
            self.connections.values().any(|connection| {
                connection.id().is_remote() && !connection.is_closed() && connection.is_backlogged()
            })
        } else {
            self.connections
                .get(&ConnectionId::COMMAND)
                .is_some_and(Connection::is_backlogged)
        }
    }

    /// Open connections with deferred reads that may now proceed.
    pub(crate) fn resumable_reads(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|connection| connection.read_deferred() && !connection.is_closed())
            .map(Connection::id)
            .filter(|id| !self.reads_paused(*id))
            .collect()
    }

    /// Closes every remote connection silent for longer than the liveness
    /// timeout. The command connection is never condemned, nor is a peer
    /// whose unread bytes are waiting on backpressure.
    pub(crate) fn scan_dead(&mut self) -> Vec<ConnectionId> {
        let now = self.clock.now();
        let timeout = self.timing.liveness_timeout();
        let mut expired = Vec::new();
        for connection in self.connections.values_mut() {
            if connection.id().is_command()
                || connection.is_closed()
                || connection.read_deferred()
                || connection.idle_for(now) <= timeout
            {
                continue;
            }
            connection.close(CloseReason::LivenessExpired);
            info!(
                target: REGISTRY_TARGET,
                connection = %connection.id(),
                idle_ms = connection.idle_for(now).as_millis(),
                "liveness timeout expired"
            );
            expired.push(connection.id());
        }
        expired
    }

    /// Earliest instant at which a heartbeat or liveness check falls due.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let heartbeat = self.timing.heartbeat_interval();
        let liveness = self.timing.liveness_timeout() + Duration::from_millis(1);
        self.connections
            .values()
            .filter(|connection| connection.id().is_remote() && !connection.is_closed())
            .map(|connection| {
                (connection.last_sent() + heartbeat).min(connection.last_received() + liveness)
            })
            .min()
    }

    /// Whether queued commands, writes, or responses await the next drain.
    pub(crate) fn has_queued_work(&self) -> bool {
        self.connections.values().any(Connection::has_queued)
    }
}

impl ArbiterControl for ConnectionRegistry {
    fn connect(&mut self, host: &str, port: u16) -> Result<ConnectionId, ArbiterError> {
        self.connect_outbound(host, port)
    }

    fn disconnect(&mut self, id: ConnectionId) -> Result<(), ArbiterError> {
        self.open_remote(id)?;
        self.close_connection(id, CloseReason::Requested)
    }

    fn write(
        &mut self,
        id: ConnectionId,
        sequence: u16,
        payload: Vec<u8>,
    ) -> Result<(), ArbiterError> {
        self.open_remote(id)?.queue_write(sequence, payload);
        Ok(())
    }

    fn exit(&mut self) {
        self.exit_requested = true;
        if let Some(command) = self.connections.get_mut(&ConnectionId::COMMAND) {
            command.close(CloseReason::Requested);
        }
    }
}

/// Resolves `host:port`, giving up once `budget` has passed.
fn resolve(host: &str, port: u16, budget: Duration) -> io::Result<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let host = host.to_owned();
    resolve_within(budget, move || {
        (host.as_str(), port)
            .to_socket_addrs()
            .map(Iterator::collect)
    })
}

/// Runs a blocking name lookup on a helper thread and waits at most
/// `budget` for its answer. A lookup that overruns is abandoned.
fn resolve_within<F>(budget: Duration, lookup: F) -> io::Result<Vec<SocketAddr>>
where
    F: FnOnce() -> io::Result<Vec<SocketAddr>> + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name(String::from("netarbiter-resolve"))
        .spawn(move || drop(sender.send(lookup())))?;
    match receiver.recv_timeout(budget) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "name resolution timed out",
        )),
        Err(RecvTimeoutError::Disconnected) => Err(io::Error::other("resolver thread exited")),
    }
}

fn dial(addresses: &[SocketAddr], timeout: Duration) -> io::Result<std::net::TcpStream> {
    let mut last_error = io::Error::from(io::ErrorKind::AddrNotAvailable);
    for address in addresses {
        match std::net::TcpStream::connect_timeout(address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = error,
        }
    }
    Err(last_error)
}
