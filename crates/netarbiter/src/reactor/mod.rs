//! Single-threaded readiness loop multiplexing remote peers onto the command
//! connection.
//!
//! Each iteration runs the same fixed sequence:
//!
//! 1. execute queued commands and queue their `'E'` responses;
//! 2. send due heartbeats, encode queued responses onto the command
//!    connection and queued writes onto their peers, then flush;
//! 3. release closed connections, announcing remote ones with `'F'`;
//! 4. stop once the command connection is gone;
//! 5. wait for readiness, accept peers, and read frames;
//! 6. close remote peers that outlived the liveness timeout.
//!
//! Pending output is the only backpressure. While the command connection
//! holds more than [`OUTPUT_HIGH_WATER`] unsent bytes, peers are left unread
//! and their kernel buffers fill up; while a peer does, the controller is
//! left unread. Deferred reads resume once the backlog drains.
//!
//! Failures are confined to the connection that produced them. Only losing
//! the poller itself ends the loop with an error.

mod inbound;
mod outbound;

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use netarbiter_config::Timing;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, OUTPUT_HIGH_WATER};
use crate::health::HealthReporter;
use crate::protocol::{CommandPacket, ConnectionId};
use crate::registry::{Clock, ConnectionRegistry, RegistryError, id_for};

const REACTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reactor");

/// Token of the peer listener; connection tokens never reach it.
const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Size of the fixed read chunk shared by every connection.
const READ_CHUNK: usize = 4096;

/// Bytes read from one connection per readiness pass.
const READ_BUDGET: usize = 64 * 1024;

const EVENT_CAPACITY: usize = 256;

/// Failures that stop the reactor.
#[derive(Debug, Error)]
pub enum RunError {
    /// The controller never connected.
    #[error("failed to accept the controller: {source}")]
    Accept {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The readiness poller could not be created.
    #[error("failed to create the readiness poller: {source}")]
    Poll {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The peer listener could not be registered with the poller.
    #[error("failed to register the peer listener: {source}")]
    Listener {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The controller's socket could not be registered.
    #[error("failed to register the controller: {source}")]
    Controller {
        /// Registry failure.
        #[source]
        source: RegistryError,
    },
    /// Waiting for readiness failed.
    #[error("readiness wait failed: {source}")]
    Wait {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Drives every socket of one arbiter process.
pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    registry: ConnectionRegistry,
    listener: Option<TcpListener>,
    commands: VecDeque<CommandPacket>,
    scratch: Vec<u8>,
    reporter: Arc<dyn HealthReporter>,
}

impl Reactor {
    pub(crate) fn new(
        timing: Timing,
        mut listener: Option<TcpListener>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn HealthReporter>,
    ) -> Result<Self, RunError> {
        let poll = Poll::new().map_err(|source| RunError::Poll { source })?;
        let handle = poll
            .registry()
            .try_clone()
            .map_err(|source| RunError::Poll { source })?;
        if let Some(peers) = listener.as_mut() {
            poll.registry()
                .register(peers, LISTENER_TOKEN, Interest::READABLE)
                .map_err(|source| RunError::Listener { source })?;
        }
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            registry: ConnectionRegistry::new(handle, timing, clock, Arc::clone(&reporter)),
            listener,
            commands: VecDeque::new(),
            scratch: vec![0; READ_CHUNK],
            reporter,
        })
    }

    /// Registers the controller's socket as connection `-1`.
    pub(crate) fn attach_controller(
        &mut self,
        stream: std::net::TcpStream,
    ) -> Result<(), RunError> {
        self.registry
            .register_controller(stream)
            .map(|_| ())
            .map_err(|source| RunError::Controller { source })
    }

    /// Runs until the command connection closes, then closes every peer.
    pub(crate) fn run(&mut self) -> Result<(), RunError> {
        let outcome = self.run_loop();
        self.shutdown();
        outcome
    }

    fn run_loop(&mut self) -> Result<(), RunError> {
        loop {
            self.drain_commands();
            self.drain_outbound();
            self.cleanup();
            if !self.registry.contains(ConnectionId::COMMAND) {
                if self.registry.exit_requested() {
                    info!(target: REACTOR_TARGET, "controller requested exit");
                } else {
                    info!(target: REACTOR_TARGET, "controller disconnected");
                }
                return Ok(());
            }
            self.wait_for_events()?;
            self.registry.scan_dead();
        }
    }

    fn drain_commands(&mut self) {
        while let Some(packet) = self.commands.pop_front() {
            let response = crate::dispatch::execute(packet, &mut self.registry);
            self.registry.notify_controller(response);
            if self.registry.exit_requested() {
                if !self.commands.is_empty() {
                    debug!(
                        target: REACTOR_TARGET,
                        discarded = self.commands.len(),
                        "discarding commands queued after exit"
                    );
                }
                self.commands.clear();
            }
        }
    }

    fn wait_for_events(&mut self) -> Result<(), RunError> {
        let timeout = self.poll_timeout();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(source) => return Err(RunError::Wait { source }),
        }
        let ready: Vec<Token> = self
            .events
            .iter()
            .filter(|event| event.is_readable() || event.is_read_closed() || event.is_error())
            .map(mio::event::Event::token)
            .collect();
        for token in ready {
            if token == LISTENER_TOKEN {
                self.accept_peers();
            } else if let Some(id) = id_for(token) {
                self.read_from(id);
            }
        }
        for id in self.registry.resumable_reads() {
            self.read_from(id);
        }
        Ok(())
    }

    /// Zero while work is queued or deferred reads may resume, otherwise the
    /// time left until the next heartbeat or liveness deadline.
    fn poll_timeout(&self) -> Option<Duration> {
        if !self.commands.is_empty()
            || self.registry.has_queued_work()
            || !self.registry.resumable_reads().is_empty()
        {
            return Some(Duration::ZERO);
        }
        let now = self.registry.now();
        self.registry
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn shutdown(&mut self) {
        for connection in self.registry.connections_mut() {
            connection.close(CloseReason::Shutdown);
        }
        for connection in self.registry.prune_closed() {
            self.registry.release(connection);
        }
        if let Some(mut peers) = self.listener.take()
            && let Err(error) = self.poll.registry().deregister(&mut peers)
        {
            warn!(target: REACTOR_TARGET, %error, "failed to deregister peer listener");
        }
        self.reporter.arbiter_stopped();
    }
}

