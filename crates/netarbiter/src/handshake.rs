//! Bounded magic-byte exchange with a new peer.
//!
//! The socket is already non-blocking; a private [`Poll`] waits for readiness
//! so the exchange never outlives its budget, and the stream is deregistered
//! again before it joins the reactor.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use thiserror::Error;

use crate::protocol::{CLIENT_MAGIC, SERVER_MAGIC};

const HANDSHAKE_TOKEN: Token = Token(0);

/// Failures of the magic-byte exchange.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer did not complete the exchange within the budget.
    #[error("handshake timed out after {budget:?}")]
    TimedOut {
        /// Budget that elapsed.
        budget: Duration,
    },
    /// The peer answered with the wrong bytes.
    #[error("unexpected handshake bytes {received:02x?}")]
    Mismatch {
        /// Bytes actually received.
        received: [u8; 2],
    },
    /// The peer closed the socket mid-exchange.
    #[error("peer closed the connection during the handshake")]
    Closed,
    /// The socket failed.
    #[error("handshake i/o failed: {source}")]
    Io {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
}

impl From<io::Error> for HandshakeError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}

/// Sends the client magic and expects the server magic back.
pub(crate) fn initiate(stream: &mut TcpStream, budget: Duration) -> Result<(), HandshakeError> {
    let mut exchange = Exchange::start(stream, budget)?;
    let outcome = exchange
        .write_all(&CLIENT_MAGIC)
        .and_then(|()| exchange.expect(SERVER_MAGIC));
    exchange.finish(outcome)
}

/// Expects the client magic and answers with the server magic.
pub(crate) fn respond(stream: &mut TcpStream, budget: Duration) -> Result<(), HandshakeError> {
    let mut exchange = Exchange::start(stream, budget)?;
    let outcome = exchange
        .expect(CLIENT_MAGIC)
        .and_then(|()| exchange.write_all(&SERVER_MAGIC));
    exchange.finish(outcome)
}

struct Exchange<'stream> {
    stream: &'stream mut TcpStream,
    poll: Poll,
    events: Events,
    budget: Duration,
    deadline: Instant,
}

impl<'stream> Exchange<'stream> {
    fn start(stream: &'stream mut TcpStream, budget: Duration) -> Result<Self, HandshakeError> {
        let poll = Poll::new()?;
        poll.registry().register(
            stream,
            HANDSHAKE_TOKEN,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        Ok(Self {
            stream,
            poll,
            events: Events::with_capacity(4),
            budget,
            deadline: Instant::now() + budget,
        })
    }

    fn expect(&mut self, magic: [u8; 2]) -> Result<(), HandshakeError> {
        let mut received = [0_u8; 2];
        let mut filled = 0;
        while let Some(rest) = received.get_mut(filled..).filter(|rest| !rest.is_empty()) {
            match self.stream.read(rest) {
                Ok(0) => return Err(HandshakeError::Closed),
                Ok(count) => filled += count,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => self.wait()?,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error.into()),
            }
        }
        if received == magic {
            Ok(())
        } else {
            Err(HandshakeError::Mismatch { received })
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HandshakeError> {
        let mut written = 0;
        while let Some(rest) = bytes.get(written..).filter(|rest| !rest.is_empty()) {
            match self.stream.write(rest) {
                Ok(0) => return Err(HandshakeError::Closed),
                Ok(count) => written += count,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => self.wait()?,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<(), HandshakeError> {
        loop {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HandshakeError::TimedOut {
                    budget: self.budget,
                });
            }
            match self.poll.poll(&mut self.events, Some(remaining)) {
                Ok(()) if self.events.is_empty() => {}
                Ok(()) => return Ok(()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn finish(self, outcome: Result<(), HandshakeError>) -> Result<(), HandshakeError> {
        let deregistered = self.poll.registry().deregister(self.stream);
        outcome?;
        deregistered.map_err(HandshakeError::from)
    }
}
