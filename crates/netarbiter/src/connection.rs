//! Per-socket connection state.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpStream;

use crate::protocol::{
    ConnectionId, EncodeError, FrameBuffer, FrameEvent, FramingError, HEARTBEAT, ResponsePacket,
    TaggedResponse,
};

/// How a connection came to be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionOrigin {
    /// The controller's command connection.
    Controller,
    /// A peer accepted on the listening port.
    Inbound,
    /// A peer dialled through a Connect command.
    Outbound,
}

impl fmt::Display for ConnectionOrigin {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Controller => "controller",
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        })
    }
}

/// Why a connection was marked closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The controller asked for it with Disconnect or Exit.
    Requested,
    /// The remote end closed its socket.
    PeerClosed,
    /// Nothing arrived within the liveness timeout.
    LivenessExpired,
    /// Reading or writing the socket failed.
    IoFailure,
    /// The peer sent bytes that cannot be framed or forwarded.
    ProtocolViolation,
    /// The arbiter is stopping.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Requested => "requested",
            Self::PeerClosed => "peer closed",
            Self::LivenessExpired => "liveness expired",
            Self::IoFailure => "i/o failure",
            Self::ProtocolViolation => "protocol violation",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Pending output above which the reactor stops reading from the
/// connections that feed it.
pub(crate) const OUTPUT_HIGH_WATER: usize = 1024 * 1024;

/// Where a read pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// The kernel buffer is empty for now.
    Drained,
    /// The byte budget ran out; more may be waiting.
    Throttled,
    /// The remote end closed its write half.
    EndOfStream,
}

/// A registered socket together with its queues and liveness timestamps.
///
/// Closing is a mark, not an action: the socket stays open until the reactor
/// releases the connection during cleanup, so queued bytes can still be
/// flushed and the id is not reused while anything refers to it.
pub(crate) struct Connection {
    id: ConnectionId,
    origin: ConnectionOrigin,
    peer: Option<SocketAddr>,
    stream: TcpStream,
    close_reason: Option<CloseReason>,
    last_received: Instant,
    last_sent: Instant,
    writes: VecDeque<(u16, Vec<u8>)>,
    responses: VecDeque<ResponsePacket>,
    outbox: Vec<u8>,
    inbound: FrameBuffer,
    read_deferred: bool,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        origin: ConnectionOrigin,
        stream: TcpStream,
        now: Instant,
    ) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            id,
            origin,
            peer,
            stream,
            close_reason: None,
            last_received: now,
            last_sent: now,
            writes: VecDeque::new(),
            responses: VecDeque::new(),
            outbox: Vec::new(),
            inbound: FrameBuffer::new(),
            read_deferred: false,
        }
    }

    pub(crate) const fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) const fn origin(&self) -> ConnectionOrigin {
        self.origin
    }

    pub(crate) const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub(crate) const fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.close_reason.is_some()
    }

    pub(crate) const fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Marks the connection closed, keeping the first reason recorded.
    ///
    /// Returns `false` when the connection was already closed.
    pub(crate) fn close(&mut self, reason: CloseReason) -> bool {
        if self.close_reason.is_some() {
            return false;
        }
        self.close_reason = Some(reason);
        true
    }

    pub(crate) const fn mark_received(&mut self, now: Instant) {
        self.last_received = now;
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received)
    }

    pub(crate) fn heartbeat_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_sent) >= interval
    }

    pub(crate) const fn last_received(&self) -> Instant {
        self.last_received
    }

    pub(crate) const fn last_sent(&self) -> Instant {
        self.last_sent
    }

    pub(crate) fn queue_write(&mut self, sequence: u16, payload: Vec<u8>) {
        self.writes.push_back((sequence, payload));
    }

    pub(crate) fn queue_response(&mut self, response: ResponsePacket) {
        self.responses.push_back(response);
    }

    /// Whether queued work is waiting for the next outbound drain.
    pub(crate) fn has_queued(&self) -> bool {
        !self.writes.is_empty() || !self.responses.is_empty()
    }

    pub(crate) fn has_pending_output(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Whether pending output has reached [`OUTPUT_HIGH_WATER`].
    pub(crate) fn is_backlogged(&self) -> bool {
        self.outbox.len() >= OUTPUT_HIGH_WATER
    }

    /// Remembers that readable bytes were left in the kernel.
    ///
    /// Readiness is edge-triggered, so the reactor must come back to this
    /// socket itself rather than wait for another event.
    pub(crate) const fn defer_read(&mut self) {
        self.read_deferred = true;
    }

    pub(crate) const fn read_deferred(&self) -> bool {
        self.read_deferred
    }

    pub(crate) fn stage_heartbeat(&mut self, now: Instant) {
        self.outbox.extend_from_slice(&HEARTBEAT);
        self.last_sent = now;
    }

    /// Encodes this connection's queued responses, tagged with its id.
    pub(crate) fn stage_responses_into(&mut self, out: &mut Vec<u8>) -> Vec<EncodeError> {
        let source = self.id;
        self.responses
            .drain(..)
            .filter_map(|packet| TaggedResponse::new(source, packet).encode_into(out).err())
            .collect()
    }

    /// Encodes queued writes as peer data frames in arrival order.
    pub(crate) fn stage_writes(&mut self) -> Vec<EncodeError> {
        let Self { writes, outbox, .. } = self;
        writes
            .drain(..)
            .filter_map(|(sequence, payload)| {
                ResponsePacket::read(sequence, payload)
                    .encode_into(outbox)
                    .err()
            })
            .collect()
    }

    pub(crate) fn stage_bytes(&mut self, bytes: &[u8]) {
        self.outbox.extend_from_slice(bytes);
    }

    /// Writes as much pending output as the socket accepts.
    ///
    /// Bytes the kernel refuses stay at the front of the outbox, so a frame
    /// is never interleaved with bytes staged after it.
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        let mut written = 0;
        let result = loop {
            let Some(pending) = self.outbox.get(written..).filter(|rest| !rest.is_empty()) else {
                break Ok(());
            };
            match self.stream.write(pending) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(count) => written += count,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => break Err(error),
            }
        };
        self.outbox.drain(..written);
        result
    }

    /// Reads until the socket would block or `budget` bytes have arrived,
    /// appending to the frame buffer.
    ///
    /// Returns the number of bytes read alongside where reading stopped.
    /// Bytes read before an error stay buffered.
    pub(crate) fn fill(
        &mut self,
        scratch: &mut [u8],
        budget: usize,
    ) -> io::Result<(usize, ReadOutcome)> {
        self.read_deferred = false;
        let mut total = 0;
        loop {
            if total >= budget {
                return Ok((total, ReadOutcome::Throttled));
            }
            match self.stream.read(scratch) {
                Ok(0) => return Ok((total, ReadOutcome::EndOfStream)),
                Ok(count) => {
                    total += count;
                    self.inbound.extend(scratch.get(..count).unwrap_or_default());
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((total, ReadOutcome::Drained));
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<FrameEvent>, FramingError> {
        self.inbound.next_frame()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("peer", &self.peer)
            .field("close_reason", &self.close_reason)
            .field("queued_writes", &self.writes.len())
            .field("queued_responses", &self.responses.len())
            .field("pending_output", &self.outbox.len())
            .field("read_deferred", &self.read_deferred)
            .finish_non_exhaustive()
    }
}
