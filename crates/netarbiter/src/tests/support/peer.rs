//! Loopback stand-ins for remote arbiters.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::protocol::{
    CLIENT_MAGIC, FrameBuffer, FrameEvent, HEARTBEAT, ResponsePacket, SERVER_MAGIC, ids,
};

const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Listener that answers one handshake with configurable magic bytes.
pub struct FakeArbiter {
    addr: SocketAddr,
    accepted: JoinHandle<RemotePeer>,
}

impl FakeArbiter {
    /// A well-behaved remote arbiter.
    pub fn spawn() -> Self {
        Self::answering(SERVER_MAGIC)
    }

    /// A listener that replies to the client magic with `reply`.
    pub fn answering(reply: [u8; 2]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake arbiter");
        let addr = listener.local_addr().expect("fake arbiter address");
        let accepted = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept arbiter connection");
            stream
                .set_read_timeout(Some(PEER_TIMEOUT))
                .expect("set read timeout");
            let mut magic = [0_u8; 2];
            stream.read_exact(&mut magic).expect("read client magic");
            assert_eq!(magic, CLIENT_MAGIC, "arbiter must open with the client magic");
            stream.write_all(&reply).expect("write handshake reply");
            RemotePeer::new(stream)
        });
        Self { addr, accepted }
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Waits for the arbiter to connect and returns the peer's side.
    pub fn accept(self) -> RemotePeer {
        self.accepted.join().expect("fake arbiter thread panicked")
    }
}

/// The remote end of an arbiter connection.
pub struct RemotePeer {
    stream: TcpStream,
    buffer: FrameBuffer,
    heartbeats: usize,
}

impl RemotePeer {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: FrameBuffer::new(),
            heartbeats: 0,
        }
    }

    /// Connects to an arbiter's peer port and completes the client handshake.
    pub fn dial(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).expect("connect to peer port");
        stream
            .set_read_timeout(Some(PEER_TIMEOUT))
            .expect("set read timeout");
        stream.write_all(&CLIENT_MAGIC).expect("write client magic");
        let mut magic = [0_u8; 2];
        stream.read_exact(&mut magic).expect("read server magic");
        assert_eq!(magic, SERVER_MAGIC);
        Self::new(stream)
    }

    /// Sends a `'R'` data frame.
    pub fn send_data(&mut self, sequence: u16, payload: &[u8]) {
        let mut bytes = Vec::new();
        ResponsePacket::read(sequence, payload.to_vec())
            .encode_into(&mut bytes)
            .expect("encode peer data");
        self.send_raw(&bytes);
    }

    /// Streams `payload` as numbered data frames until the arbiter stops
    /// taking bytes for `patience` or `limit` frames have gone out.
    ///
    /// Returns how many frames were written whole.
    pub fn send_until_blocked(&mut self, payload: &[u8], limit: u16, patience: Duration) -> u16 {
        self.stream
            .set_write_timeout(Some(patience))
            .expect("set write timeout");
        let mut bytes = Vec::new();
        for sequence in 0..limit {
            bytes.clear();
            ResponsePacket::read(sequence, payload.to_vec())
                .encode_into(&mut bytes)
                .expect("encode peer data");
            if self.stream.write_all(&bytes).is_err() {
                return sequence;
            }
        }
        limit
    }

    pub fn send_heartbeat(&mut self) {
        self.send_raw(&HEARTBEAT);
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write to arbiter");
    }

    /// Next data frame as `(sequence, payload)`, skipping heartbeats.
    pub fn next_data(&mut self) -> Option<(u16, Vec<u8>)> {
        loop {
            match self.next_event()? {
                FrameEvent::Frame(frame) => {
                    assert_eq!(frame.packet_id, ids::READ, "peers only receive data frames");
                    return Some((frame.sequence, frame.payload));
                }
                FrameEvent::Heartbeat => self.heartbeats += 1,
            }
        }
    }

    /// Like [`Self::next_data`], giving up after `window`.
    pub fn next_data_within(&mut self, window: Duration) -> Option<(u16, Vec<u8>)> {
        let deadline = Instant::now() + window;
        let data = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break None;
            }
            self.stream
                .set_read_timeout(Some(remaining))
                .expect("shorten read timeout");
            match self.next_event() {
                Some(FrameEvent::Heartbeat) => self.heartbeats += 1,
                Some(FrameEvent::Frame(frame)) => break Some((frame.sequence, frame.payload)),
                None => break None,
            }
        };
        self.stream
            .set_read_timeout(Some(PEER_TIMEOUT))
            .expect("restore read timeout");
        data
    }

    /// Reads until at least `count` heartbeats have arrived in total.
    pub fn await_heartbeats(&mut self, count: usize) {
        while self.heartbeats < count {
            match self.next_event() {
                Some(FrameEvent::Heartbeat) => self.heartbeats += 1,
                Some(FrameEvent::Frame(frame)) => panic!("unexpected frame {frame:?}"),
                None => panic!("saw {} of {count} heartbeats", self.heartbeats),
            }
        }
    }

    fn next_event(&mut self) -> Option<FrameEvent> {
        let mut chunk = [0_u8; 4096];
        loop {
            if let Some(event) = self.buffer.next_frame().expect("arbiter output is well framed") {
                return Some(event);
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return None,
                Ok(count) => self.buffer.extend(chunk.get(..count).expect("read within chunk")),
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    return None;
                }
                Err(error) => panic!("peer read failed: {error}"),
            }
        }
    }

    /// Whether the arbiter has closed this connection.
    pub fn wait_for_close(&mut self) -> bool {
        loop {
            let mut chunk = [0_u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::ConnectionReset => return true,
                Err(_) => return false,
            }
        }
    }

    pub fn hang_up(&self) {
        drop(self.stream.shutdown(Shutdown::Both));
    }

    /// Stops reading while keeping the socket open, so the arbiter only sees
    /// silence.
    pub fn go_silent(self) -> TcpStream {
        self.stream
    }
}
