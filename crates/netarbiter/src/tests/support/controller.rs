//! Loopback stand-in for the controller program.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::protocol::{
    Command, CommandPacket, FrameBuffer, FrameEvent, ResponseKind, TaggedResponse,
};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Speaks the command protocol to an arbiter and collects its responses.
pub struct ControllerClient {
    stream: TcpStream,
    buffer: FrameBuffer,
    backlog: VecDeque<TaggedResponse>,
    next_sequence: u16,
}

impl ControllerClient {
    /// Connects to the arbiter's endpoint port.
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect to arbiter endpoint");
        stream
            .set_read_timeout(Some(RESPONSE_TIMEOUT))
            .expect("set read timeout");
        Self {
            stream,
            buffer: FrameBuffer::new(),
            backlog: VecDeque::new(),
            next_sequence: 1,
        }
    }

    /// Sends `command` and returns the sequence it was tagged with.
    pub fn send(&mut self, command: Command) -> u16 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let mut bytes = Vec::new();
        CommandPacket::new(sequence, command)
            .encode_into(&mut bytes)
            .expect("encode command");
        self.send_raw(&bytes);
        sequence
    }

    /// Writes raw bytes to the command connection.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write to arbiter");
    }

    /// Sends `command` and waits for its `'E'` response code.
    ///
    /// Unsolicited responses arriving meanwhile are kept for
    /// [`Self::next_response`].
    pub fn execute(&mut self, command: Command) -> i32 {
        let sequence = self.send(command);
        self.await_command_end(sequence)
    }

    /// Waits for the `'E'` response carrying `sequence`.
    pub fn await_command_end(&mut self, sequence: u16) -> i32 {
        loop {
            let response = self.read_response().expect("command end before timeout");
            if response.packet.kind == ResponseKind::CommandEnd
                && response.packet.sequence == sequence
            {
                assert!(response.source.is_command(), "'E' must come from the arbiter");
                return response.packet.code().expect("command end carries a code");
            }
            self.backlog.push_back(response);
        }
    }

    /// Next response, unsolicited or not, in arrival order.
    pub fn next_response(&mut self) -> TaggedResponse {
        self.backlog
            .pop_front()
            .or_else(|| self.read_response())
            .expect("response before timeout")
    }

    /// Waits for the next response of `kind`, keeping the others.
    pub fn next_of_kind(&mut self, kind: ResponseKind) -> TaggedResponse {
        if let Some(position) = self
            .backlog
            .iter()
            .position(|response| response.packet.kind == kind)
        {
            return self
                .backlog
                .remove(position)
                .expect("position is within the backlog");
        }
        loop {
            let response = self.read_response().expect("response before timeout");
            if response.packet.kind == kind {
                return response;
            }
            self.backlog.push_back(response);
        }
    }

    /// Asserts that nothing arrives within `window`.
    pub fn expect_silence(&mut self, window: Duration) {
        assert!(self.backlog.is_empty(), "unexpected backlog {:?}", self.backlog);
        self.stream
            .set_read_timeout(Some(window))
            .expect("shorten read timeout");
        let received = self.read_response();
        self.stream
            .set_read_timeout(Some(RESPONSE_TIMEOUT))
            .expect("restore read timeout");
        assert!(received.is_none(), "unexpected response {received:?}");
    }

    /// Whether the arbiter has closed the command connection.
    pub fn wait_for_close(&mut self) -> bool {
        let mut chunk = [0_u8; 256];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::ConnectionReset => return true,
                Err(_) => return false,
            }
        }
    }

    /// Closes the connection as a crashed controller would.
    pub fn hang_up(&self) {
        drop(self.stream.shutdown(Shutdown::Both));
    }

    fn read_response(&mut self) -> Option<TaggedResponse> {
        let mut chunk = [0_u8; 4096];
        loop {
            match self.buffer.next_frame().expect("arbiter output is well framed") {
                Some(FrameEvent::Frame(frame)) => {
                    return Some(TaggedResponse::decode(frame).expect("tagged response"));
                }
                Some(FrameEvent::Heartbeat) => panic!("the controller never receives heartbeats"),
                None => {}
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
                Err(error) => panic!("controller read failed: {error}"),
            }
        }
    }
}
