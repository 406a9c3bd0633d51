//! Packet variants carried inside frames.

use super::connection_id::ConnectionId;
use super::errors::{DecodeError, EncodeError};
use super::frame::{Frame, HEADER_LEN, MAX_FRAME_LEN, write_frame};
use super::ids;

/// Size of the source tag prefixed to every controller-bound response body.
pub const SOURCE_TAG_LEN: usize = 2;

/// Largest peer payload that still fits a controller-bound frame once tagged.
pub const MAX_FORWARDED_PAYLOAD: usize = MAX_FRAME_LEN - HEADER_LEN - SOURCE_TAG_LEN;

/// Operation requested by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open an outbound connection to a remote arbiter.
    Connect {
        /// Host name or address literal.
        host: String,
        /// Remote arbiter's peer port.
        port: u16,
    },
    /// Close a remote connection.
    Disconnect {
        /// Connection to close.
        id: ConnectionId,
    },
    /// Queue bytes for delivery to a remote connection.
    Write {
        /// Destination connection.
        id: ConnectionId,
        /// Bytes to deliver.
        payload: Vec<u8>,
    },
    /// Shut the arbiter down.
    Exit,
}

impl Command {
    /// Packet id used on the wire.
    #[must_use]
    pub const fn packet_id(&self) -> u8 {
        match self {
            Self::Connect { .. } => ids::CONNECT,
            Self::Disconnect { .. } => ids::DISCONNECT,
            Self::Write { .. } => ids::WRITE,
            Self::Exit => ids::EXIT,
        }
    }
}

/// A command together with the sequence number echoed in its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    /// Sequence chosen by the controller.
    pub sequence: u16,
    /// Requested operation.
    pub command: Command,
}

impl CommandPacket {
    /// Builds a command packet.
    #[must_use]
    pub const fn new(sequence: u16, command: Command) -> Self {
        Self { sequence, command }
    }

    /// Appends the wire image of this command to `out`.
    ///
    /// The arbiter never sends commands; controllers and tests do.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let id = self.command.packet_id();
        match &self.command {
            Command::Connect { host, port } => {
                let host_len = u8::try_from(host.len())
                    .map_err(|_| EncodeError::HostTooLong { length: host.len() })?;
                write_frame(
                    out,
                    self.sequence,
                    id,
                    &[
                        port.to_be_bytes().as_slice(),
                        std::slice::from_ref(&host_len),
                        host.as_bytes(),
                    ],
                )
            }
            Command::Disconnect { id: target } => {
                write_frame(out, self.sequence, id, &[target.to_wire().as_slice()])
            }
            Command::Write {
                id: target,
                payload,
            } => write_frame(
                out,
                self.sequence,
                id,
                &[target.to_wire().as_slice(), payload.as_slice()],
            ),
            Command::Exit => write_frame(out, self.sequence, id, &[]),
        }
    }

    fn decode(frame: Frame) -> Result<Self, DecodeError> {
        let Frame {
            sequence,
            packet_id,
            payload,
        } = frame;
        let malformed = |reason: &'static str| DecodeError::Malformed {
            packet_id,
            sequence,
            reason,
        };
        let command = match packet_id {
            ids::CONNECT => {
                let (port, rest) = payload
                    .split_first_chunk::<2>()
                    .ok_or_else(|| malformed("missing port"))?;
                let (host_len, host) = rest
                    .split_first()
                    .ok_or_else(|| malformed("missing host length"))?;
                if host.len() != usize::from(*host_len) {
                    return Err(malformed("host length does not match payload"));
                }
                if host.is_empty() || !host.is_ascii() {
                    return Err(malformed("host must be non-empty ASCII"));
                }
                Command::Connect {
                    host: String::from_utf8_lossy(host).into_owned(),
                    port: u16::from_be_bytes(*port),
                }
            }
            ids::DISCONNECT => {
                let id: [u8; 2] = payload
                    .as_slice()
                    .try_into()
                    .map_err(|_| malformed("expected a 2-byte connection id"))?;
                Command::Disconnect {
                    id: ConnectionId::from_wire(id),
                }
            }
            ids::WRITE => {
                let (id, data) = payload
                    .split_first_chunk::<2>()
                    .ok_or_else(|| malformed("missing connection id"))?;
                Command::Write {
                    id: ConnectionId::from_wire(*id),
                    payload: data.to_vec(),
                }
            }
            ids::EXIT => {
                if !payload.is_empty() {
                    return Err(malformed("exit carries no payload"));
                }
                Command::Exit
            }
            _ => return Err(malformed("not a command")),
        };
        Ok(Self { sequence, command })
    }
}

/// Kind of response delivered to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Completion of a command, carrying a result code.
    CommandEnd,
    /// A peer connected through the listening port.
    NewConnection,
    /// A connection was torn down.
    EndOfConnection,
    /// Data received from a remote peer.
    Read,
}

impl ResponseKind {
    /// Packet id used on the wire.
    #[must_use]
    pub const fn packet_id(self) -> u8 {
        match self {
            Self::CommandEnd => ids::COMMAND_END,
            Self::NewConnection => ids::NEW_CONNECTION,
            Self::EndOfConnection => ids::END_OF_CONNECTION,
            Self::Read => ids::READ,
        }
    }

    /// Maps a packet id back to a response kind.
    #[must_use]
    pub const fn from_packet_id(packet_id: u8) -> Option<Self> {
        match packet_id {
            ids::COMMAND_END => Some(Self::CommandEnd),
            ids::NEW_CONNECTION => Some(Self::NewConnection),
            ids::END_OF_CONNECTION => Some(Self::EndOfConnection),
            ids::READ => Some(Self::Read),
            _ => None,
        }
    }
}

/// A response-typed packet: a kind plus an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    /// Sequence echoed from the originating command or peer frame.
    pub sequence: u16,
    /// Response kind.
    pub kind: ResponseKind,
    /// Body bytes following the header (and source tag, when tagged).
    pub body: Vec<u8>,
}

impl ResponsePacket {
    /// Completion of the command with `sequence`.
    #[must_use]
    pub fn command_end(sequence: u16, code: i32) -> Self {
        Self {
            sequence,
            kind: ResponseKind::CommandEnd,
            body: code.to_be_bytes().to_vec(),
        }
    }

    /// Announcement of an inbound peer.
    #[must_use]
    pub fn new_connection(id: ConnectionId) -> Self {
        Self {
            sequence: 0,
            kind: ResponseKind::NewConnection,
            body: i32::from(id).to_be_bytes().to_vec(),
        }
    }

    /// Announcement of a torn down connection.
    #[must_use]
    pub fn end_of_connection(id: ConnectionId) -> Self {
        Self {
            sequence: 0,
            kind: ResponseKind::EndOfConnection,
            body: i32::from(id).to_be_bytes().to_vec(),
        }
    }

    /// Data travelling between arbiters, and on to the controller.
    #[must_use]
    pub const fn read(sequence: u16, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            kind: ResponseKind::Read,
            body: payload,
        }
    }

    /// Result code or connection id carried by a non-data response.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        if self.kind == ResponseKind::Read {
            return None;
        }
        let bytes: [u8; 4] = self.body.as_slice().try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }

    /// Appends the untagged wire image used between arbiters.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        write_frame(
            out,
            self.sequence,
            self.kind.packet_id(),
            &[self.body.as_slice()],
        )
    }
}

/// A response labelled with the connection it originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResponse {
    /// Originating connection; [`ConnectionId::COMMAND`] for the arbiter itself.
    pub source: ConnectionId,
    /// The response.
    pub packet: ResponsePacket,
}

impl TaggedResponse {
    /// Labels `packet` with `source`.
    #[must_use]
    pub const fn new(source: ConnectionId, packet: ResponsePacket) -> Self {
        Self { source, packet }
    }

    /// Appends the controller-bound wire image to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        write_frame(
            out,
            self.packet.sequence,
            self.packet.kind.packet_id(),
            &[self.source.to_wire().as_slice(), self.packet.body.as_slice()],
        )
    }

    /// Parses a controller-bound frame.
    pub fn decode(frame: Frame) -> Result<Self, DecodeError> {
        let Frame {
            sequence,
            packet_id,
            payload,
        } = frame;
        let kind = ResponseKind::from_packet_id(packet_id)
            .ok_or(DecodeError::UnknownResponse { packet_id })?;
        let (source, body) =
            payload
                .split_first_chunk::<SOURCE_TAG_LEN>()
                .ok_or(DecodeError::Malformed {
                    packet_id,
                    sequence,
                    reason: "missing source tag",
                })?;
        Ok(Self {
            source: ConnectionId::from_wire(*source),
            packet: ResponsePacket {
                sequence,
                kind,
                body: body.to_vec(),
            },
        })
    }
}

/// Any packet the arbiter can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A command; honoured only on the command connection.
    Command(CommandPacket),
    /// A response-typed packet; forwarded only from remote peers.
    Response(ResponsePacket),
}

impl Packet {
    /// Interprets a frame received by the arbiter.
    ///
    /// Returns `Ok(None)` for packet ids this revision does not define,
    /// including the reserved status command.
    pub fn decode(frame: Frame) -> Result<Option<Self>, DecodeError> {
        if let Some(kind) = ResponseKind::from_packet_id(frame.packet_id) {
            return Ok(Some(Self::Response(ResponsePacket {
                sequence: frame.sequence,
                kind,
                body: frame.payload,
            })));
        }
        match frame.packet_id {
            ids::CONNECT | ids::DISCONNECT | ids::WRITE | ids::EXIT => {
                CommandPacket::decode(frame).map(|command| Some(Self::Command(command)))
            }
            _ => Ok(None),
        }
    }

    /// Appends the wire image of this packet as the arbiter would receive it.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            Self::Command(command) => command.encode_into(out),
            Self::Response(response) => response.encode_into(out),
        }
    }
}
