//! Binary protocol spoken between the controller, the arbiter, and peers.
//!
//! Every unit on the wire is a length-prefixed [`Frame`]. The controller sends
//! command frames and receives [`TaggedResponse`] frames labelled with their
//! originating connection; arbiters exchange untagged `'R'` frames carrying
//! application data. Zero-length frames are heartbeats. All integers are
//! big-endian.

mod buffer;
mod connection_id;
mod errors;
mod frame;
mod packet;

pub use buffer::{DEFAULT_READ_CAPACITY, FrameBuffer, SHRINK_THRESHOLD};
pub use connection_id::ConnectionId;
pub use errors::{DecodeError, EncodeError, FramingError};
pub use frame::{Frame, FrameEvent, HEADER_LEN, HEARTBEAT, LENGTH_LEN, MAX_FRAME_LEN};
pub use packet::{
    Command, CommandPacket, MAX_FORWARDED_PAYLOAD, Packet, ResponseKind, ResponsePacket,
    SOURCE_TAG_LEN, TaggedResponse,
};

/// Bytes a connecting peer sends first.
pub const CLIENT_MAGIC: [u8; 2] = *b"NA";

/// Bytes an accepting arbiter answers with.
pub const SERVER_MAGIC: [u8; 2] = *b"AN";

/// Packet ids.
pub mod ids {
    /// Connect command.
    pub const CONNECT: u8 = b'C';
    /// Disconnect command.
    pub const DISCONNECT: u8 = b'D';
    /// Reserved status command; not implemented.
    pub const STATUS: u8 = b'S';
    /// Write command.
    pub const WRITE: u8 = b'W';
    /// Exit command.
    pub const EXIT: u8 = b'X';
    /// Data between arbiters, forwarded to the controller.
    pub const READ: u8 = b'R';
    /// Command completion.
    pub const COMMAND_END: u8 = b'E';
    /// Connection torn down.
    pub const END_OF_CONNECTION: u8 = b'F';
    /// Inbound peer accepted.
    pub const NEW_CONNECTION: u8 = b'N';
}

/// Result codes carried by `'E'` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The command succeeded.
    None,
    /// An unclassified failure.
    Unknown,
    /// The connection id is not registered or already closed.
    InvalidId,
    /// The peer refused the connection or failed the handshake.
    ConnectionRefused,
    /// The host name could not be resolved.
    BadAddress,
}

impl ErrorCode {
    /// Wire value of the code.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Unknown => -1,
            Self::InvalidId => -2,
            Self::ConnectionRefused => -3,
            Self::BadAddress => -4,
        }
    }
}

/// Decodes a buffer holding exactly one frame.
///
/// Returns `Ok(None)` for heartbeats and for packet ids this revision does not
/// define. Framing problems, including trailing or missing bytes, surface as
/// [`FrameDecodeError`].
pub fn decode_frame(bytes: &[u8]) -> Result<Option<Packet>, FrameDecodeError> {
    match frame::peek_frame(bytes)? {
        Some((event, consumed)) if consumed == bytes.len() => match event {
            FrameEvent::Heartbeat => Ok(None),
            FrameEvent::Frame(frame) => Ok(Packet::decode(frame)?),
        },
        Some(_) | None => Err(FrameDecodeError::Length {
            buffered: bytes.len(),
        }),
    }
}

/// Errors returned by [`decode_frame`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
    /// The length prefix is unusable.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// The buffer does not hold exactly one frame.
    #[error("buffer of {buffered} bytes does not hold exactly one frame")]
    Length {
        /// Bytes supplied.
        buffered: usize,
    },
    /// The frame does not form a valid packet.
    #[error(transparent)]
    Packet(#[from] DecodeError),
}
