//! Error types for frame parsing and packet encoding.

use thiserror::Error;

/// The byte stream can no longer be split into frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// A non-zero length smaller than the fixed header.
    #[error("declared frame length {length} is shorter than the 5-byte header")]
    ShortFrame {
        /// Length read from the wire.
        length: usize,
    },
}

/// A complete frame whose contents do not form a valid packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload does not match the layout required by its packet id.
    #[error("malformed '{}' packet (sequence {sequence}): {reason}", char::from(*packet_id))]
    Malformed {
        /// Packet id of the offending frame.
        packet_id: u8,
        /// Sequence number carried by the offending frame.
        sequence: u16,
        /// Which part of the layout was violated.
        reason: &'static str,
    },
    /// A controller-bound frame carried an id that is not a response.
    #[error("unknown response id '{}'", char::from(*packet_id))]
    UnknownResponse {
        /// Packet id of the offending frame.
        packet_id: u8,
    },
}

impl DecodeError {
    /// Sequence number of the command that failed to decode, if known.
    #[must_use]
    pub const fn sequence(&self) -> Option<u16> {
        match self {
            Self::Malformed { sequence, .. } => Some(*sequence),
            Self::UnknownResponse { .. } => None,
        }
    }
}

/// A packet that cannot be represented on the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The encoded frame would overflow the 2-byte length field.
    #[error("frame of {length} bytes exceeds the maximum frame length")]
    FrameTooLarge {
        /// Length the frame would have had.
        length: usize,
    },
    /// The host name does not fit the 1-byte length field.
    #[error("host name of {length} bytes exceeds 255 bytes")]
    HostTooLong {
        /// Length of the rejected host name.
        length: usize,
    },
}
