//! Length-prefixed frame layout.
//!
//! ```text
//! | 0   | 1   | 2   | 3   | 4   | 5 ..          |
//! |  length   | sequence  | id  | payload ...   |
//! ```
//!
//! `length` counts the whole frame, header included, in network byte order.
//! A length of zero is a heartbeat: only the two length bytes are sent.

use super::errors::{EncodeError, FramingError};

/// Size of the length prefix.
pub const LENGTH_LEN: usize = 2;

/// Size of the fixed header: length, sequence, and packet id.
pub const HEADER_LEN: usize = 5;

/// Largest frame the 2-byte length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Wire image of a heartbeat.
pub const HEARTBEAT: [u8; LENGTH_LEN] = [0, 0];

/// A complete, non-heartbeat frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number passed through from the sender.
    pub sequence: u16,
    /// One-byte packet id selecting the packet variant.
    pub packet_id: u8,
    /// Bytes following the header.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame from its parts.
    #[must_use]
    pub const fn new(sequence: u16, packet_id: u8, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            packet_id,
            payload,
        }
    }

    /// Appends the wire image of this frame to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        write_frame(out, self.sequence, self.packet_id, &[self.payload.as_slice()])
    }
}

/// One unit extracted from a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A zero-length keep-alive.
    Heartbeat,
    /// A frame carrying a packet.
    Frame(Frame),
}

/// Reads the declared length of the next frame, if its prefix is buffered.
pub(crate) fn declared_length(bytes: &[u8]) -> Option<usize> {
    bytes
        .first_chunk::<LENGTH_LEN>()
        .map(|prefix| usize::from(u16::from_be_bytes(*prefix)))
}

/// Extracts the first complete frame from `bytes`.
///
/// Returns the event together with the number of bytes it occupied, or `None`
/// when more bytes are needed.
pub(crate) fn peek_frame(bytes: &[u8]) -> Result<Option<(FrameEvent, usize)>, FramingError> {
    let Some(length) = declared_length(bytes) else {
        return Ok(None);
    };
    if length == 0 {
        return Ok(Some((FrameEvent::Heartbeat, LENGTH_LEN)));
    }
    if length < HEADER_LEN {
        return Err(FramingError::ShortFrame { length });
    }
    let Some((header, payload)) = bytes
        .get(..length)
        .and_then(|frame| frame.split_first_chunk::<HEADER_LEN>())
    else {
        return Ok(None);
    };
    let [_, _, sequence_high, sequence_low, packet_id] = *header;
    let frame = Frame {
        sequence: u16::from_be_bytes([sequence_high, sequence_low]),
        packet_id,
        payload: payload.to_vec(),
    };
    Ok(Some((FrameEvent::Frame(frame), length)))
}

/// Appends a frame assembled from `parts` to `out`.
///
/// Nothing is written when the frame would not fit the length field.
pub(crate) fn write_frame(
    out: &mut Vec<u8>,
    sequence: u16,
    packet_id: u8,
    parts: &[&[u8]],
) -> Result<(), EncodeError> {
    let length = HEADER_LEN + parts.iter().map(|part| part.len()).sum::<usize>();
    let wire_length = u16::try_from(length).map_err(|_| EncodeError::FrameTooLarge { length })?;
    out.reserve(length);
    out.extend_from_slice(&wire_length.to_be_bytes());
    out.extend_from_slice(&sequence.to_be_bytes());
    out.push(packet_id);
    for part in parts {
        out.extend_from_slice(part);
    }
    Ok(())
}
