//! Connection identifiers as they appear on the wire.

use std::fmt;

/// Identifier of a registered connection.
///
/// `-1` is reserved for the controller's command connection; remote peers use
/// non-negative ids. Ids are recycled once a connection has been fully torn
/// down, so an id names a connection only for that connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(i16);

impl ConnectionId {
    /// The single command connection.
    pub const COMMAND: Self = Self(-1);

    /// Wraps a raw wire value without validation.
    #[must_use]
    pub const fn from_raw(raw: i16) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    #[must_use]
    pub const fn get(self) -> i16 {
        self.0
    }

    /// Whether this id names the command connection.
    #[must_use]
    pub const fn is_command(self) -> bool {
        self.0 == Self::COMMAND.0
    }

    /// Whether this id could name a remote peer.
    #[must_use]
    pub const fn is_remote(self) -> bool {
        self.0 >= 0
    }

    /// Network-order encoding used in command payloads and response tags.
    #[must_use]
    pub const fn to_wire(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Decodes a network-order id.
    #[must_use]
    pub const fn from_wire(bytes: [u8; 2]) -> Self {
        Self(i16::from_be_bytes(bytes))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_command() {
            formatter.write_str("command")
        } else {
            write!(formatter, "#{}", self.0)
        }
    }
}

impl From<ConnectionId> for i32 {
    fn from(id: ConnectionId) -> Self {
        Self::from(id.0)
    }
}
