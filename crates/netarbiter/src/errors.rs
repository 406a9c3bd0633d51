//! Failures of controller commands and how they appear on the wire.

use std::io;

use thiserror::Error;

use crate::handshake::HandshakeError;
use crate::protocol::{ConnectionId, ErrorCode};
use crate::registry::RegistryError;

/// A command that could not be carried out.
///
/// These never leave command execution: each becomes the code of an `'E'`
/// response so the controller can decide whether to retry.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// The host name did not resolve to any address.
    #[error("could not resolve {target}")]
    AddressUnresolved {
        /// The `host:port` pair requested.
        target: String,
        /// Resolver failure, when one was reported.
        #[source]
        source: Option<io::Error>,
    },
    /// The remote host refused or never answered the TCP connection.
    #[error("connection to {target} refused: {source}")]
    ConnectionRefused {
        /// The `host:port` pair requested.
        target: String,
        /// Socket error returned by the connect attempt.
        #[source]
        source: io::Error,
    },
    /// The remote host is not an arbiter, or did not answer in time.
    #[error("handshake with {target} failed: {source}")]
    HandshakeFailed {
        /// The `host:port` pair requested.
        target: String,
        /// How the exchange failed.
        #[source]
        source: HandshakeError,
    },
    /// The id does not name an open remote connection.
    #[error("connection {id} is not open")]
    InvalidConnectionId {
        /// The rejected id.
        id: ConnectionId,
    },
    /// Any other socket failure while connecting.
    #[error("connection to {target} failed: {source}")]
    Io {
        /// The `host:port` pair requested.
        target: String,
        /// Socket error.
        #[source]
        source: io::Error,
    },
    /// The new connection could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ArbiterError {
    /// Response code reported to the controller.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::AddressUnresolved { .. } => ErrorCode::BadAddress,
            Self::ConnectionRefused { .. } | Self::HandshakeFailed { .. } => {
                ErrorCode::ConnectionRefused
            }
            Self::InvalidConnectionId { .. } => ErrorCode::InvalidId,
            Self::Io { .. } | Self::Registry(_) => ErrorCode::Unknown,
        }
    }

    /// Classifies a failed TCP connect the way the controller expects.
    pub(crate) fn from_connect(target: String, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable => Self::ConnectionRefused { target, source },
            _ => Self::Io { target, source },
        }
    }
}
