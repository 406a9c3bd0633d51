//! Connection id allocation with LIFO reuse.

use crate::protocol::ConnectionId;

use super::RegistryError;

/// Which id space an allocation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionKind {
    /// The single command connection, always `-1`.
    Command,
    /// A remote peer, `0..=i16::MAX`.
    Remote,
}

/// Hands out connection ids, preferring the most recently freed one.
///
/// Reusing freed ids first keeps the live id range small; ids are therefore
/// not unique over the lifetime of the process.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    free: Vec<ConnectionId>,
    next: Option<i16>,
    command_allocated: bool,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            free: Vec::new(),
            next: Some(0),
            command_allocated: false,
        }
    }
}

impl IdAllocator {
    pub(crate) fn allocate(&mut self, kind: ConnectionKind) -> Result<ConnectionId, RegistryError> {
        match kind {
            ConnectionKind::Command => {
                if self.command_allocated {
                    return Err(RegistryError::DuplicateCommand);
                }
                self.command_allocated = true;
                Ok(ConnectionId::COMMAND)
            }
            ConnectionKind::Remote => {
                if let Some(id) = self.free.pop() {
                    return Ok(id);
                }
                let raw = self.next.ok_or(RegistryError::IdsExhausted)?;
                self.next = raw.checked_add(1);
                Ok(ConnectionId::from_raw(raw))
            }
        }
    }

    /// Returns an id to the pool once its connection is fully torn down.
    pub(crate) fn free(&mut self, id: ConnectionId) {
        if id.is_command() {
            self.command_allocated = false;
        } else if id.is_remote() {
            self.free.push(id);
        }
    }
}
