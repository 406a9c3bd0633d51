//! Heartbeats, response multiplexing, write-back, and cleanup.

use tracing::warn;

use super::{REACTOR_TARGET, Reactor};
use crate::connection::CloseReason;
use crate::protocol::{ConnectionId, ResponsePacket};

impl Reactor {
    /// Stages heartbeats, responses, and writes, then flushes every socket.
    ///
    /// Responses from all connections are encoded into one buffer before it
    /// is appended to the command connection, so frames from different
    /// sources are whole and adjacent on the controller's stream.
    pub(super) fn drain_outbound(&mut self) {
        let now = self.registry.now();
        let interval = self.registry.timing().heartbeat_interval();
        let mut tagged = Vec::new();
        for connection in self.registry.connections_mut() {
            if connection.id().is_remote()
                && !connection.is_closed()
                && connection.heartbeat_due(now, interval)
            {
                connection.stage_heartbeat(now);
            }
            for error in connection.stage_responses_into(&mut tagged) {
                warn!(target: REACTOR_TARGET, connection = %connection.id(), %error, "dropping response");
            }
            for error in connection.stage_writes() {
                warn!(target: REACTOR_TARGET, connection = %connection.id(), %error, "dropping write");
            }
        }
        if !tagged.is_empty()
            && let Some(command) = self.registry.get_mut(ConnectionId::COMMAND)
        {
            command.stage_bytes(&tagged);
        }
        for connection in self.registry.connections_mut() {
            if !connection.has_pending_output() {
                continue;
            }
            if let Err(error) = connection.flush()
                && connection.close(CloseReason::IoFailure)
            {
                warn!(target: REACTOR_TARGET, connection = %connection.id(), %error, "write failed");
            }
        }
    }

    /// Releases every closed connection, announcing remote ones to the
    /// controller.
    pub(super) fn cleanup(&mut self) {
        for connection in self.registry.prune_closed() {
            let id = connection.id();
            self.registry.release(connection);
            if id.is_remote() {
                self.registry
                    .notify_controller(ResponsePacket::end_of_connection(id));
            }
        }
    }
}
