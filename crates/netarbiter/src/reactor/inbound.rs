//! Accepting peers and reading frames.

use std::collections::VecDeque;
use std::io;

use tracing::{debug, info, warn};

use super::{READ_BUDGET, REACTOR_TARGET, Reactor};
use crate::connection::{CloseReason, Connection, ConnectionOrigin, ReadOutcome};
use crate::handshake;
use crate::protocol::{
    CommandPacket, ConnectionId, ErrorCode, Frame, FrameEvent, MAX_FORWARDED_PAYLOAD, Packet,
    ResponseKind, ResponsePacket, ids,
};

impl Reactor {
    /// Accepts every pending peer, admitting those that pass the handshake.
    pub(super) fn accept_peers(&mut self) {
        let budget = self.registry.timing().handshake_timeout();
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            let (mut stream, address) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    warn!(target: REACTOR_TARGET, %error, "failed to accept peer");
                    return;
                }
            };
            if let Err(error) = handshake::respond(&mut stream, budget) {
                info!(target: REACTOR_TARGET, peer = %address, %error, "refusing peer");
                continue;
            }
            match self.registry.register(ConnectionOrigin::Inbound, stream) {
                Ok(id) => self
                    .registry
                    .notify_controller(ResponsePacket::new_connection(id)),
                Err(error) => {
                    warn!(target: REACTOR_TARGET, peer = %address, %error, "failed to register peer");
                }
            }
        }
    }

    /// Reads a readable socket up to the read budget and routes every
    /// complete frame.
    ///
    /// A socket whose reads are paused by backpressure, or whose budget ran
    /// out, is marked for a later pass.
    pub(super) fn read_from(&mut self, id: ConnectionId) {
        let now = self.registry.now();
        let paused = self.registry.reads_paused(id);
        let Some(connection) = self.registry.get_mut(id) else {
            return;
        };
        if connection.is_closed() {
            return;
        }
        if paused {
            connection.defer_read();
            return;
        }
        let ending = match connection.fill(&mut self.scratch, READ_BUDGET) {
            Ok((received, outcome)) => {
                if received > 0 {
                    connection.mark_received(now);
                }
                match outcome {
                    ReadOutcome::Drained => None,
                    ReadOutcome::Throttled => {
                        connection.defer_read();
                        None
                    }
                    ReadOutcome::EndOfStream => Some(CloseReason::PeerClosed),
                }
            }
            Err(error) => {
                warn!(target: REACTOR_TARGET, connection = %id, %error, "read failed");
                Some(CloseReason::IoFailure)
            }
        };
        settle(connection, ending, &mut self.commands);
    }
}

/// Routes every complete frame already buffered, then closes the connection
/// with `ending`, if any.
fn settle(
    connection: &mut Connection,
    ending: Option<CloseReason>,
    commands: &mut VecDeque<CommandPacket>,
) {
    loop {
        match connection.next_frame() {
            Ok(None) => break,
            Ok(Some(FrameEvent::Heartbeat)) => {}
            Ok(Some(FrameEvent::Frame(frame))) => {
                if let Some(reason) = route(connection, frame, commands) {
                    connection.close(reason);
                    return;
                }
            }
            Err(error) => {
                warn!(
                    target: REACTOR_TARGET,
                    connection = %connection.id(),
                    %error,
                    "stream desynchronised"
                );
                connection.close(CloseReason::ProtocolViolation);
                return;
            }
        }
    }
    if let Some(reason) = ending {
        connection.close(reason);
    }
}

/// Sends a frame where it belongs: commands from the controller to the
/// dispatch queue, peer data to the peer's response queue.
///
/// Returns a reason when the frame condemns its connection.
fn route(
    connection: &mut Connection,
    frame: Frame,
    commands: &mut VecDeque<CommandPacket>,
) -> Option<CloseReason> {
    let id = connection.id();
    let packet_id = frame.packet_id;
    let packet = match Packet::decode(frame) {
        Ok(Some(packet)) => packet,
        Ok(None) if packet_id == ids::STATUS && id.is_command() => {
            debug!(target: REACTOR_TARGET, "status requests are not implemented; ignoring");
            return None;
        }
        Ok(None) => {
            debug!(
                target: REACTOR_TARGET,
                connection = %id,
                packet_id = %char::from(packet_id),
                "dropping unknown packet"
            );
            return None;
        }
        Err(error) => {
            warn!(target: REACTOR_TARGET, connection = %id, %error, "dropping malformed packet");
            if id.is_command()
                && let Some(sequence) = error.sequence()
            {
                connection.queue_response(ResponsePacket::command_end(
                    sequence,
                    ErrorCode::Unknown.value(),
                ));
            }
            return None;
        }
    };
    match packet {
        Packet::Command(command) if id.is_command() => commands.push_back(command),
        Packet::Response(response) if id.is_remote() && response.kind == ResponseKind::Read => {
            if response.body.len() > MAX_FORWARDED_PAYLOAD {
                warn!(
                    target: REACTOR_TARGET,
                    connection = %id,
                    length = response.body.len(),
                    "peer data too large to forward"
                );
                return Some(CloseReason::ProtocolViolation);
            }
            connection.queue_response(response);
        }
        Packet::Command(_) | Packet::Response(_) => {
            debug!(
                target: REACTOR_TARGET,
                connection = %id,
                packet_id = %char::from(packet_id),
                "dropping packet not valid on this connection"
            );
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Instant;

    use mio::net::TcpStream;

    use std::io::Write;

    use super::*;
    use crate::protocol::Command;

    fn connection(id: ConnectionId) -> (Connection, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let client =
            std::net::TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (server, _) = listener.accept().expect("accept");
        server.set_nonblocking(true).expect("nonblocking");
        let origin = if id.is_command() {
            ConnectionOrigin::Controller
        } else {
            ConnectionOrigin::Inbound
        };
        (
            Connection::new(id, origin, TcpStream::from_std(server), Instant::now()),
            client,
        )
    }

    fn staged_responses(connection: &mut Connection) -> Vec<u8> {
        let mut out = Vec::new();
        assert!(connection.stage_responses_into(&mut out).is_empty());
        out
    }

    #[test]
    fn controller_commands_reach_the_dispatch_queue() {
        let (mut controller, _client) = connection(ConnectionId::COMMAND);
        let mut commands = VecDeque::new();
        let verdict = route(
            &mut controller,
            Frame::new(8, ids::EXIT, Vec::new()),
            &mut commands,
        );
        assert_eq!(verdict, None);
        assert_eq!(commands, VecDeque::from([CommandPacket::new(8, Command::Exit)]));
    }

    #[test]
    fn malformed_commands_are_answered_with_unknown_error() {
        let (mut controller, _client) = connection(ConnectionId::COMMAND);
        let mut commands = VecDeque::new();
        route(
            &mut controller,
            Frame::new(12, ids::DISCONNECT, vec![1]),
            &mut commands,
        );
        assert!(commands.is_empty());
        assert_eq!(
            staged_responses(&mut controller),
            vec![0, 11, 0, 12, b'E', 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn peer_commands_are_ignored() {
        let (mut peer, _client) = connection(ConnectionId::from_raw(0));
        let mut commands = VecDeque::new();
        let verdict = route(&mut peer, Frame::new(1, ids::EXIT, Vec::new()), &mut commands);
        assert_eq!(verdict, None);
        assert!(commands.is_empty());
        assert!(!peer.has_queued());
    }

    #[test]
    fn peer_data_is_queued_for_the_controller() {
        let (mut peer, _client) = connection(ConnectionId::from_raw(3));
        let mut commands = VecDeque::new();
        route(&mut peer, Frame::new(5, ids::READ, b"hi".to_vec()), &mut commands);
        assert_eq!(
            staged_responses(&mut peer),
            vec![0, 9, 0, 5, b'R', 0, 3, b'h', b'i']
        );
    }

    #[test]
    fn oversized_peer_data_is_a_protocol_violation() {
        let (mut peer, _client) = connection(ConnectionId::from_raw(0));
        let mut commands = VecDeque::new();
        let verdict = route(
            &mut peer,
            Frame::new(0, ids::READ, vec![0; MAX_FORWARDED_PAYLOAD + 1]),
            &mut commands,
        );
        assert_eq!(verdict, Some(CloseReason::ProtocolViolation));
        assert!(!peer.has_queued());
    }

    #[test]
    fn status_requests_get_no_response() {
        let (mut controller, _client) = connection(ConnectionId::COMMAND);
        let mut commands = VecDeque::new();
        let verdict = route(
            &mut controller,
            Frame::new(3, ids::STATUS, Vec::new()),
            &mut commands,
        );
        assert_eq!(verdict, None);
        assert!(commands.is_empty());
        assert!(!controller.has_queued());
    }

    #[test]
    fn frames_read_before_a_failure_are_still_routed() {
        let (mut controller, mut client) = connection(ConnectionId::COMMAND);
        let mut bytes = Vec::new();
        CommandPacket::new(4, Command::Disconnect {
            id: ConnectionId::from_raw(1),
        })
        .encode_into(&mut bytes)
        .expect("encode");
        CommandPacket::new(5, Command::Exit)
            .encode_into(&mut bytes)
            .expect("encode");
        client.write_all(&bytes).expect("send");
        let mut scratch = [0_u8; 64];
        let mut received = 0;
        while received < bytes.len() {
            let (count, _) = controller.fill(&mut scratch, usize::MAX).expect("read");
            received += count;
        }

        let mut commands = VecDeque::new();
        settle(&mut controller, Some(CloseReason::IoFailure), &mut commands);

        assert_eq!(commands.len(), 2);
        assert_eq!(controller.close_reason(), Some(CloseReason::IoFailure));
    }

    #[test]
    fn desynchronised_streams_are_protocol_violations() {
        let (mut peer, mut client) = connection(ConnectionId::from_raw(0));
        client.write_all(&[0, 3, 0]).expect("send");
        let mut scratch = [0_u8; 16];
        while peer.fill(&mut scratch, usize::MAX).expect("read").0 == 0 {}

        let mut commands = VecDeque::new();
        settle(&mut peer, Some(CloseReason::PeerClosed), &mut commands);

        assert_eq!(peer.close_reason(), Some(CloseReason::ProtocolViolation));
    }

    #[test]
    fn controller_data_frames_are_ignored() {
        let (mut controller, _client) = connection(ConnectionId::COMMAND);
        let mut commands = VecDeque::new();
        route(
            &mut controller,
            Frame::new(0, ids::READ, vec![1]),
            &mut commands,
        );
        assert!(!controller.has_queued());
    }
}
