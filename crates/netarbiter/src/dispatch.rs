//! Execution of controller commands.
//!
//! Each [`Command`] variant maps onto one [`ArbiterControl`] operation. Every
//! command yields exactly one `'E'` response echoing its sequence; failures
//! are reported through the response code and never abort the reactor.

use tracing::{debug, warn};

use crate::errors::ArbiterError;
use crate::protocol::{Command, CommandPacket, ConnectionId, ErrorCode, ResponsePacket};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Arbiter state as seen by command execution.
pub(crate) trait ArbiterControl {
    /// Opens and registers an outbound connection.
    fn connect(&mut self, host: &str, port: u16) -> Result<ConnectionId, ArbiterError>;

    /// Marks a remote connection closed.
    fn disconnect(&mut self, id: ConnectionId) -> Result<(), ArbiterError>;

    /// Queues a payload for a remote connection without performing I/O.
    fn write(&mut self, id: ConnectionId, sequence: u16, payload: Vec<u8>)
    -> Result<(), ArbiterError>;

    /// Closes the command connection, stopping the reactor after this
    /// iteration.
    fn exit(&mut self);
}

/// Runs `packet` against `control` and builds its completion response.
pub(crate) fn execute<C>(packet: CommandPacket, control: &mut C) -> ResponsePacket
where
    C: ArbiterControl + ?Sized,
{
    let CommandPacket { sequence, command } = packet;
    let name = command_name(&command);
    let outcome = match command {
        Command::Connect { host, port } => control.connect(&host, port).map(i32::from),
        Command::Disconnect { id } => control.disconnect(id).map(|()| ErrorCode::None.value()),
        Command::Write { id, payload } => control
            .write(id, sequence, payload)
            .map(|()| ErrorCode::None.value()),
        Command::Exit => {
            control.exit();
            Ok(ErrorCode::None.value())
        }
    };
    let code = match outcome {
        Ok(code) => {
            debug!(target: DISPATCH_TARGET, command = name, sequence, code, "command completed");
            code
        }
        Err(error) => {
            warn!(
                target: DISPATCH_TARGET,
                command = name,
                sequence,
                code = error.code().value(),
                %error,
                "command failed"
            );
            error.code().value()
        }
    };
    ResponsePacket::command_end(sequence, code)
}

const fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Connect { .. } => "connect",
        Command::Disconnect { .. } => "disconnect",
        Command::Write { .. } => "write",
        Command::Exit => "exit",
    }
}
