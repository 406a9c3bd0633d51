//! Connection-multiplexing network arbiter.
//!
//! A controller program that cannot drive many sockets itself connects to the
//! arbiter once and issues compact binary commands over that single stream:
//! open a connection to a remote arbiter, write to it, close it, or stop.
//! Everything the remote peers send back, and every connection that comes or
//! goes, is reported on the same stream as length-prefixed frames tagged with
//! the connection they came from.
//!
//! The crate is organised leaves first:
//!
//! - [`protocol`] frames, encodes, and decodes packets;
//! - the connection registry owns sockets, ids, and liveness state;
//! - command dispatch turns each command into registry operations and an
//!   `'E'` response;
//! - the reactor is a single-threaded [`mio`] loop that ties them together.
//!
//! [`bootstrap_with`] loads configuration, installs [`tracing`] telemetry, and
//! binds the listeners; [`Arbiter::run`] accepts the controller and drives the
//! reactor until the controller exits. Lifecycle events flow through a
//! [`HealthReporter`].

mod bootstrap;
mod connection;
mod dispatch;
mod errors;
mod handshake;
mod health;
pub mod protocol;
mod reactor;
mod registry;
mod telemetry;

pub use bootstrap::{
    Arbiter, BootstrapError, ConfigLoader, ListenerRole, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use connection::{CloseReason, ConnectionOrigin};
pub use errors::ArbiterError;
pub use handshake::HandshakeError;
pub use health::{HealthReporter, StructuredHealthReporter};
pub use reactor::RunError;
pub use registry::RegistryError;
pub use telemetry::TelemetryError;

#[cfg(test)]
mod tests;
