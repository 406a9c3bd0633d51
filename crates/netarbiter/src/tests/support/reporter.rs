//! Test double for [`HealthReporter`] that records structured events for
//! assertions.

use std::net::SocketAddr;
use std::sync::Mutex;

use netarbiter_config::Config;

use crate::bootstrap::BootstrapError;
use crate::connection::{CloseReason, ConnectionOrigin};
use crate::health::HealthReporter;
use crate::protocol::ConnectionId;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// The controller was registered.
    ControllerAttached,
    /// A remote connection was registered.
    ConnectionOpened {
        id: ConnectionId,
        origin: ConnectionOrigin,
    },
    /// A connection was released.
    ConnectionClosed { id: ConnectionId, reason: CloseReason },
    /// The reactor stopped.
    ArbiterStopped,
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Close events recorded for `id`.
    #[must_use]
    pub fn closures_of(&self, id: ConnectionId) -> Vec<CloseReason> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::ConnectionClosed { id: closed, reason } if closed == id => {
                    Some(reason)
                }
                _ => None,
            })
            .collect()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn controller_attached(&self, _peer: Option<SocketAddr>) {
        self.record(HealthEvent::ControllerAttached);
    }

    fn connection_opened(
        &self,
        id: ConnectionId,
        origin: ConnectionOrigin,
        _peer: Option<SocketAddr>,
    ) {
        self.record(HealthEvent::ConnectionOpened { id, origin });
    }

    fn connection_closed(&self, id: ConnectionId, reason: CloseReason) {
        self.record(HealthEvent::ConnectionClosed { id, reason });
    }

    fn arbiter_stopped(&self) {
        self.record(HealthEvent::ArbiterStopped);
    }
}
