//! A live arbiter on a background thread with a connected controller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use netarbiter_config::Config;

use super::controller::ControllerClient;
use super::reporter::RecordingHealthReporter;
use crate::bootstrap::{StaticConfigLoader, bootstrap_with};
use crate::health::HealthReporter;
use crate::reactor::RunError;

/// Heartbeat interval used by scenario arbiters.
pub const TEST_HEARTBEAT: Duration = Duration::from_millis(50);

/// Liveness timeout used by scenario arbiters.
pub const TEST_LIVENESS: Duration = Duration::from_millis(400);

/// Loopback configuration with short timing budgets.
pub fn test_config(listen_port: Option<u16>) -> Config {
    Config {
        listen_port,
        heartbeat_interval_ms: 50,
        liveness_timeout_ms: 400,
        handshake_timeout_ms: 500,
        connect_timeout_ms: 1_000,
        ..Config::default()
    }
}

/// Running arbiter plus the controller attached to it.
pub struct Harness {
    /// The controller's end of the command connection.
    pub controller: ControllerClient,
    /// Health events recorded by the arbiter.
    pub reporter: Arc<RecordingHealthReporter>,
    peer_addr: Option<SocketAddr>,
    runner: Option<JoinHandle<Result<(), RunError>>>,
}

impl Harness {
    /// Outbound-only arbiter.
    pub fn start() -> Self {
        Self::launch(None)
    }

    /// Arbiter that also accepts remote peers on an ephemeral port.
    pub fn accepting_peers() -> Self {
        Self::launch(Some(0))
    }

    fn launch(listen_port: Option<u16>) -> Self {
        let reporter = Arc::new(RecordingHealthReporter::default());
        let loader = StaticConfigLoader::new(test_config(listen_port));
        let shared: Arc<dyn HealthReporter> = Arc::clone(&reporter) as Arc<dyn HealthReporter>;
        let arbiter = bootstrap_with(&loader, shared).expect("bootstrap");
        let endpoint = arbiter.endpoint_addr().expect("endpoint address");
        let peer_addr = arbiter.peer_addr();
        let runner = thread::spawn(move || arbiter.run());
        let controller = ControllerClient::connect(endpoint);
        Self {
            controller,
            reporter,
            peer_addr,
            runner: Some(runner),
        }
    }

    /// Address remote peers dial.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr.expect("arbiter accepts peers")
    }

    /// Waits for the arbiter thread to finish on its own.
    pub fn join(mut self) -> Result<(), RunError> {
        self.runner
            .take()
            .expect("arbiter still running")
            .join()
            .expect("arbiter thread panicked")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            self.controller.hang_up();
            drop(runner.join());
        }
    }
}
