//! Shared fixtures for in-crate tests.

mod controller;
mod harness;
mod peer;
mod reporter;

pub use harness::{Harness, TEST_HEARTBEAT, TEST_LIVENESS, test_config};
pub use peer::{FakeArbiter, RemotePeer};
pub use reporter::{HealthEvent, RecordingHealthReporter};
