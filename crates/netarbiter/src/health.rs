//! Structured health reporting for arbiter lifecycle events.

use std::net::SocketAddr;
use std::sync::Arc;

use netarbiter_config::Config;

use crate::bootstrap::BootstrapError;
use crate::connection::{CloseReason, ConnectionOrigin};
use crate::protocol::ConnectionId;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked once both listeners are bound.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked when the controller's command connection is registered.
    fn controller_attached(&self, peer: Option<SocketAddr>);

    /// Invoked when a remote peer completes its handshake and is registered.
    fn connection_opened(
        &self,
        id: ConnectionId,
        origin: ConnectionOrigin,
        peer: Option<SocketAddr>,
    );

    /// Invoked when a connection is torn down and its id released.
    fn connection_closed(&self, id: ConnectionId, reason: CloseReason);

    /// Invoked after the reactor has stopped and every socket is closed.
    fn arbiter_stopped(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn controller_attached(&self, peer: Option<SocketAddr>) {
        (**self).controller_attached(peer);
    }

    fn connection_opened(
        &self,
        id: ConnectionId,
        origin: ConnectionOrigin,
        peer: Option<SocketAddr>,
    ) {
        (**self).connection_opened(id, origin, peer);
    }

    fn connection_closed(&self, id: ConnectionId, reason: CloseReason) {
        (**self).connection_closed(id, reason);
    }

    fn arbiter_stopped(&self) {
        (**self).arbiter_stopped();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting arbiter bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            endpoint_port = config.endpoint_port(),
            listen_port = ?config.listen_port(),
            bind_host = %config.bind_host(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "arbiter bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "arbiter bootstrap failed"
        );
    }

    fn controller_attached(&self, peer: Option<SocketAddr>) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "controller_attached",
            peer = ?peer,
            "controller connected"
        );
    }

    fn connection_opened(
        &self,
        id: ConnectionId,
        origin: ConnectionOrigin,
        peer: Option<SocketAddr>,
    ) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_opened",
            connection = %id,
            origin = %origin,
            peer = ?peer,
            "remote connection registered"
        );
    }

    fn connection_closed(&self, id: ConnectionId, reason: CloseReason) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_closed",
            connection = %id,
            reason = %reason,
            "connection closed"
        );
    }

    fn arbiter_stopped(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "arbiter_stopped",
            "arbiter stopped"
        );
    }
}
