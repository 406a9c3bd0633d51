//! `netarbiter` daemon entry point.
//!
//! Parses the command line, binds the endpoint and optional peer listener,
//! then serves a single controller until it exits or disconnects.

use std::process::ExitCode;
use std::sync::Arc;

use netarbiter::{BootstrapError, StructuredHealthReporter, SystemConfigLoader, bootstrap_with};

fn main() -> ExitCode {
    let reporter = Arc::new(StructuredHealthReporter::new());
    let arbiter = match bootstrap_with(&SystemConfigLoader, reporter) {
        Ok(arbiter) => arbiter,
        Err(BootstrapError::Configuration { source }) => source.exit(),
        Err(_) => return ExitCode::FAILURE,
    };
    match arbiter.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(target: "netarbiter::main", %error, "arbiter stopped abnormally");
            ExitCode::FAILURE
        }
    }
}
