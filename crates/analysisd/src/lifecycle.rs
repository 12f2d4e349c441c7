//! Structured reporting of server lifecycle milestones.

use std::sync::Arc;

use analysis_config::Config;

use crate::server::{ServerError, ServerState};

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Observer notified as the server starts and stops.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before the listener is bound.
    fn server_starting(&self, config: &Config);

    /// Invoked once the listener accepts connections.
    fn server_started(&self, endpoint: &str);

    /// Invoked when startup fails.
    fn start_failed(&self, error: &ServerError);

    /// Invoked when a stop sequence begins.
    fn server_stopping(&self, restart: bool, exit_process: bool);

    /// Invoked when the stop sequence reaches `state`.
    fn server_stopped(&self, state: ServerState, drained: bool);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter,
{
    fn server_starting(&self, config: &Config) {
        (**self).server_starting(config);
    }

    fn server_started(&self, endpoint: &str) {
        (**self).server_started(endpoint);
    }

    fn start_failed(&self, error: &ServerError) {
        (**self).start_failed(error);
    }

    fn server_stopping(&self, restart: bool, exit_process: bool) {
        (**self).server_stopping(restart, exit_process);
    }

    fn server_stopped(&self, state: ServerState, drained: bool) {
        (**self).server_stopped(state, drained);
    }
}

/// Reporter that records milestones using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn server_starting(&self, config: &Config) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "server_starting",
            socket = %config.listen_socket(),
            statistics = config.collect_statistics,
            scheduled_stop = config.scheduled_stop,
            "starting analysis server"
        );
    }

    fn server_started(&self, endpoint: &str) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "server_started",
            endpoint,
            "analysis server started"
        );
    }

    fn start_failed(&self, error: &ServerError) {
        tracing::error!(
            target: LIFECYCLE_TARGET,
            event = "start_failed",
            error = %error,
            "analysis server failed to start"
        );
    }

    fn server_stopping(&self, restart: bool, exit_process: bool) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "server_stopping",
            restart,
            exit_process,
            "stopping analysis server"
        );
    }

    fn server_stopped(&self, state: ServerState, drained: bool) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "server_stopped",
            state = %state,
            drained,
            "analysis server stopped"
        );
    }
}
