//! Termination signals.

use std::io;
use std::sync::Arc;
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{error, info};

use super::PROCESS_TARGET;
use crate::server::Server;

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The watcher thread could not be started.
    #[error("failed to start signal thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds a signal listener.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(target: PROCESS_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

/// Stops `server` and ends the process once `signal` fires.
pub(crate) fn watch<S>(server: Arc<Server>, signal: S) -> Result<(), ShutdownError>
where
    S: ShutdownSignal + 'static,
{
    thread::Builder::new()
        .name("analysisd-signals".to_owned())
        .spawn(move || match signal.wait() {
            Ok(()) => {
                server.stop(false, true);
            }
            Err(wait_error) => error!(
                target: PROCESS_TARGET,
                error = %wait_error,
                "signal watcher failed"
            ),
        })
        .map(drop)
        .map_err(|source| ShutdownError::Spawn { source })
}
