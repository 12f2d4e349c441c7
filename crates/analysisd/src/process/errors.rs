//! Errors surfaced while launching the server process.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

use crate::console::ConsoleError;
use crate::server::ServerError;
use crate::telemetry::TelemetryError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The server did not start.
    #[error("server failed to start: {source}")]
    Server {
        /// Underlying startup error.
        #[source]
        source: ServerError,
    },
    /// Signal handling could not be set up.
    #[error("failed to watch shutdown signals: {source}")]
    Shutdown {
        /// Underlying signal error.
        #[source]
        source: ShutdownError,
    },
    /// The admin console failed.
    #[error("admin console failed: {source}")]
    Console {
        /// Underlying console error.
        #[source]
        source: ConsoleError,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<ServerError> for LaunchError {
    fn from(source: ServerError) -> Self {
        Self::Server { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<ConsoleError> for LaunchError {
    fn from(source: ConsoleError) -> Self {
        Self::Console { source }
    }
}
