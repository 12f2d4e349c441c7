//! Structured telemetry initialisation for the server.

use std::fs;
use std::io::{self, IsTerminal};
use std::sync::{Mutex, PoisonError};

use analysis_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter, writer::MakeWriterExt};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();
static FILE_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

const LOG_FILE_PREFIX: &str = "analysisd.log";

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// The log directory could not be created.
    #[error("failed to create log directory '{path}': {source}")]
    LogDirectory {
        /// Configured directory.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Later calls return a fresh handle without touching the global state. When
/// the configuration names a log directory, events are also written to a
/// daily file there through a non-blocking writer; [`flush`] drains it.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

/// Flushes and closes the file log sink, if one is open.
pub fn flush() {
    let guard = FILE_GUARD
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    drop(guard);
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let subscriber = match config.log_directory() {
        Some(directory) => {
            fs::create_dir_all(directory).map_err(|source| TelemetryError::LogDirectory {
                path: directory.to_string(),
                source,
            })?;
            let (file_writer, guard) =
                non_blocking(rolling::daily(directory.as_std_path(), LOG_FILE_PREFIX));
            *FILE_GUARD.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);
            build_subscriber(filter, config.log_format(), false, io::stderr.and(file_writer))
        }
        None => build_subscriber(
            filter,
            config.log_format(),
            io::stderr().is_terminal(),
            io::stderr,
        ),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn build_subscriber<W>(
    filter: EnvFilter,
    format: LogFormat,
    ansi: bool,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    }
}
