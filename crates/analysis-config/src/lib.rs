//! Layered configuration for the analysis server.
//!
//! Values resolve from built-in defaults, then a TOML configuration file,
//! then `ANALYSISD_*` environment variables, then command-line flags. The
//! daemon reads everything through [`Config`]; administrative tooling uses the
//! same type so both agree on listener addresses and secrets.

mod defaults;
mod logging;
mod socket;

use std::borrow::Cow;
use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::declarative::LayerComposition;
use ortho_config::serde_json::Value;
use ortho_config::{MergeLayer, MergeProvenance, OrthoConfig, OrthoResult};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_ADMIN_CIPHER_KEY, DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_ISAMI_COMMAND,
    DEFAULT_ISAMI_COMPLETION_TIMEOUT_SECS, DEFAULT_LOG_FILTER, DEFAULT_SAFE_COMMAND, DEFAULT_SCHEDULED_STOP_HOURS, DEFAULT_SHUTDOWN_GRACE_SECS,
    DEFAULT_STATISTICS_PERIOD_SECS, DEFAULT_STATISTICS_WARMUP_SECS, DEFAULT_TCP_PORT,
    DEFAULT_WORKER_POOL_MAX_THREADS, default_exchange_root, default_listen_socket,
    default_log_filter, default_log_filter_string, default_log_format, default_materials_dir,
    default_work_root,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Runtime configuration shared by the daemon and its tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "ANALYSISD")]
pub struct Config {
    /// Endpoint the analysis listener binds.
    #[ortho_config(default = defaults::default_listen_socket())]
    pub listen_socket: SocketEndpoint,
    /// Idle timeout applied to identified connections, in milliseconds.
    #[ortho_config(default = DEFAULT_CONNECTION_TIMEOUT_MS)]
    pub connection_timeout_ms: u64,
    /// Whether the periodic statistics sampler runs.
    #[ortho_config(default = true)]
    pub collect_statistics: bool,
    /// Period between statistics samples, in seconds.
    #[ortho_config(default = DEFAULT_STATISTICS_PERIOD_SECS)]
    pub statistics_period_secs: u64,
    /// Delay before the first statistics sample, in seconds.
    #[ortho_config(default = DEFAULT_STATISTICS_WARMUP_SECS)]
    pub statistics_warmup_secs: u64,
    /// Whether a one-shot self stop is scheduled at startup.
    #[ortho_config(default = false)]
    pub scheduled_stop: bool,
    /// Delay of the scheduled self stop, in hours.
    #[ortho_config(default = DEFAULT_SCHEDULED_STOP_HOURS)]
    pub scheduled_stop_hours: u64,
    /// Whether the scheduled self stop relaunches the process.
    #[ortho_config(default = false)]
    pub scheduled_stop_restart: bool,
    /// Initial value of the post-task temporary file deletion toggle.
    #[ortho_config(default = true)]
    pub delete_temporary_files: bool,
    /// Root of the per-task working directories.
    #[ortho_config(default = defaults::default_work_root())]
    pub work_root: Utf8PathBuf,
    /// Root of the file-exchange blob store.
    #[ortho_config(default = defaults::default_exchange_root())]
    pub exchange_root: Utf8PathBuf,
    /// Executable launching SAFE analyses.
    #[ortho_config(default = DEFAULT_SAFE_COMMAND.to_owned())]
    pub safe_command: String,
    /// Shared directory SAFE loads materials from.
    #[ortho_config(default = defaults::default_materials_dir())]
    pub safe_materials_dir: Utf8PathBuf,
    /// Submission command launching ISAMI jobs.
    #[ortho_config(default = DEFAULT_ISAMI_COMMAND.to_owned())]
    pub isami_command: String,
    /// Longest wait for an ISAMI job to finish, in seconds; `0` waits forever.
    #[ortho_config(default = DEFAULT_ISAMI_COMPLETION_TIMEOUT_SECS)]
    pub isami_completion_timeout_secs: u64,
    /// Plaintext administrative password. Empty refuses every admin request.
    #[ortho_config(default = String::new())]
    pub stop_password: String,
    /// Passphrase the administrative AES key derives from.
    #[ortho_config(default = DEFAULT_ADMIN_CIPHER_KEY.to_owned())]
    pub admin_cipher_key: String,
    /// Upper bound of the worker pool.
    #[ortho_config(default = DEFAULT_WORKER_POOL_MAX_THREADS)]
    pub worker_pool_max_threads: usize,
    /// Bounded wait for running tasks during shutdown, in seconds.
    #[ortho_config(default = DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace_secs: u64,
    /// Expiry of incomplete fragment groups in seconds; `0` keeps them.
    #[ortho_config(default = 0)]
    pub fragment_group_ttl_secs: u64,
    /// `tracing` filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Directory receiving daily log files; empty logs to stderr only.
    #[ortho_config(default = String::new())]
    pub log_directory: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_socket: default_listen_socket(),
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            collect_statistics: true,
            statistics_period_secs: DEFAULT_STATISTICS_PERIOD_SECS,
            statistics_warmup_secs: DEFAULT_STATISTICS_WARMUP_SECS,
            scheduled_stop: false,
            scheduled_stop_hours: DEFAULT_SCHEDULED_STOP_HOURS,
            scheduled_stop_restart: false,
            delete_temporary_files: true,
            work_root: default_work_root(),
            exchange_root: default_exchange_root(),
            safe_command: DEFAULT_SAFE_COMMAND.to_owned(),
            safe_materials_dir: default_materials_dir(),
            isami_command: DEFAULT_ISAMI_COMMAND.to_owned(),
            isami_completion_timeout_secs: DEFAULT_ISAMI_COMPLETION_TIMEOUT_SECS,
            stop_password: String::new(),
            admin_cipher_key: DEFAULT_ADMIN_CIPHER_KEY.to_owned(),
            worker_pool_max_threads: DEFAULT_WORKER_POOL_MAX_THREADS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            fragment_group_ttl_secs: 0,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            log_directory: String::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns the aggregated [`ortho_config::OrthoError`] when any layer
    /// fails to parse or the merged result does not deserialise.
    pub fn load() -> OrthoResult<Self> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Loads the configuration using `iter` as the command line.
    ///
    /// Boolean flags left off the command line do not override the file or
    /// environment layers, so `true` defaults survive an empty invocation.
    ///
    /// # Errors
    ///
    /// Returns the aggregated [`ortho_config::OrthoError`] when any layer
    /// fails to parse or the merged result does not deserialise.
    pub fn load_from_iter<I, T>(iter: I) -> OrthoResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let (layers, errors) = Self::compose_layers_from_iter(iter).into_parts();
        let layers = layers.into_iter().map(without_unset_flags).collect();
        LayerComposition::new(layers, errors)
            .into_merge_result(|merged| Self::merge_from_layers(merged))
    }

    /// Endpoint the listener binds.
    #[must_use]
    pub const fn listen_socket(&self) -> &SocketEndpoint {
        &self.listen_socket
    }

    /// Idle timeout for identified connections.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Sampling period, or `None` when sampling is disabled.
    #[must_use]
    pub const fn statistics_period(&self) -> Option<Duration> {
        if self.collect_statistics && self.statistics_period_secs > 0 {
            Some(Duration::from_secs(self.statistics_period_secs))
        } else {
            None
        }
    }

    /// Delay before the first statistics sample.
    #[must_use]
    pub const fn statistics_warmup(&self) -> Duration {
        Duration::from_secs(self.statistics_warmup_secs)
    }

    /// Delay and restart flag of the scheduled self stop, when enabled.
    #[must_use]
    pub const fn scheduled_stop(&self) -> Option<(Duration, bool)> {
        if self.scheduled_stop {
            Some((
                Duration::from_secs(self.scheduled_stop_hours.saturating_mul(3_600)),
                self.scheduled_stop_restart,
            ))
        } else {
            None
        }
    }

    /// Root of the per-task working directories.
    #[must_use]
    pub fn work_root(&self) -> &Utf8Path {
        &self.work_root
    }

    /// Root of the file-exchange blob store.
    #[must_use]
    pub fn exchange_root(&self) -> &Utf8Path {
        &self.exchange_root
    }

    /// Longest wait for an ISAMI job, when bounded.
    #[must_use]
    pub const fn isami_completion_timeout(&self) -> Option<Duration> {
        match self.isami_completion_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Bounded wait for running tasks during shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Expiry of incomplete fragment groups, when enabled.
    #[must_use]
    pub const fn fragment_group_ttl(&self) -> Option<Duration> {
        match self.fragment_group_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Directory receiving log files, when file logging is enabled.
    #[must_use]
    pub fn log_directory(&self) -> Option<&Utf8Path> {
        match self.log_directory.trim() {
            "" => None,
            _ => Some(Utf8Path::new(self.log_directory.trim())),
        }
    }
}

/// Drops `false` booleans from the command-line layer.
///
/// Flags are set-only, so `false` there always means "not passed".
fn without_unset_flags(layer: MergeLayer<'static>) -> MergeLayer<'static> {
    if layer.provenance() != MergeProvenance::Cli {
        return layer;
    }
    let mut value = layer.into_value();
    if let Value::Object(entries) = &mut value {
        entries.retain(|_, entry| *entry != Value::Bool(false));
    }
    MergeLayer::cli(Cow::Owned(value))
}

/// Returns `true` for configuration keys whose values must never be shown.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    lowered.contains("password") || lowered.contains("cipher_key")
}
