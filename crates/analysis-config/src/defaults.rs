use std::env;

use camino::Utf8PathBuf;

#[cfg(unix)]
use libc::geteuid;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// TCP port the listener binds when none is configured.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Idle time after which an identified connection is closed.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 600_000;

/// Period between two statistics samples.
pub const DEFAULT_STATISTICS_PERIOD_SECS: u64 = 3_600;

/// Delay before the first statistics sample.
pub const DEFAULT_STATISTICS_WARMUP_SECS: u64 = 30;

/// Delay of the optional scheduled self stop.
pub const DEFAULT_SCHEDULED_STOP_HOURS: u64 = 24;

/// Upper bound of concurrently running worker threads.
pub const DEFAULT_WORKER_POOL_MAX_THREADS: usize = 64;

/// Bounded wait granted to running tasks during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Launcher used to run SAFE analyses.
pub const DEFAULT_SAFE_COMMAND: &str = "safe_run";

/// Submission command used to run ISAMI analyses.
pub const DEFAULT_ISAMI_COMMAND: &str = "bsub.isami";

/// Longest wait for a submitted ISAMI job to signal completion.
pub const DEFAULT_ISAMI_COMPLETION_TIMEOUT_SECS: u64 = 86_400;

/// Passphrase the administrative cipher key derives from when none is set.
pub const DEFAULT_ADMIN_CIPHER_KEY: &str = "analysisd-admin";

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter used where allocation is required.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Loopback TCP endpoint on [`DEFAULT_TCP_PORT`].
#[must_use]
pub fn default_listen_socket() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}

/// Root under which per-task working directories are created.
#[must_use]
pub fn default_work_root() -> Utf8PathBuf {
    state_root().join("work")
}

/// Root of the file-exchange blob store.
#[must_use]
pub fn default_exchange_root() -> Utf8PathBuf {
    state_root().join("exchange")
}

/// Shared directory SAFE reads material definitions from.
#[must_use]
pub fn default_materials_dir() -> Utf8PathBuf {
    state_root().join("materials")
}

fn state_root() -> Utf8PathBuf {
    let mut base = Utf8PathBuf::from_path_buf(env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    base.push("analysisd");
    #[cfg(unix)]
    base.push(user_namespace());
    base
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}
