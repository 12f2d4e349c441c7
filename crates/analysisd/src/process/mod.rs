//! Process integration: launch sequence, signals, restart and exit.

mod errors;
mod launch;
mod relaunch;
mod shutdown;

pub use errors::LaunchError;
pub use launch::{ConfigLoader, SystemConfigLoader, run_daemon};
pub use relaunch::{ProcessExit, ProcessRelauncher, RelaunchError, RestartHook, SystemExit};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

#[cfg(test)]
pub(crate) use launch::{LaunchPlan, run_daemon_with};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
