//! Hooks run at the end of a stop sequence.

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Failures while relaunching the process.
#[derive(Debug, Error)]
pub enum RelaunchError {
    /// The running executable could not be located.
    #[error("failed to locate the running executable: {source}")]
    CurrentExe {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The replacement process could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program being started.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Supervisor callback that starts a fresh server process.
pub trait RestartHook: Send + Sync {
    /// Starts the replacement process.
    fn relaunch(&self) -> Result<(), RelaunchError>;
}

/// Re-executes the current binary with its original arguments.
#[derive(Debug, Clone)]
pub struct ProcessRelauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessRelauncher {
    /// Captures the running executable and its arguments.
    pub fn current() -> Result<Self, RelaunchError> {
        let program = env::current_exe().map_err(|source| RelaunchError::CurrentExe { source })?;
        Ok(Self {
            program,
            args: env::args_os().skip(1).collect(),
        })
    }
}

impl RestartHook for ProcessRelauncher {
    fn relaunch(&self) -> Result<(), RelaunchError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .map_err(|source| RelaunchError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        info!(
            target: PROCESS_TARGET,
            pid = child.id(),
            program = %self.program.display(),
            "replacement server process started"
        );
        Ok(())
    }
}

/// Terminates the process once a stop sequence asks for it.
pub trait ProcessExit: Send + Sync {
    /// Ends the process with `code`.
    fn exit(&self, code: i32);
}

/// Calls [`std::process::exit`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExit;

impl ProcessExit for SystemExit {
    fn exit(&self, code: i32) {
        info!(target: PROCESS_TARGET, code, "exiting process");
        std::process::exit(code);
    }
}
