//! Units of work triggered by client requests.
//!
//! Every task runs through [`execute`], which drives the
//! `Created -> Running -> Completed | Failed` state machine. A task body
//! sends its own completion messages; when it returns an error, or panics,
//! the task's failure handler runs exactly once. Temporary files are removed
//! afterwards when the server's cleanup toggle is on.

mod analysis;
mod control;
mod errors;
mod files;
mod handshake;
mod statistics;
mod workdir;

use std::any::Any;
use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use analysis_protocol::{AnalysisProgress, CorrelationToken, Envelope, Message};
use tracing::{debug, error, warn};

use crate::server::Server;
use crate::transport::{Connection, SendError};

pub(crate) use self::analysis::AnalysisTask;
pub(crate) use self::control::ControlTask;
pub(crate) use self::errors::TaskError;
pub(crate) use self::handshake::HandshakeTask;
pub(crate) use self::statistics::StatisticsTask;
use self::workdir::WorkingDirectory;

const TASK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::task");

/// A runnable unit of work with outcome reporting.
pub(crate) trait Task: Send + 'static {
    /// Name used in logs and working directory names.
    fn name(&self) -> &'static str;

    /// Performs the work and sends completion messages.
    fn run(&mut self, cx: &TaskContext) -> Result<(), TaskError>;

    /// Reports `error` to the client. Must not fail.
    fn failed(&mut self, cx: &TaskContext, error: &TaskError);

    /// Files outside the working directory removed at cleanup.
    fn side_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Lifecycle of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Created,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// What a task can reach while it runs.
pub(crate) struct TaskContext {
    server: Arc<Server>,
    connection: Arc<Connection>,
    token: CorrelationToken,
    workdir: WorkingDirectory,
}

impl TaskContext {
    pub(crate) fn new(
        server: Arc<Server>,
        connection: Arc<Connection>,
        token: CorrelationToken,
        task: &'static str,
    ) -> Self {
        let workdir = WorkingDirectory::new(server.config().work_root().as_std_path(), task);
        Self {
            server,
            connection,
            token,
            workdir,
        }
    }

    pub(crate) fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub(crate) const fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Sends `message` with the request's token.
    pub(crate) fn reply(&self, message: Message) -> Result<(), SendError> {
        self.connection.send(&Envelope::new(self.token, message))
    }

    /// Sends a progress message; failures are logged and otherwise ignored.
    pub(crate) fn progress(&self, text: &str) {
        let message = Message::AnalysisProgress(AnalysisProgress {
            text: text.to_owned(),
        });
        if let Err(error) = self.reply(message) {
            debug!(
                target: TASK_TARGET,
                token = %self.token,
                error = %error,
                "progress message not delivered"
            );
        }
    }

    /// The task's working directory, created on first use.
    pub(crate) fn working_dir(&self) -> Result<&Path, TaskError> {
        self.workdir.get()
    }
}

/// Runs `task` to a terminal state.
pub(crate) fn execute(task: &mut dyn Task, cx: &TaskContext) -> TaskState {
    let name = task.name();
    let mut state = TaskState::Created;
    transition(name, cx, &mut state, TaskState::Running);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(cx)))
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_text(payload.as_ref()))));
    match outcome {
        Ok(()) => transition(name, cx, &mut state, TaskState::Completed),
        Err(task_error) => {
            warn!(
                target: TASK_TARGET,
                task = name,
                token = %cx.token,
                error = %task_error,
                "task failed"
            );
            transition(name, cx, &mut state, TaskState::Failed);
            let handled =
                panic::catch_unwind(AssertUnwindSafe(|| task.failed(cx, &task_error)));
            if handled.is_err() {
                error!(
                    target: TASK_TARGET,
                    task = name,
                    token = %cx.token,
                    "task failure handler panicked"
                );
            }
        }
    }

    if cx.server.delete_temporary_files() {
        cleanup(name, cx.workdir.created(), &task.side_files());
    }
    state
}

fn transition(name: &str, cx: &TaskContext, state: &mut TaskState, next: TaskState) {
    debug!(
        target: TASK_TARGET,
        task = name,
        token = %cx.token,
        from = %state,
        to = %next,
        "task state changed"
    );
    *state = next;
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

fn cleanup(name: &str, workdir: Option<&Path>, side_files: &[PathBuf]) {
    if let Some(dir) = workdir {
        report_removal(name, dir, fs::remove_dir_all(dir));
    }
    for file in side_files {
        report_removal(name, file, fs::remove_file(file));
    }
}

fn report_removal(name: &str, path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(
            target: TASK_TARGET,
            task = name,
            path = %path.display(),
            "temporary file removed"
        ),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            target: TASK_TARGET,
            task = name,
            path = %path.display(),
            error = %error,
            "failed to remove temporary file"
        ),
    }
}
