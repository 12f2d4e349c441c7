//! Remote stop and restart requests.

use analysis_protocol::{AdminRequest, AdminResponse, Message, RequestFailed};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::{TASK_TARGET, Task, TaskContext, TaskError};

/// Runs on its own thread so it can wait for the worker pool to drain.
pub(crate) struct ControlTask {
    restart: bool,
    request: AdminRequest,
}

impl ControlTask {
    pub(crate) const fn stop(request: AdminRequest) -> Self {
        Self {
            restart: false,
            request,
        }
    }

    pub(crate) const fn restart(request: AdminRequest) -> Self {
        Self {
            restart: true,
            request,
        }
    }

    fn response(&self, succeeded: bool) -> Message {
        let response = AdminResponse { succeeded };
        if self.restart {
            Message::RestartServerResponse(response)
        } else {
            Message::StopServerResponse(response)
        }
    }
}

/// Compares digests in constant time; an empty configured password never
/// matches.
fn password_matches(supplied: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let supplied_digest = Sha256::digest(supplied.as_bytes());
    let expected_digest = Sha256::digest(expected.as_bytes());
    supplied_digest
        .as_slice()
        .ct_eq(expected_digest.as_slice())
        .into()
}

impl Task for ControlTask {
    fn name(&self) -> &'static str {
        if self.restart {
            "RestartServer"
        } else {
            "StopServer"
        }
    }

    fn run(&mut self, cx: &TaskContext) -> Result<(), TaskError> {
        let server = cx.server();
        let expected = server.config().stop_password.as_str();
        let supplied = server.cipher().decrypt(&self.request.password)?;
        let accepted = password_matches(&supplied, expected);

        cx.reply(self.response(accepted))?;
        if !accepted {
            warn!(
                target: TASK_TARGET,
                task = self.name(),
                peer = cx.connection().peer(),
                "admin request refused: wrong password"
            );
            return Ok(());
        }

        info!(
            target: TASK_TARGET,
            task = self.name(),
            peer = cx.connection().peer(),
            "admin request accepted"
        );
        server.stop(self.restart, true);
        Ok(())
    }

    fn failed(&mut self, cx: &TaskContext, task_error: &TaskError) {
        let report = RequestFailed {
            description: task_error.to_string(),
        };
        let message = if self.restart {
            Message::RestartServerFailed(report)
        } else {
            Message::StopServerFailed(report)
        };
        if let Err(send_error) = cx.reply(message) {
            warn!(
                target: TASK_TARGET,
                task = self.name(),
                error = %send_error,
                "admin failure could not be reported"
            );
        }
    }
}
