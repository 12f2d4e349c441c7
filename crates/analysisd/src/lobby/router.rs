//! Maps messages from identified sessions to tasks.

use std::sync::Arc;

use analysis_protocol::{CorrelationToken, Envelope, Message};
use tracing::{debug, error, warn};

use super::LOBBY_TARGET;
use crate::server::Server;
use crate::session::Session;
use crate::task::{AnalysisTask, ControlTask, StatisticsTask, Task, TaskContext, TaskError};

/// What [`route`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteOutcome {
    /// A task was queued on the worker pool.
    Submitted,
    /// A control task was started on its own thread.
    Spawned,
    /// A fragment was stored; its group is still incomplete.
    Pending,
    /// The server is stopping; the client was told so.
    Refused,
    /// A heartbeat kept the connection open.
    KeptAlive,
    /// Nothing was done.
    Ignored,
}

/// Routes `envelope` from `session` to the matching task.
///
/// Analysis requests bump the request counter before they are queued.
/// Stop and restart requests run outside the worker pool so they can wait
/// for it to drain. Heartbeats need no answer: reading them already reset
/// the idle timeout. Kinds a client has no business sending are logged and
/// dropped.
pub(crate) fn route(
    server: &Arc<Server>,
    session: &Arc<Session>,
    envelope: Envelope,
) -> RouteOutcome {
    let token = envelope.token;
    match envelope.message {
        Message::AnalysisRequest(request) => {
            server.counters().record_request();
            submit(server, session, token, AnalysisTask::new(session.alias(), request))
        }
        Message::StatisticsRequest(request) => {
            submit(server, session, token, StatisticsTask::new(request))
        }
        Message::StopServerRequest(request) => {
            spawn_control(server, session, token, ControlTask::stop(request))
        }
        Message::RestartServerRequest(request) => {
            spawn_control(server, session, token, ControlTask::restart(request))
        }
        Message::KeepAlive => RouteOutcome::KeptAlive,
        Message::Fragment(fragment) => match session.receive_fragment(fragment) {
            Ok(Some(whole)) => {
                debug!(
                    target: LOBBY_TARGET,
                    alias = session.alias(),
                    kind = whole.message.kind(),
                    "fragmented message reassembled"
                );
                route(server, session, whole)
            }
            Ok(None) => RouteOutcome::Pending,
            Err(fragment_error) => {
                warn!(
                    target: LOBBY_TARGET,
                    alias = session.alias(),
                    error = %fragment_error,
                    "fragment rejected"
                );
                RouteOutcome::Ignored
            }
        },
        unexpected @ (Message::Handshake(_)
        | Message::AnalysisProgress(_)
        | Message::AnalysisComplete(_)
        | Message::AnalysisFailed(_)
        | Message::StatisticsResponse(_)
        | Message::StatisticsFailed(_)
        | Message::StopServerResponse(_)
        | Message::StopServerFailed(_)
        | Message::RestartServerResponse(_)
        | Message::RestartServerFailed(_)) => {
            warn!(
                target: LOBBY_TARGET,
                alias = session.alias(),
                kind = unexpected.kind(),
                "unexpected message kind ignored"
            );
            RouteOutcome::Ignored
        }
    }
}

fn submit(
    server: &Arc<Server>,
    session: &Session,
    token: CorrelationToken,
    job: impl Task,
) -> RouteOutcome {
    if !server.is_accepting() {
        return refuse(server, session, token, job);
    }
    match server.submit_task(Arc::clone(session.connection()), token, job) {
        Ok(()) => RouteOutcome::Submitted,
        Err(pool_error) => {
            error!(
                target: LOBBY_TARGET,
                alias = session.alias(),
                error = %pool_error,
                "task could not be queued"
            );
            RouteOutcome::Ignored
        }
    }
}

fn spawn_control(
    server: &Arc<Server>,
    session: &Session,
    token: CorrelationToken,
    job: ControlTask,
) -> RouteOutcome {
    if !server.is_accepting() {
        return refuse(server, session, token, job);
    }
    match server.spawn_control(Arc::clone(session.connection()), token, job) {
        Ok(()) => RouteOutcome::Spawned,
        Err(spawn_error) => {
            error!(
                target: LOBBY_TARGET,
                alias = session.alias(),
                error = %spawn_error,
                "control thread could not be started"
            );
            RouteOutcome::Ignored
        }
    }
}

/// Answers with the task's own failure message without running it.
fn refuse(
    server: &Arc<Server>,
    session: &Session,
    token: CorrelationToken,
    job: impl Task,
) -> RouteOutcome {
    let mut refused = job;
    let cx = TaskContext::new(
        Arc::clone(server),
        Arc::clone(session.connection()),
        token,
        refused.name(),
    );
    refused.failed(&cx, &TaskError::ShuttingDown);
    debug!(
        target: LOBBY_TARGET,
        alias = session.alias(),
        task = refused.name(),
        "request refused during shutdown"
    );
    RouteOutcome::Refused
}
