//! Handshakes claiming a free alias.

use std::sync::Arc;

use analysis_protocol::{Handshake, Message};
use tracing::{debug, info, warn};

use super::{TASK_TARGET, Task, TaskContext, TaskError};
use crate::lobby::Client;
use crate::session::RegistryError;

pub(crate) struct HandshakeTask {
    client: Arc<Client>,
    handshake: Handshake,
}

impl HandshakeTask {
    pub(crate) const fn new(client: Arc<Client>, handshake: Handshake) -> Self {
        Self { client, handshake }
    }

    fn answer(&self, cx: &TaskContext, succeeded: bool) -> Result<(), TaskError> {
        cx.reply(Message::Handshake(self.handshake.answered(succeeded)))?;
        Ok(())
    }
}

impl Task for HandshakeTask {
    fn name(&self) -> &'static str {
        "ProcessHandshake"
    }

    fn run(&mut self, cx: &TaskContext) -> Result<(), TaskError> {
        let server = cx.server();
        let alias = self.handshake.alias.as_str();
        let session = match server.add_session(alias, Arc::clone(self.client.connection())) {
            Ok(session) => session,
            Err(RegistryError::AliasTaken { .. }) => {
                info!(target: TASK_TARGET, alias, "handshake refused: alias taken");
                return self.answer(cx, false);
            }
        };

        if let Err(orphan) = self.client.identify(session) {
            server.remove_session(&orphan);
            if self.client.connection().is_closed() {
                debug!(
                    target: TASK_TARGET,
                    alias,
                    "client left before its handshake completed"
                );
                return Ok(());
            }
            warn!(target: TASK_TARGET, alias, "client is already identified");
            return self.answer(cx, false);
        }

        self.client
            .connection()
            .set_idle_timeout(server.config().connection_timeout());
        self.answer(cx, true)
    }

    fn failed(&mut self, cx: &TaskContext, task_error: &TaskError) {
        warn!(
            target: TASK_TARGET,
            alias = %self.handshake.alias,
            error = %task_error,
            "handshake failed"
        );
        if self.answer(cx, false).is_err() {
            debug!(
                target: TASK_TARGET,
                alias = %self.handshake.alias,
                "handshake refusal not delivered"
            );
        }
    }
}
