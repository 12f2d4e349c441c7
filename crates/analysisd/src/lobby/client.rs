//! Connection state and the per-connection read loop.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use analysis_protocol::{CodecError, CorrelationToken, Envelope, FrameReader, Handshake, Message};
use tracing::{debug, info, warn};

use super::{LOBBY_TARGET, route};
use crate::server::Server;
use crate::session::Session;
use crate::task::HandshakeTask;
use crate::transport::{Connection, ConnectionHandler, ConnectionStream};

#[derive(Debug, Default)]
struct ClientState {
    session: Option<Arc<Session>>,
    disconnected: bool,
}

/// One accepted connection and, once identified, its session.
#[derive(Debug)]
pub(crate) struct Client {
    connection: Arc<Connection>,
    state: Mutex<ClientState>,
}

impl Client {
    pub(crate) fn new(connection: Arc<Connection>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            state: Mutex::default(),
        })
    }

    pub(crate) const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub(crate) fn session(&self) -> Option<Arc<Session>> {
        self.lock().session.clone()
    }

    /// Binds `session` to this client.
    ///
    /// Hands the session back when the client already left or is already
    /// identified; the caller must then unregister it.
    pub(crate) fn identify(&self, session: Arc<Session>) -> Result<(), Arc<Session>> {
        let mut state = self.lock();
        if state.disconnected || state.session.is_some() {
            return Err(session);
        }
        state.session = Some(session);
        Ok(())
    }

    /// Marks the client gone and returns its session, if any.
    pub(crate) fn disconnect(&self) -> Option<Arc<Session>> {
        let mut state = self.lock();
        state.disconnected = true;
        state.session.take()
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serves analysis clients until they disconnect.
#[derive(Debug)]
pub(crate) struct ClientHandler {
    server: Arc<Server>,
}

impl ClientHandler {
    pub(crate) const fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    fn serve(&self, client: &Arc<Client>, stream: ConnectionStream) {
        let connection = client.connection();
        let mut frames = FrameReader::new(stream);
        loop {
            match frames.next_envelope() {
                Ok(Some(envelope)) => self.dispatch(client, envelope),
                Ok(None) => break,
                Err(CodecError::Io(error))
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    let running = connection.tasks_in_flight();
                    if running > 0 {
                        debug!(
                            target: LOBBY_TARGET,
                            connection = connection.id(),
                            running,
                            "idle timeout deferred while tasks run"
                        );
                        continue;
                    }
                    info!(
                        target: LOBBY_TARGET,
                        connection = connection.id(),
                        "idle timeout reached"
                    );
                    break;
                }
                Err(CodecError::Io(error)) => {
                    debug!(
                        target: LOBBY_TARGET,
                        connection = connection.id(),
                        error = %error,
                        "connection read ended"
                    );
                    break;
                }
                Err(error @ CodecError::LineTooLong { .. }) => {
                    warn!(
                        target: LOBBY_TARGET,
                        connection = connection.id(),
                        error = %error,
                        "closing connection after oversized frame"
                    );
                    break;
                }
                Err(error) => warn!(
                    target: LOBBY_TARGET,
                    connection = connection.id(),
                    error = %error,
                    "malformed envelope ignored"
                ),
            }
        }
    }

    fn dispatch(&self, client: &Arc<Client>, envelope: Envelope) {
        if let Some(session) = client.session() {
            let kind = envelope.message.kind();
            let outcome = route(&self.server, &session, envelope);
            debug!(
                target: LOBBY_TARGET,
                alias = session.alias(),
                kind,
                ?outcome,
                "message routed"
            );
            return;
        }

        match envelope.message {
            Message::Handshake(handshake) => self.handshake(client, envelope.token, handshake),
            other => warn!(
                target: LOBBY_TARGET,
                connection = client.connection().id(),
                kind = other.kind(),
                "message before handshake ignored"
            ),
        }
    }

    fn handshake(&self, client: &Arc<Client>, token: CorrelationToken, handshake: Handshake) {
        let connection = client.connection();
        if self.server.find_session(&handshake.alias).is_some() {
            info!(
                target: LOBBY_TARGET,
                alias = %handshake.alias,
                "handshake refused: alias taken"
            );
            let refusal = Envelope::new(token, Message::Handshake(handshake.answered(false)));
            if let Err(error) = connection.send(&refusal) {
                debug!(
                    target: LOBBY_TARGET,
                    error = %error,
                    "handshake refusal not delivered"
                );
            }
            return;
        }

        let task = HandshakeTask::new(Arc::clone(client), handshake);
        if let Err(error) = self
            .server
            .submit_task(Arc::clone(connection), token, task)
        {
            warn!(
                target: LOBBY_TARGET,
                connection = connection.id(),
                error = %error,
                "handshake not scheduled"
            );
        }
    }
}

impl ConnectionHandler for ClientHandler {
    fn handle(&self, stream: ConnectionStream) {
        let (connection, read_half) = match Connection::accept(stream) {
            Ok(halves) => halves,
            Err(error) => {
                warn!(
                    target: LOBBY_TARGET,
                    error = %error,
                    "failed to prepare connection"
                );
                return;
            }
        };
        self.server.track_connection(&connection);
        info!(
            target: LOBBY_TARGET,
            connection = connection.id(),
            peer = connection.peer(),
            "client connected"
        );

        let client = Client::new(Arc::clone(&connection));
        self.serve(&client, read_half);

        connection.close();
        if let Some(session) = client.disconnect() {
            self.server.remove_session(&session);
        }
        self.server.untrack_connection(&connection);
        info!(
            target: LOBBY_TARGET,
            connection = connection.id(),
            "client disconnected"
        );
    }
}
