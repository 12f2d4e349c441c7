//! Alias-keyed registry of identified sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use analysis_protocol::{Envelope, Fragment, FragmentError, Reassembler};
use thiserror::Error;
use tracing::{debug, info};

use super::SESSION_TARGET;
use crate::transport::{Connection, SendError};

/// Failures raised by the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RegistryError {
    #[error("alias '{alias}' is already connected")]
    AliasTaken { alias: String },
}

/// A connection that completed its handshake.
///
/// Fragment groups live and die with the session.
#[derive(Debug)]
pub(crate) struct Session {
    alias: String,
    connection: Arc<Connection>,
    fragments: Mutex<Reassembler>,
}

impl Session {
    fn new(alias: String, connection: Arc<Connection>, fragment_ttl: Option<Duration>) -> Self {
        Self {
            alias,
            connection,
            fragments: Mutex::new(Reassembler::with_ttl(fragment_ttl)),
        }
    }

    pub(crate) fn alias(&self) -> &str {
        &self.alias
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub(crate) fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        self.connection.send(envelope)
    }

    /// Feeds a fragment to this session's reassembler.
    pub(crate) fn receive_fragment(
        &self,
        fragment: Fragment,
    ) -> Result<Option<Envelope>, FragmentError> {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .receive(fragment)
    }
}

/// Mapping from alias to session. At most one session per alias.
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    fragment_ttl: Option<Duration>,
}

impl SessionRegistry {
    pub(crate) fn new(fragment_ttl: Option<Duration>) -> Self {
        Self {
            sessions: Mutex::default(),
            fragment_ttl,
        }
    }

    /// Claims `alias` for `connection`.
    pub(crate) fn register(
        &self,
        alias: &str,
        connection: Arc<Connection>,
    ) -> Result<Arc<Session>, RegistryError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(alias) {
            return Err(RegistryError::AliasTaken {
                alias: alias.to_owned(),
            });
        }
        let session = Arc::new(Session::new(
            alias.to_owned(),
            connection,
            self.fragment_ttl,
        ));
        sessions.insert(alias.to_owned(), Arc::clone(&session));
        info!(
            target: SESSION_TARGET,
            alias,
            connection = session.connection.id(),
            peer = session.connection.peer(),
            "session registered"
        );
        Ok(session)
    }

    pub(crate) fn lookup(&self, alias: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .cloned()
    }

    pub(crate) fn contains(&self, alias: &str) -> bool {
        self.lookup(alias).is_some()
    }

    /// Removes `session` if it still owns its alias. Returns whether it did.
    pub(crate) fn remove(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = sessions
            .get(session.alias())
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if owned {
            sessions.remove(session.alias());
            info!(
                target: SESSION_TARGET,
                alias = session.alias(),
                "session removed"
            );
        } else {
            debug!(
                target: SESSION_TARGET,
                alias = session.alias(),
                "session already removed"
            );
        }
        owned
    }

    /// Snapshot of every session, ordered by alias.
    pub(crate) fn all(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|left, right| left.alias.cmp(&right.alias));
        sessions
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
