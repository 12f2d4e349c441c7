//! Write half and control operations of an accepted connection.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use analysis_protocol::{CodecError, Envelope, encode_line, should_split, split};
use thiserror::Error;
use tracing::{debug, warn};

use super::{ConnectionStream, TRANSPORT_TARGET};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Failures while sending an envelope to a peer.
#[derive(Debug, Error)]
pub(crate) enum SendError {
    #[error("connection {id} is closed")]
    Closed { id: u64 },
    #[error("failed to encode outbound envelope: {0}")]
    Encode(#[from] CodecError),
    #[error("failed to write to connection {id}: {source}")]
    Io {
        id: u64,
        #[source]
        source: io::Error,
    },
}

/// Shared handle used to answer a peer.
///
/// Oversized envelopes are split into fragments here, so callers never deal
/// with fragmentation. All lines of one envelope are written under a single
/// lock, keeping a sender's messages in order.
///
/// The connection also counts the tasks still working on the peer's behalf;
/// the read loop does not expire an idle connection while that count is
/// non-zero.
pub(crate) struct Connection {
    id: u64,
    peer: String,
    writer: Mutex<Box<dyn Write + Send>>,
    control: Option<ConnectionStream>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
}

/// Marks one task in flight on a connection until dropped.
#[derive(Debug)]
pub(crate) struct InFlight {
    connection: Arc<Connection>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.connection.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Splits an accepted stream into a shared handle and a read half.
    pub(crate) fn accept(stream: ConnectionStream) -> io::Result<(Arc<Self>, ConnectionStream)> {
        let writer = stream.try_clone()?;
        let control = stream.try_clone()?;
        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer: stream.peer(),
            writer: Mutex::new(Box::new(writer)),
            control: Some(control),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        });
        Ok((connection, stream))
    }

    /// Connection backed by an arbitrary writer and no socket.
    #[cfg(test)]
    pub(crate) fn detached(writer: impl Write + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer: "detached".to_owned(),
            writer: Mutex::new(Box::new(writer)),
            control: None,
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        })
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    /// Writes `envelope`, fragmenting it when its kind asks for it.
    pub(crate) fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed { id: self.id });
        }
        let lines = if should_split(&envelope.message) {
            split(envelope)?
                .iter()
                .map(encode_line)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![encode_line(envelope)?]
        };
        if lines.len() > 1 {
            debug!(
                target: TRANSPORT_TARGET,
                connection = self.id,
                kind = envelope.message.kind(),
                fragments = lines.len(),
                "sending fragmented message"
            );
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        lines
            .iter()
            .try_for_each(|line| writer.write_all(line))
            .and_then(|()| writer.flush())
            .map_err(|source| SendError::Io {
                id: self.id,
                source,
            })
    }

    /// Counts a task as in flight until the returned guard drops.
    pub(crate) fn begin_task(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            connection: Arc::clone(self),
        }
    }

    pub(crate) fn tasks_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Arms a read timeout of `timeout`; the read loop treats its expiry
    /// as idleness.
    pub(crate) fn set_idle_timeout(&self, timeout: Duration) {
        let Some(control) = &self.control else {
            return;
        };
        let timeout = (!timeout.is_zero()).then_some(timeout);
        if let Err(error) = control.set_read_timeout(timeout) {
            warn!(
                target: TRANSPORT_TARGET,
                connection = self.id,
                error = %error,
                "failed to set idle timeout"
            );
        }
    }

    /// Marks the connection closed and shuts the socket down. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(control) = &self.control
            && let Err(error) = control.shutdown()
            && error.kind() != io::ErrorKind::NotConnected
        {
            debug!(
                target: TRANSPORT_TARGET,
                connection = self.id,
                error = %error,
                "socket shutdown failed"
            );
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
