//! Errors raised inside task bodies.

use std::io;

use thiserror::Error;

use crate::collab::{BlobError, CipherError, JobError};
use crate::transport::SendError;

/// Failure of a task body, reported to the client by the task's failure
/// handler.
#[derive(Debug, Error)]
pub(crate) enum TaskError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("{context}: {source}")]
    Archive {
        context: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to answer the client: {0}")]
    Send(#[from] SendError),
    #[error("failed to decrypt admin password: {0}")]
    Cipher(#[from] CipherError),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("server is shutting down")]
    ShuttingDown,
}

impl TaskError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn archive(context: impl Into<String>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            context: context.into(),
            source,
        }
    }
}
