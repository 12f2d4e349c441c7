//! File-exchange blob store.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::COLLAB_TARGET;

/// Failures raised by a blob store.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The URL does not name a location inside the store.
    #[error("invalid blob url '{url}'")]
    InvalidUrl {
        /// Rejected URL.
        url: String,
    },
    /// No blob exists at the URL.
    #[error("blob '{url}' not found")]
    NotFound {
        /// Missing URL.
        url: String,
    },
    /// Copying data failed.
    #[error("blob transfer for '{url}' failed: {source}")]
    Transfer {
        /// URL being transferred.
        url: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Central store for task inputs and outputs.
pub trait BlobStore: Send + Sync {
    /// Copies the blob at `url` to `destination`.
    fn get(&self, url: &str, destination: &Path) -> Result<(), BlobError>;

    /// Stores `source` under `name` and returns its URL.
    fn put(&self, source: &Path, name: &str) -> Result<String, BlobError>;
}

/// Blob store backed by a shared directory; URLs are paths relative to it.
#[derive(Debug, Clone)]
pub struct ExchangeDirectory {
    root: PathBuf,
}

impl ExchangeDirectory {
    /// Store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(url);
        let contained = !url.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if contained {
            Ok(self.root.join(relative))
        } else {
            Err(BlobError::InvalidUrl {
                url: url.to_owned(),
            })
        }
    }
}

impl BlobStore for ExchangeDirectory {
    fn get(&self, url: &str, destination: &Path) -> Result<(), BlobError> {
        let stored = self.resolve(url)?;
        if !stored.is_file() {
            return Err(BlobError::NotFound {
                url: url.to_owned(),
            });
        }
        fs::copy(&stored, destination).map_err(|source| BlobError::Transfer {
            url: url.to_owned(),
            source,
        })?;
        debug!(target: COLLAB_TARGET, url, "blob downloaded");
        Ok(())
    }

    fn put(&self, source: &Path, name: &str) -> Result<String, BlobError> {
        let target = self.resolve(name)?;
        let transfer = |error| BlobError::Transfer {
            url: name.to_owned(),
            source: error,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(transfer)?;
        }
        fs::copy(source, &target).map_err(transfer)?;
        debug!(target: COLLAB_TARGET, url = name, "blob uploaded");
        Ok(name.to_owned())
    }
}
