//! Lazily created, unique per-task working directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::unsync::OnceCell;

use super::TaskError;
use crate::server::now_ms;

static NEXT_DIRECTORY: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub(crate) struct WorkingDirectory {
    root: PathBuf,
    task: &'static str,
    path: OnceCell<PathBuf>,
}

impl WorkingDirectory {
    pub(crate) fn new(root: impl Into<PathBuf>, task: &'static str) -> Self {
        Self {
            root: root.into(),
            task,
            path: OnceCell::new(),
        }
    }

    /// Creates the directory on first use.
    pub(crate) fn get(&self) -> Result<&Path, TaskError> {
        self.path
            .get_or_try_init(|| {
                let sequence = NEXT_DIRECTORY.fetch_add(1, Ordering::Relaxed);
                let path = self
                    .root
                    .join(format!("{}-{}-{sequence}", self.task, now_ms()));
                fs::create_dir_all(&path)
                    .map_err(|error| TaskError::io("failed to create analysis directory", error))?;
                Ok(path)
            })
            .map(PathBuf::as_path)
    }

    /// The directory, if it was created.
    pub(crate) fn created(&self) -> Option<&Path> {
        self.path.get().map(PathBuf::as_path)
    }
}
