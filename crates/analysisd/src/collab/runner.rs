//! Seam between analysis tasks and the tools that compute results.

use std::io;
use std::path::{Path, PathBuf};

use analysis_protocol::{Analysis, AnalysisKind, AnalysisResult};
use thiserror::Error;

/// Failures raised while running an analysis job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Required input files were not supplied.
    #[error("{0}")]
    MissingInput(String),
    /// Filesystem access failed.
    #[error("{context}: {source}")]
    Io {
        /// Operation being attempted.
        context: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The analysis tool exited unsuccessfully.
    #[error("{0}")]
    ToolFailed(String),
    /// The analysis tool reported errors in its output.
    #[error("{0}")]
    ToolErrors(String),
    /// An expected output file is missing.
    #[error("analysis output '{0}' was not produced")]
    MissingOutput(String),
    /// Results could not be read from the tool output.
    #[error("failed to parse analysis results: {0}")]
    Parse(String),
    /// No tool on this host handles the analysis kind.
    #[error("{0} analyses are not supported on this server")]
    Unsupported(AnalysisKind),
}

impl JobError {
    /// IO failure annotated with `context`.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Inputs of one analysis run.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisJob<'a> {
    /// Requested analysis.
    pub analysis: &'a Analysis,
    /// Task working directory holding the extracted inputs.
    pub working_dir: &'a Path,
    /// Alias of the requesting client.
    pub alias: &'a str,
}

/// Receives progress text while a job runs.
pub trait ProgressSink {
    /// Reports one step.
    fn progress(&self, text: &str);
}

/// Files a job leaves behind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobArtifacts {
    /// Outputs shipped to the client after a successful run.
    pub outputs: Vec<PathBuf>,
    /// Files shipped to the client after a failed run.
    pub diagnostics: Vec<PathBuf>,
    /// Files created outside the working directory, removed at cleanup.
    pub side_files: Vec<PathBuf>,
}

/// Runs analyses in a prepared working directory.
///
/// Implementations fill `artifacts` as they go, so files recorded before a
/// failure are still shipped and cleaned up.
pub trait AnalysisRunner: Send + Sync {
    /// Computes the result of `job`.
    fn run(
        &self,
        job: &AnalysisJob<'_>,
        progress: &dyn ProgressSink,
        artifacts: &mut JobArtifacts,
    ) -> Result<AnalysisResult, JobError>;
}
