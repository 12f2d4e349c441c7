//! Default runner routing each analysis kind to its tool.

use analysis_config::Config;
use analysis_protocol::{Analysis, AnalysisResult};

use crate::collab::{AnalysisJob, AnalysisRunner, JobArtifacts, JobError, ProgressSink};
use crate::isami::IsamiRunner;
use crate::safe::SafeRunner;

/// [`AnalysisRunner`] sending ISAMI analyses to [`IsamiRunner`] and every
/// other kind to [`SafeRunner`].
#[derive(Debug, Clone)]
pub struct ToolRunner {
    safe: SafeRunner,
    isami: IsamiRunner,
}

impl ToolRunner {
    /// Runner combining `safe` and `isami`.
    #[must_use]
    pub const fn new(safe: SafeRunner, isami: IsamiRunner) -> Self {
        Self { safe, isami }
    }

    /// Both tools configured from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(SafeRunner::from_config(config), IsamiRunner::from_config(config))
    }
}

impl AnalysisRunner for ToolRunner {
    fn run(
        &self,
        job: &AnalysisJob<'_>,
        progress: &dyn ProgressSink,
        artifacts: &mut JobArtifacts,
    ) -> Result<AnalysisResult, JobError> {
        match job.analysis {
            Analysis::IsamiEquivalentStress { .. } => self.isami.run(job, progress, artifacts),
            _ => self.safe.run(job, progress, artifacts),
        }
    }
}
