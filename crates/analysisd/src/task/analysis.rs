//! Analysis requests run through the configured analysis runner.

use std::path::PathBuf;

use analysis_protocol::{AnalysisComplete, AnalysisFailed, AnalysisRequest, Message};
use tracing::{error, info, warn};

use super::files::{download_input, extract_archive, upload_outputs};
use super::{TASK_TARGET, Task, TaskContext, TaskError};
use crate::collab::{AnalysisJob, JobArtifacts, ProgressSink};

pub(crate) struct AnalysisTask {
    alias: String,
    request: AnalysisRequest,
    artifacts: JobArtifacts,
}

impl AnalysisTask {
    pub(crate) fn new(alias: impl Into<String>, request: AnalysisRequest) -> Self {
        Self {
            alias: alias.into(),
            request,
            artifacts: JobArtifacts::default(),
        }
    }

    fn upload(&self, cx: &TaskContext, succeeded: bool) -> Result<Option<String>, TaskError> {
        if !self.request.upload_output_files {
            return Ok(None);
        }
        let files = if succeeded {
            &self.artifacts.outputs
        } else {
            &self.artifacts.diagnostics
        };
        upload_outputs(cx, files, &self.alias, self.name())
    }
}

struct TaskProgress<'a>(&'a TaskContext);

impl ProgressSink for TaskProgress<'_> {
    fn progress(&self, text: &str) {
        self.0.progress(text);
    }
}

impl Task for AnalysisTask {
    fn name(&self) -> &'static str {
        self.request.analysis.kind().task_name()
    }

    fn run(&mut self, cx: &TaskContext) -> Result<(), TaskError> {
        cx.progress("Creating analysis directory...");
        let dir = cx.working_dir()?.to_path_buf();

        cx.progress("Downloading input files from central database...");
        let archive = download_input(cx, &self.request.download_url)?;

        cx.progress("Extracting input files...");
        extract_archive(&archive, &dir)?;

        let job = AnalysisJob {
            analysis: &self.request.analysis,
            working_dir: &dir,
            alias: &self.alias,
        };
        let result = cx
            .server()
            .runner()
            .run(&job, &TaskProgress(cx), &mut self.artifacts)?;

        let download_url = self.upload(cx, true)?;
        cx.reply(Message::AnalysisComplete(AnalysisComplete {
            result,
            download_url,
        }))?;
        info!(
            target: TASK_TARGET,
            alias = %self.alias,
            task = self.name(),
            token = %cx.token(),
            "analysis completed"
        );
        Ok(())
    }

    fn failed(&mut self, cx: &TaskContext, task_error: &TaskError) {
        cx.server().counters().record_failure();
        warn!(
            target: TASK_TARGET,
            alias = %self.alias,
            task = self.name(),
            error = %task_error,
            "analysis failed"
        );

        let download_url = self.upload(cx, false).unwrap_or_else(|upload_error| {
            warn!(
                target: TASK_TARGET,
                alias = %self.alias,
                error = %upload_error,
                "failed to upload partial outputs"
            );
            None
        });
        let description = task_error.to_string();
        let report = Message::AnalysisFailed(AnalysisFailed {
            description: description.clone(),
            download_url,
        });
        let Err(send_error) = cx.reply(report) else {
            return;
        };
        warn!(
            target: TASK_TARGET,
            alias = %self.alias,
            error = %send_error,
            "failed to send analysis failure; retrying without attachment"
        );
        let minimal = Message::AnalysisFailed(AnalysisFailed {
            description,
            download_url: None,
        });
        if let Err(retry_error) = cx.reply(minimal) {
            error!(
                target: TASK_TARGET,
                alias = %self.alias,
                error = %retry_error,
                "analysis failure could not be reported"
            );
        }
    }

    fn side_files(&self) -> Vec<PathBuf> {
        self.artifacts.side_files.clone()
    }
}
