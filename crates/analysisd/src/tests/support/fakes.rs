//! Recording doubles for the server's collaborators.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use analysis_config::Config;
use analysis_protocol::AnalysisResult;
use mockall::mock;

use crate::collab::{
    AnalysisJob, AnalysisRunner, BlobError, BlobStore, JobArtifacts, JobError, ProgressSink,
};
use crate::lifecycle::LifecycleReporter;
use crate::process::{ProcessExit, RelaunchError, RestartHook};
use crate::server::{ServerError, ServerState};

/// Input file the fake runner insists on.
pub(crate) const REQUIRED_INPUT: &str = "input.sigma";

/// Output file the fake runner produces.
pub(crate) const PRODUCED_OUTPUT: &str = "output.dossier";

/// Equivalent stress reported by the fake runner.
pub(crate) const EQUIVALENT_STRESS: f64 = 412.5;

/// Exchange URL of the prepared input archive.
pub(crate) const INPUT_URL: &str = "inputs/request.zip";

/// Lifecycle milestones seen by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LifecycleEvent {
    Starting,
    Started,
    StartFailed(String),
    Stopping { restart: bool, exit_process: bool },
    Stopped { state: ServerState, drained: bool },
}

#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&LifecycleEvent) -> bool) -> usize {
        self.events().iter().filter(|event| matches(event)).count()
    }

    fn record(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl LifecycleReporter for RecordingReporter {
    fn server_starting(&self, _config: &Config) {
        self.record(LifecycleEvent::Starting);
    }

    fn server_started(&self, _endpoint: &str) {
        self.record(LifecycleEvent::Started);
    }

    fn start_failed(&self, error: &ServerError) {
        self.record(LifecycleEvent::StartFailed(error.to_string()));
    }

    fn server_stopping(&self, restart: bool, exit_process: bool) {
        self.record(LifecycleEvent::Stopping {
            restart,
            exit_process,
        });
    }

    fn server_stopped(&self, state: ServerState, drained: bool) {
        self.record(LifecycleEvent::Stopped { state, drained });
    }
}

/// Process exit that only remembers the requested codes.
#[derive(Debug, Default)]
pub(crate) struct RecordingExit {
    codes: Mutex<Vec<i32>>,
}

impl RecordingExit {
    pub(crate) fn codes(&self) -> Vec<i32> {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(code);
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingRestart {
    calls: AtomicUsize,
}

impl RecordingRestart {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RestartHook for RecordingRestart {
    fn relaunch(&self) -> Result<(), RelaunchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Runner that needs [`REQUIRED_INPUT`] and writes [`PRODUCED_OUTPUT`].
#[derive(Debug, Default)]
pub(crate) struct InputCheckingRunner;

impl AnalysisRunner for InputCheckingRunner {
    fn run(
        &self,
        job: &AnalysisJob<'_>,
        progress: &dyn ProgressSink,
        artifacts: &mut JobArtifacts,
    ) -> Result<AnalysisResult, JobError> {
        if !job.working_dir.join(REQUIRED_INPUT).is_file() {
            return Err(JobError::MissingInput(format!(
                "input file '{REQUIRED_INPUT}' was not supplied"
            )));
        }
        progress.progress("Running equivalent stress analysis...");
        let output = job.working_dir.join(PRODUCED_OUTPUT);
        fs::write(&output, "dossier").map_err(|error| JobError::io("writing dossier", error))?;
        artifacts.outputs.push(output);
        Ok(AnalysisResult::FastEquivalentStress {
            equivalent_stress: EQUIVALENT_STRESS,
        })
    }
}

/// [`InputCheckingRunner`] that first sleeps for `delay`.
#[derive(Debug)]
pub(crate) struct SlowRunner {
    pub(crate) delay: Duration,
}

impl AnalysisRunner for SlowRunner {
    fn run(
        &self,
        job: &AnalysisJob<'_>,
        progress: &dyn ProgressSink,
        artifacts: &mut JobArtifacts,
    ) -> Result<AnalysisResult, JobError> {
        thread::sleep(self.delay);
        InputCheckingRunner.run(job, progress, artifacts)
    }
}

mock! {
    pub(crate) Exchange {}
    impl BlobStore for Exchange {
        fn get(&self, url: &str, destination: &Path) -> Result<(), BlobError>;
        fn put(&self, source: &Path, name: &str) -> Result<String, BlobError>;
    }
}

/// Blob store serving `archive` at [`INPUT_URL`] and counting uploads.
pub(crate) fn exchange_serving(archive: PathBuf, uploads: Arc<AtomicUsize>) -> MockExchange {
    let mut exchange = MockExchange::new();
    exchange
        .expect_get()
        .returning(move |url, destination| {
            if url != INPUT_URL {
                return Err(BlobError::NotFound {
                    url: url.to_owned(),
                });
            }
            fs::copy(&archive, destination)
                .map(drop)
                .map_err(|source| BlobError::Transfer {
                    url: url.to_owned(),
                    source,
                })
        });
    exchange.expect_put().returning(move |_, name| {
        uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("outputs/{name}"))
    });
    exchange
}
