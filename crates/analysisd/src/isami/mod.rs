//! Runner submitting ISAMI equivalent stress analyses.
//!
//! A run writes a session script and a submission file into the working
//! directory and hands the submission file to the configured launcher. The
//! launcher returns once the job is queued; ISAMI signals completion by
//! creating an `out_*` file in the working directory, which the runner
//! watches for before reading the CSV and HTML reports.

mod report;
mod script;

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use analysis_config::Config;
use analysis_protocol::{Analysis, AnalysisResult, IsamiMaterial, StressAnalysisType};
use notify::{Event, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::collab::{AnalysisJob, AnalysisRunner, JobArtifacts, JobError, ProgressSink};

use self::report::{csv_equivalent_stress, html_full_result};
use self::script::{CONFIG_FILE, RUN_SCRIPT_FILE, config_file, run_script};

const ISAMI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::isami");

const SIGMA_FILE: &str = "input.sigma";
const SUBMISSION_LOG: &str = "submission.log";
const COMPLETION_PREFIX: &str = "out_";
const RESULT_DIR: [&str; 3] = ["input.caesamexternalfiles", "spectrum_analysis", "analysisName"];

/// Upper bound between two scans of the working directory.
const RESCAN_INTERVAL: Duration = Duration::from_millis(500);

/// Parameters of one ISAMI equivalent stress run.
#[derive(Debug, Clone, Copy)]
struct IsamiRun<'a> {
    analysis_type: StressAnalysisType,
    fast: bool,
    apply_compression: bool,
    isami_version: &'a str,
    isami_sub_version: &'a str,
    material: &'a IsamiMaterial,
}

impl<'a> IsamiRun<'a> {
    fn from_analysis(analysis: &'a Analysis) -> Result<Self, JobError> {
        match analysis {
            Analysis::IsamiEquivalentStress {
                analysis_type,
                fast,
                apply_compression,
                isami_version,
                isami_sub_version,
                material,
            } => Ok(Self {
                analysis_type: *analysis_type,
                fast: *fast,
                apply_compression: *apply_compression,
                isami_version,
                isami_sub_version,
                material,
            }),
            other => Err(JobError::Unsupported(other.kind())),
        }
    }
}

struct ReportFiles {
    html: PathBuf,
    csv: PathBuf,
    log: PathBuf,
    out: Option<PathBuf>,
}

impl ReportFiles {
    fn in_dir(dir: &Path) -> Self {
        let results = RESULT_DIR.iter().fold(dir.to_path_buf(), |path, part| path.join(part));
        Self {
            html: results.join("analysisName.html"),
            csv: results.join("analysisName.csv"),
            log: dir.join(SUBMISSION_LOG),
            out: None,
        }
    }

    fn existing<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Vec<PathBuf> {
        paths
            .into_iter()
            .filter(|path| path.is_file())
            .cloned()
            .collect()
    }
}

/// [`AnalysisRunner`] for ISAMI equivalent stress analyses.
#[derive(Debug, Clone)]
pub struct IsamiRunner {
    command: String,
    completion_timeout: Option<Duration>,
}

impl IsamiRunner {
    /// Runner submitting jobs with `command`.
    ///
    /// Whitespace separates the program from leading arguments; the
    /// submission file name is appended. `None` waits for completion
    /// without limit.
    #[must_use]
    pub fn new(command: impl Into<String>, completion_timeout: Option<Duration>) -> Self {
        Self {
            command: command.into(),
            completion_timeout,
        }
    }

    /// Runner configured from `isami_command` and
    /// `isami_completion_timeout_secs`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.isami_command.clone(), config.isami_completion_timeout())
    }

    fn execute(
        &self,
        run: &IsamiRun<'_>,
        dir: &Path,
        files: &mut ReportFiles,
        progress: &dyn ProgressSink,
    ) -> Result<AnalysisResult, JobError> {
        let sigma = dir.join(SIGMA_FILE);
        if !sigma.is_file() {
            return Err(JobError::MissingInput(
                "Cannot find input SIGMA file.".to_owned(),
            ));
        }

        progress.progress("Creating ISAMI run script file...");
        let script = dir.join(RUN_SCRIPT_FILE);
        write_file(&script, &run_script(run, &sigma, dir))?;

        progress.progress("Creating ISAMI run configuration file...");
        write_file(&dir.join(CONFIG_FILE), &config_file(run, &script, dir))?;

        progress.progress("Analysis running...");
        self.submit(dir, files)?;
        let out = self.wait_for_completion(dir)?;
        files.out = Some(out.clone());
        if !files.html.is_file() || !files.csv.is_file() {
            let name = out
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(JobError::ToolErrors(format!(
                "ISAMI analysis failed! See '{name}' file for details."
            )));
        }

        progress.progress("Extracting analysis results...");
        if run.fast {
            let csv = read_report(&files.csv)?;
            let equivalent_stress = csv_equivalent_stress(&csv, run.analysis_type)?;
            Ok(AnalysisResult::FastEquivalentStress { equivalent_stress })
        } else {
            html_full_result(&read_report(&files.html)?, run.analysis_type)
        }
    }

    fn submit(&self, dir: &Path, files: &ReportFiles) -> Result<(), JobError> {
        let mut words = self.command.split_whitespace();
        let program = words.next().ok_or_else(|| {
            JobError::ToolFailed("ISAMI submission command is empty.".to_owned())
        })?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&files.log)
            .map_err(|error| JobError::io("failed to open ISAMI submission log", error))?;
        let log_errors = log
            .try_clone()
            .map_err(|error| JobError::io("failed to open ISAMI submission log", error))?;

        info!(
            target: ISAMI_TARGET,
            command = %self.command,
            dir = %dir.display(),
            "submitting ISAMI job"
        );
        let status = Command::new(program)
            .args(words)
            .arg(CONFIG_FILE)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_errors)
            .status()
            .map_err(|error| JobError::io(format!("failed to launch '{program}'"), error))?;
        debug!(target: ISAMI_TARGET, %status, "ISAMI submission exited");

        if status.success() {
            Ok(())
        } else {
            Err(JobError::ToolFailed(format!(
                "ISAMI analysis submission failed! See '{SUBMISSION_LOG}' file for details."
            )))
        }
    }

    /// Waits for the `out_*` completion file and renames it to `<name>.out`.
    fn wait_for_completion(&self, dir: &Path) -> Result<PathBuf, JobError> {
        let (sender, events) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            drop(sender.send(event));
        })
        .map_err(watch_error)?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        let deadline = self
            .completion_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        loop {
            if let Some(signal) = completion_signal(dir)? {
                let renamed = append_extension(&signal);
                fs::rename(&signal, &renamed)
                    .map_err(|error| JobError::io("failed to rename ISAMI output file", error))?;
                info!(
                    target: ISAMI_TARGET,
                    output = %renamed.display(),
                    "ISAMI job finished"
                );
                return Ok(renamed);
            }

            let wait = deadline.map_or(RESCAN_INTERVAL, |until| {
                until.saturating_duration_since(Instant::now())
            });
            if wait.is_zero() {
                let seconds = self.completion_timeout.unwrap_or_default().as_secs();
                return Err(JobError::ToolFailed(format!(
                    "ISAMI analysis did not finish within {seconds} seconds."
                )));
            }
            match events.recv_timeout(wait.min(RESCAN_INTERVAL)) {
                Ok(Ok(event)) => {
                    debug!(target: ISAMI_TARGET, kind = ?event.kind, "working directory changed");
                }
                Ok(Err(error)) => {
                    warn!(target: ISAMI_TARGET, error = %error, "file watch reported an error");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(JobError::io(
                        "file watch on the working directory stopped",
                        io::Error::other("watcher disconnected"),
                    ));
                }
            }
        }
    }
}

impl AnalysisRunner for IsamiRunner {
    fn run(
        &self,
        job: &AnalysisJob<'_>,
        progress: &dyn ProgressSink,
        artifacts: &mut JobArtifacts,
    ) -> Result<AnalysisResult, JobError> {
        let run = IsamiRun::from_analysis(job.analysis)?;
        let mut files = ReportFiles::in_dir(job.working_dir);
        let result = self.execute(&run, job.working_dir, &mut files, progress);

        if result.is_ok() {
            artifacts.outputs = ReportFiles::existing([&files.html]);
        } else {
            artifacts.diagnostics = ReportFiles::existing(
                [&files.html, &files.log, &files.csv]
                    .into_iter()
                    .chain(files.out.as_ref()),
            );
        }
        result
    }
}

fn completion_signal(dir: &Path) -> Result<Option<PathBuf>, JobError> {
    let entries = fs::read_dir(dir)
        .map_err(|error| JobError::io("failed to scan the working directory", error))?;
    Ok(entries.filter_map(Result::ok).map(|entry| entry.path()).find(|path| {
        path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(COMPLETION_PREFIX))
    }))
}

fn append_extension(path: &Path) -> PathBuf {
    let mut renamed = path.as_os_str().to_owned();
    renamed.push(".out");
    PathBuf::from(renamed)
}

fn write_file(path: &Path, contents: &str) -> Result<(), JobError> {
    fs::write(path, contents)
        .map_err(|error| JobError::io(format!("failed to write '{}'", path.display()), error))
}

fn read_report(path: &Path) -> Result<String, JobError> {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|error| JobError::io(format!("failed to read '{}'", path.display()), error))
}

fn watch_error(error: notify::Error) -> JobError {
    JobError::io("failed to watch the working directory", io::Error::other(error))
}
