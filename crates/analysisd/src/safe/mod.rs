//! Runner driving the SAFE fatigue tool.
//!
//! A run stages the material into the shared materials directory under the
//! working directory's name, points the SIGMA input at it, launches
//! `<command> aspectre output.sigma` and reads the results back from the
//! dossier and log files.

mod inputs;
mod output;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use analysis_config::Config;
use analysis_protocol::{Analysis, AnalysisResult, StressAnalysisType};
use tracing::{debug, info};

use crate::collab::{AnalysisJob, AnalysisRunner, JobArtifacts, JobError, ProgressSink};

use self::inputs::{
    ElberConstants, MATERIAL_FILE, OUTPUT_SIGMA_FILE, SIGMA_FILE, rewrite_sigma, stage_material,
};
use self::output::{
    StressColumn, flight_damages, linear_effective_stress, linear_equivalent_stress,
    rain_flow_stress, spectrum_summary,
};

const SAFE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::safe");

const DOSSIER_FILE: &str = "output.dossier";
const LOG_FILE: &str = "output.log";
const ERREURS_FILE: &str = "output.erreurs";

#[derive(Debug, Clone, Copy)]
enum SafeRun {
    EquivalentStress {
        analysis_type: StressAnalysisType,
        fast: bool,
    },
    FlightDamageContribution,
    DamageContributionIncrement,
    DamageAngleIncrement,
}

impl SafeRun {
    fn from_analysis(analysis: &Analysis) -> Result<Self, JobError> {
        match analysis {
            Analysis::SafeEquivalentStress {
                analysis_type,
                fast,
            } => Ok(Self::EquivalentStress {
                analysis_type: *analysis_type,
                fast: *fast,
            }),
            Analysis::SafeFlightDamageContribution => Ok(Self::FlightDamageContribution),
            Analysis::SafeDamageContributionIncrement => Ok(Self::DamageContributionIncrement),
            Analysis::SafeDamageAngleIncrement => Ok(Self::DamageAngleIncrement),
            Analysis::IsamiEquivalentStress { .. } => Err(JobError::Unsupported(analysis.kind())),
        }
    }

    const fn is_linear(self) -> bool {
        matches!(
            self,
            Self::EquivalentStress {
                analysis_type: StressAnalysisType::Linear,
                ..
            }
        )
    }
}

struct ToolFiles {
    dossier: PathBuf,
    log: PathBuf,
    erreurs: PathBuf,
}

impl ToolFiles {
    fn in_dir(dir: &Path) -> Self {
        Self {
            dossier: dir.join(DOSSIER_FILE),
            log: dir.join(LOG_FILE),
            erreurs: dir.join(ERREURS_FILE),
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

/// [`AnalysisRunner`] for the four SAFE analysis kinds.
#[derive(Debug, Clone)]
pub struct SafeRunner {
    command: String,
    materials_dir: PathBuf,
}

impl SafeRunner {
    /// Runner launching `command` and staging materials in `materials_dir`.
    pub fn new(command: impl Into<String>, materials_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            materials_dir: materials_dir.into(),
        }
    }

    /// Runner configured from `safe_command` and `safe_materials_dir`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.safe_command.clone(),
            config.safe_materials_dir.as_std_path(),
        )
    }

    fn execute(
        &self,
        run: SafeRun,
        job: &AnalysisJob<'_>,
        files: &ToolFiles,
        progress: &dyn ProgressSink,
        artifacts: &mut JobArtifacts,
    ) -> Result<AnalysisResult, JobError> {
        let dir = job.working_dir;
        let material = dir.join(MATERIAL_FILE);
        let sigma = dir.join(SIGMA_FILE);
        if !material.is_file() || !sigma.is_file() {
            return Err(JobError::MissingInput(
                "Cannot find input MAT and SIGMA files.".to_owned(),
            ));
        }

        progress.progress("Copying material file to material database...");
        let material_name = dir
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                JobError::MissingInput(
                    "Cannot copy material file to SAFE materials directory. No analysis directory found."
                        .to_owned(),
                )
            })?;
        fs::create_dir_all(&self.materials_dir)
            .map_err(|error| JobError::io("failed to create materials directory", error))?;
        let staged = self.materials_dir.join(format!("{material_name}.mat"));
        artifacts.side_files.push(staged.clone());
        let elber = stage_material(&material, &staged, run.is_linear())?;

        progress.progress("Modifying SIGMA file...");
        rewrite_sigma(&sigma, &dir.join(OUTPUT_SIGMA_FILE), material_name)?;

        progress.progress("Analysis running...");
        self.launch(dir, files)?;

        progress.progress("Extracting analysis results...");
        extract_result(run, files, elber)
    }

    fn launch(&self, dir: &Path, files: &ToolFiles) -> Result<(), JobError> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&files.log)
            .map_err(|error| JobError::io("failed to open SAFE log file", error))?;
        let log_errors = log
            .try_clone()
            .map_err(|error| JobError::io("failed to open SAFE log file", error))?;

        info!(
            target: SAFE_TARGET,
            command = %self.command,
            dir = %dir.display(),
            "launching SAFE"
        );
        let status = Command::new(&self.command)
            .args(["aspectre", OUTPUT_SIGMA_FILE])
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_errors)
            .status()
            .map_err(|error| JobError::io(format!("failed to launch '{}'", self.command), error))?;
        debug!(target: SAFE_TARGET, %status, "SAFE exited");

        if !status.success() {
            return Err(JobError::ToolFailed(
                "SAFE analysis failed! See 'output.log' file for details.".to_owned(),
            ));
        }
        if !files.dossier.is_file() || files.erreurs.exists() {
            return Err(JobError::ToolErrors(
                "SAFE analysis failed! See 'output.erreurs' file for details.".to_owned(),
            ));
        }
        Ok(())
    }
}

impl AnalysisRunner for SafeRunner {
    fn run(
        &self,
        job: &AnalysisJob<'_>,
        progress: &dyn ProgressSink,
        artifacts: &mut JobArtifacts,
    ) -> Result<AnalysisResult, JobError> {
        let run = SafeRun::from_analysis(job.analysis)?;
        let files = ToolFiles::in_dir(job.working_dir);
        let result = self.execute(run, job, &files, progress, artifacts);

        match (run, result.is_ok()) {
            (SafeRun::EquivalentStress { .. }, true) => {
                artifacts.outputs = ToolFiles::existing([&files.dossier]);
            }
            (SafeRun::EquivalentStress { .. } | SafeRun::FlightDamageContribution, false) => {
                artifacts.diagnostics =
                    ToolFiles::existing([&files.dossier, &files.log, &files.erreurs]);
            }
            _ => {}
        }
        result
    }
}

fn read_report(path: &Path) -> Result<String, JobError> {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|error| JobError::io(format!("failed to read '{}'", path.display()), error))
}

fn missing_summary() -> JobError {
    JobError::Parse("SAFE analysis failed! Cannot find spectrum summary in output dossier file.".to_owned())
}

fn extract_result(
    run: SafeRun,
    files: &ToolFiles,
    elber: Option<ElberConstants>,
) -> Result<AnalysisResult, JobError> {
    match run {
        SafeRun::EquivalentStress {
            analysis_type,
            fast,
        } => {
            let dossier = read_report(&files.dossier)?;
            let summary = spectrum_summary(&dossier)?;
            let equivalent_stress = match analysis_type {
                StressAnalysisType::Fatigue => rain_flow_stress(&dossier, StressColumn::Fatigue)?,
                StressAnalysisType::Preffas => rain_flow_stress(&dossier, StressColumn::Preffas)?,
                StressAnalysisType::Linear => {
                    let effective = linear_effective_stress(&read_report(&files.log)?)?;
                    let validity = summary.ok_or_else(missing_summary)?.validity;
                    let constants = elber.ok_or_else(|| {
                        JobError::Parse("cannot find Elber constants in material file".to_owned())
                    })?;
                    linear_equivalent_stress(effective, validity, constants)
                }
            };
            if fast {
                return Ok(AnalysisResult::FastEquivalentStress { equivalent_stress });
            }
            let spectrum = summary.ok_or_else(missing_summary)?;
            Ok(AnalysisResult::FullEquivalentStress {
                equivalent_stress,
                validity: f64::from(spectrum.validity),
                total_cycles: f64::from(spectrum.total_cycles),
                min_stress: spectrum.min_stress,
                max_stress: spectrum.max_stress,
                r_ratio: spectrum.r_ratio,
            })
        }
        SafeRun::FlightDamageContribution => {
            let flights = flight_damages(&read_report(&files.log)?)?;
            Ok(AnalysisResult::FlightDamageContribution {
                damages: flights.damages,
                total_damage: flights.total,
            })
        }
        SafeRun::DamageContributionIncrement => {
            let flights = flight_damages(&read_report(&files.log)?)?;
            if flights.damages.is_empty() || flights.total.abs() < f64::EPSILON {
                return Err(JobError::Parse(
                    "SAFE analysis failed! Cannot extract fatigue damages from output log file."
                        .to_owned(),
                ));
            }
            let stress = rain_flow_stress(&read_report(&files.dossier)?, StressColumn::Fatigue)?;
            Ok(AnalysisResult::DamageContributionIncrement {
                damage: flights.total,
                stress,
            })
        }
        SafeRun::DamageAngleIncrement => {
            let equivalent_stress =
                rain_flow_stress(&read_report(&files.dossier)?, StressColumn::Fatigue)?;
            Ok(AnalysisResult::DamageAngleIncrement { equivalent_stress })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use analysis_protocol::IsamiMaterial;
    use rstest::{fixture, rstest};
    use std::cell::RefCell;
    use tempfile::TempDir;

    const FAKE_SAFE: &str = r#"
printf 'SAFE run %s\n' "$1"
cat > output.dossier <<'DOSSIER'
 : Nb flight tot
 : ---
 :  500 : -10.0 : 150.0 : 0 : 0 : 0.2 : 800
 :  (Rain-Flow)
 : ---
 : a : b : 111.5 : c : d : e : 77.25
DOSSIER
"#;

    #[derive(Default)]
    struct RecordedProgress(RefCell<Vec<String>>);

    impl ProgressSink for RecordedProgress {
        fn progress(&self, text: &str) {
            self.0.borrow_mut().push(text.to_owned());
        }
    }

    struct Rig {
        _root: TempDir,
        work: PathBuf,
        materials: PathBuf,
    }

    #[fixture]
    fn rig() -> Rig {
        let root = TempDir::new().expect("temp dir");
        let work = root.path().join("SafeEquivalentStress-1-1");
        let materials = root.path().join("materials");
        fs::create_dir_all(&work).expect("work dir");
        fs::write(work.join(MATERIAL_FILE), "ABREMOD '%NOM' 'AL'\n").expect("material");
        fs::write(work.join(SIGMA_FILE), "ABREMOD '%NOMMAT' 'x'\n").expect("sigma");
        // `sh aspectre output.sigma` runs this script.
        fs::write(work.join("aspectre"), FAKE_SAFE).expect("script");
        Rig {
            _root: root,
            work,
            materials,
        }
    }

    fn run(rig: &Rig, analysis: &Analysis) -> (Result<AnalysisResult, JobError>, JobArtifacts) {
        let runner = SafeRunner::new("sh", &rig.materials);
        let job = AnalysisJob {
            analysis,
            working_dir: &rig.work,
            alias: "rig",
        };
        let mut artifacts = JobArtifacts::default();
        let result = runner.run(&job, &RecordedProgress::default(), &mut artifacts);
        (result, artifacts)
    }

    #[rstest]
    fn fast_fatigue_run_reports_the_rain_flow_stress(rig: Rig) {
        let analysis = Analysis::SafeEquivalentStress {
            analysis_type: StressAnalysisType::Fatigue,
            fast: true,
        };
        let (result, artifacts) = run(&rig, &analysis);

        assert_eq!(
            result.expect("run"),
            AnalysisResult::FastEquivalentStress {
                equivalent_stress: 111.5
            }
        );
        assert_eq!(artifacts.outputs, vec![rig.work.join(DOSSIER_FILE)]);
        assert_eq!(
            artifacts.side_files,
            vec![rig.materials.join("SafeEquivalentStress-1-1.mat")]
        );
        let sigma = fs::read_to_string(rig.work.join(OUTPUT_SIGMA_FILE)).expect("sigma");
        assert!(sigma.contains("'SafeEquivalentStress-1-1'"));
        let log = fs::read_to_string(rig.work.join(LOG_FILE)).expect("log");
        assert!(log.contains("SAFE run output.sigma"));
    }

    #[rstest]
    fn full_preffas_run_reports_the_spectrum(rig: Rig) {
        let analysis = Analysis::SafeEquivalentStress {
            analysis_type: StressAnalysisType::Preffas,
            fast: false,
        };
        let (result, _) = run(&rig, &analysis);
        assert_eq!(
            result.expect("run"),
            AnalysisResult::FullEquivalentStress {
                equivalent_stress: 77.25,
                validity: 500.0,
                total_cycles: 800.0,
                min_stress: -10.0,
                max_stress: 150.0,
                r_ratio: 0.2,
            }
        );
    }

    #[rstest]
    fn missing_inputs_fail_before_launch(rig: Rig) {
        fs::remove_file(rig.work.join(SIGMA_FILE)).expect("remove sigma");
        let (result, artifacts) = run(&rig, &Analysis::SafeDamageAngleIncrement);
        let error = result.expect_err("missing input");
        assert_eq!(error.to_string(), "Cannot find input MAT and SIGMA files.");
        assert_eq!(artifacts, JobArtifacts::default());
    }

    #[rstest]
    fn error_report_fails_the_run_and_ships_diagnostics(rig: Rig) {
        fs::write(rig.work.join("aspectre"), "touch output.dossier output.erreurs\n")
            .expect("script");
        let (result, artifacts) = run(&rig, &Analysis::SafeFlightDamageContribution);
        assert!(matches!(result, Err(JobError::ToolErrors(_))));
        assert_eq!(artifacts.diagnostics.len(), 3);
    }

    #[rstest]
    fn failing_tool_is_reported(rig: Rig) {
        fs::write(rig.work.join("aspectre"), "exit 3\n").expect("script");
        let (result, _) = run(&rig, &Analysis::SafeDamageAngleIncrement);
        assert!(matches!(result, Err(JobError::ToolFailed(_))));
    }

    #[rstest]
    fn isami_requests_are_unsupported(rig: Rig) {
        let analysis = Analysis::IsamiEquivalentStress {
            analysis_type: StressAnalysisType::Fatigue,
            fast: true,
            apply_compression: false,
            isami_version: "v9".to_owned(),
            isami_sub_version: "1".to_owned(),
            material: IsamiMaterial {
                name: "AL".to_owned(),
                specification: "spec".to_owned(),
                orientation: "L".to_owned(),
                configuration: "c".to_owned(),
            },
        };
        let (result, _) = run(&rig, &analysis);
        assert!(matches!(result, Err(JobError::Unsupported(_))));
    }
}
