//! ISAMI session script and submission file.

use std::path::{MAIN_SEPARATOR, Path};

use analysis_protocol::StressAnalysisType;

use super::IsamiRun;

pub(super) const RUN_SCRIPT_FILE: &str = "isamiRunScript.py";
pub(super) const CONFIG_FILE: &str = "isamiConfigFile.txt";
const SESSION_FILE: &str = "input.czm";

const STEP_PARAMETER: &str = "/CsmMbr_MapProcessParameterSet/CsmMbr_ProcessParameterMap[CaesamStd_StepProcessParameter]/Execute";

/// Python session script creating and running one spectrum analysis.
pub(super) fn run_script(run: &IsamiRun<'_>, sigma: &Path, dir: &Path) -> String {
    let material = run.material;
    let fatigue = run.analysis_type == StressAnalysisType::Fatigue;
    let steps = if fatigue {
        "TRUE;TRUE;FALSE;FALSE"
    } else {
        "TRUE;FALSE;TRUE;FALSE"
    };

    let mut lines = vec![
        "# Python script creating a spectrum analysis".to_owned(),
        "MySession=IANewSession()".to_owned(),
        format!(
            "MySession.LoadMaterial('materialName','{}','{}','Referenced')",
            material.name, material.specification
        ),
        "MySession.CreateStandaloneAnalysis2('analysisName','spectrum_analysis','',".to_owned(),
        "[".to_owned(),
        format!(
            "   ['{STEP_PARAMETER}', 'BA:TRUE:4::{steps}'], # Check Validity; Initiation; Propagation; Residual Strength"
        ),
        "   ['EO[SequenceLoading]/LoadingSequenceType','Enum_LoadingSequenceType:COMPLEX STRESS LOADING'],".to_owned(),
        "   ['EO[SequenceLoading]/EO_COMPLEX_STRESS_LOADING','AirbusEO_DSigmaComplexStressLoading:'],".to_owned(),
        format!(
            "   ['EO[SequenceLoading]/EO_COMPLEX_STRESS_LOADING/SpectrumUrl/Url','Caesam_Url:file:{}'], # Sigma file path",
            sigma.display()
        ),
        "   ['EO[SequenceLoading]/EO_COMPLEX_STRESS_LOADING/AlreadyRainflowed','Enum_AlreadyRainflowed:NOT RAINFLOWED'],".to_owned(),
        "   ['EO[SequenceLoading]/EO_COMPLEX_STRESS_LOADING/PeakMultiplicativeCoefficient','CaesamQty_DIMENSIONLESS:1;none'],".to_owned(),
        "   ['EO[SequenceLoading]/EO_COMPLEX_STRESS_LOADING/PeakStandingStress','D:0'],".to_owned(),
        "   ['EO[FatigueLaw]/StructureMaterial','AirbusEO_TMaterial:materialName'],".to_owned(),
    ];
    if fatigue {
        lines.extend([
            "   ['EO[FatigueLaw]/LawType','Enum_ToggleLawType:Fatigue Law'],".to_owned(),
            "   ['EO[FatigueLaw]/DamageCalculationMethod','Enum_ToggleDamageCalculationMethodGeoIndependent:AFI USER DEFINED'],".to_owned(),
            format!(
                "   ['EO[FatigueLaw]/Orientation_init','Enum_Orientation:{}'], # Damage law orientation (LS/LT/SL/TL/TS)",
                material.orientation
            ),
            format!(
                "   ['EO[FatigueLaw]/Configuration_init','S:Configuration:{}'], # Damage law configuration or failure mode",
                material.configuration
            ),
            "   ['EO[FatigueLaw]/UserDefinedAFI','CaesamQty_PRESSURE:100;MPa'],".to_owned(),
            "   ['EO[FatigueLaw]/FatigueLaw','Enum_ToggleFatigueLaw:AFI LAW'],".to_owned(),
        ]);
    } else {
        let retardation = if run.analysis_type == StressAnalysisType::Preffas {
            "Preffas"
        } else {
            "None"
        };
        let compression = if run.apply_compression { "Yes" } else { "No" };
        lines.extend([
            "   ['EO[FatigueLaw]/LawType','Enum_ToggleLawType:Propagation Law'],".to_owned(),
            "   ['EO[FatigueLaw]/PropagationLaw','Enum_PropagationLaw:Elber'],".to_owned(),
            format!(
                "   ['EO[FatigueLaw]/Orientation_propa','Enum_Orientation:{}'], # Propagation law orientation (LS/LT/SL/TL/TS)",
                material.orientation
            ),
            format!(
                "   ['EO[FatigueLaw]/Configuration_propa','S:Configuration:{}'], # Propagation law configuration",
                material.configuration
            ),
            format!(
                "   ['EO[FatigueLaw]/RetardationModel','Enum_RetardationModel:{retardation}'], # Retardation model"
            ),
            format!(
                "   ['EO[FatigueLaw]/ConsideredCompression','CaesamEnum_YesNo:{compression}'], # Considered compression"
            ),
            "   ['EO[FatigueLaw]/PropagationOmission','CaesamEnum_YesNo:No'],".to_owned(),
        ]);
    }
    lines.extend([
        "]".to_owned(),
        ",True)".to_owned(),
        "MySession.RunAllAnalysis()".to_owned(),
        format!("MySession.Save('{}')", dir.join(SESSION_FILE).display()),
        "MySession.Close()".to_owned(),
    ]);
    lines.join("\n") + "\n"
}

/// Submission file handed to the ISAMI launcher.
pub(super) fn config_file(run: &IsamiRun<'_>, script: &Path, dir: &Path) -> String {
    let job_name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    [
        format!("ISAMI_VERSION {}", run.isami_version),
        format!("LAUNCHER_PARAMETER -application {}", run.isami_sub_version),
        format!("JOB_NAME {job_name}"),
        format!("DATA_HOST_RESULT_DIR {}{MAIN_SEPARATOR}", dir.display()),
        format!("INCLUDE {}", script.display()),
        format!("RUN {}", script.display()),
    ]
    .join("\n")
        + "\n"
}
