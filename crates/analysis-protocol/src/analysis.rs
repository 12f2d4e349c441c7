//! Analysis requests and their results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Request to run one analysis against an input archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Blob-store location of the zipped input files.
    pub download_url: String,
    /// Whether outputs are zipped and uploaded for the client.
    #[serde(default)]
    pub upload_output_files: bool,
    /// Kind-specific parameters.
    pub analysis: Analysis,
}

/// Stress computation performed by an equivalent stress analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressAnalysisType {
    /// Rain-flow fatigue equivalent stress.
    Fatigue,
    /// Crack propagation equivalent stress (PREFFAS model).
    Preffas,
    /// Linear propagation equivalent stress.
    Linear,
}

/// Material description forwarded to ISAMI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsamiMaterial {
    /// Material name.
    pub name: String,
    /// Material specification.
    pub specification: String,
    /// Grain orientation.
    pub orientation: String,
    /// Material configuration.
    pub configuration: String,
}

/// Kind-specific analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Analysis {
    /// SAFE equivalent stress.
    SafeEquivalentStress {
        /// Stress computation.
        analysis_type: StressAnalysisType,
        /// Only the equivalent stress is reported when set.
        fast: bool,
    },
    /// SAFE per-flight damage contribution.
    SafeFlightDamageContribution,
    /// SAFE damage contribution of one loadcase increment.
    SafeDamageContributionIncrement,
    /// SAFE damage angle of one loadcase increment.
    SafeDamageAngleIncrement,
    /// ISAMI equivalent stress.
    IsamiEquivalentStress {
        /// Stress computation.
        analysis_type: StressAnalysisType,
        /// Only the equivalent stress is reported when set.
        fast: bool,
        /// Whether compressive cycles are kept.
        apply_compression: bool,
        /// ISAMI release.
        isami_version: String,
        /// ISAMI sub-release.
        isami_sub_version: String,
        /// Material to analyse.
        material: IsamiMaterial,
    },
}

impl Analysis {
    /// Kind discriminant.
    #[must_use]
    pub const fn kind(&self) -> AnalysisKind {
        match self {
            Self::SafeEquivalentStress { .. } => AnalysisKind::SafeEquivalentStress,
            Self::SafeFlightDamageContribution => AnalysisKind::SafeFlightDamageContribution,
            Self::SafeDamageContributionIncrement => AnalysisKind::SafeDamageContributionIncrement,
            Self::SafeDamageAngleIncrement => AnalysisKind::SafeDamageAngleIncrement,
            Self::IsamiEquivalentStress { .. } => AnalysisKind::IsamiEquivalentStress,
        }
    }
}

/// Analysis kinds without their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    /// See [`Analysis::SafeEquivalentStress`].
    SafeEquivalentStress,
    /// See [`Analysis::SafeFlightDamageContribution`].
    SafeFlightDamageContribution,
    /// See [`Analysis::SafeDamageContributionIncrement`].
    SafeDamageContributionIncrement,
    /// See [`Analysis::SafeDamageAngleIncrement`].
    SafeDamageAngleIncrement,
    /// See [`Analysis::IsamiEquivalentStress`].
    IsamiEquivalentStress,
}

impl AnalysisKind {
    /// Name used in task logs and uploaded archive names.
    #[must_use]
    pub const fn task_name(self) -> &'static str {
        match self {
            Self::SafeEquivalentStress => "SafeEquivalentStress",
            Self::SafeFlightDamageContribution => "SafeFlightDamageContribution",
            Self::SafeDamageContributionIncrement => "SafeDamageContributionIncrement",
            Self::SafeDamageAngleIncrement => "SafeDamageAngleIncrement",
            Self::IsamiEquivalentStress => "IsamiEquivalentStress",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.task_name())
    }
}

/// Kind-specific numeric outcome of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisResult {
    /// Equivalent stress of a fast run.
    FastEquivalentStress {
        /// Equivalent stress.
        equivalent_stress: f64,
    },
    /// Equivalent stress with the spectrum summary of a full run.
    FullEquivalentStress {
        /// Equivalent stress.
        equivalent_stress: f64,
        /// Spectrum validity in flights.
        validity: f64,
        /// Number of counted cycles.
        total_cycles: f64,
        /// Minimum stress of the spectrum.
        min_stress: f64,
        /// Maximum stress of the spectrum.
        max_stress: f64,
        /// Stress ratio.
        r_ratio: f64,
    },
    /// Damage per flight number.
    FlightDamageContribution {
        /// Damage keyed by flight number.
        damages: BTreeMap<u32, f64>,
        /// Damage of the whole spectrum.
        total_damage: f64,
    },
    /// Damage of one loadcase increment.
    DamageContributionIncrement {
        /// Damage.
        damage: f64,
        /// Equivalent stress of the increment.
        stress: f64,
    },
    /// Equivalent stress of one damage angle increment.
    DamageAngleIncrement {
        /// Equivalent stress.
        equivalent_stress: f64,
    },
}

/// Successful analysis outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisComplete {
    /// Numeric results.
    pub result: AnalysisResult,
    /// Location of uploaded outputs, when uploading was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_nested_analysis_tag() {
        let text = r#"{
            "download_url": "in.zip",
            "upload_output_files": true,
            "analysis": {"type": "safe_equivalent_stress", "analysis_type": "preffas", "fast": false}
        }"#;
        let request: AnalysisRequest = serde_json::from_str(text).expect("parse request");
        assert_eq!(
            request.analysis,
            Analysis::SafeEquivalentStress {
                analysis_type: StressAnalysisType::Preffas,
                fast: false,
            }
        );
        assert_eq!(request.analysis.kind().task_name(), "SafeEquivalentStress");
    }

    #[test]
    fn flight_damages_keep_numeric_keys() {
        let result = AnalysisResult::FlightDamageContribution {
            damages: BTreeMap::from([(12, 0.5), (3, 0.25)]),
            total_damage: 0.75,
        };
        let text = serde_json::to_string(&result).expect("serialise result");
        let back: AnalysisResult = serde_json::from_str(&text).expect("parse result");
        assert_eq!(back, result);
    }
}
