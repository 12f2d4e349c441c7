//! Readers for SAFE dossier and log files.
//!
//! Both files are column reports separated by `:`. Markers locate a block and
//! the values sit a fixed number of lines below the marker.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::collab::JobError;

use super::inputs::ElberConstants;

const SPECTRUM_MARKER: &str = " : Nb flight tot";
const RAIN_FLOW_MARKER: &str = " :  (Rain-Flow)";
const LINEAR_MARKER: &str = " subroutine FTEQPRO:";
const FLIGHT_MARKER: &str = "RESULTS FLIGHT NUMBER";
const FLIGHT_DAMAGE_OFFSET: usize = 14;

/// Spectrum summary printed in the dossier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct SpectrumSummary {
    pub(super) validity: i32,
    pub(super) min_stress: f64,
    pub(super) max_stress: f64,
    pub(super) r_ratio: f64,
    pub(super) total_cycles: i32,
}

/// Rain-flow column holding an equivalent stress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StressColumn {
    Fatigue,
    Preffas,
}

impl StressColumn {
    const fn index(self) -> usize {
        match self {
            Self::Fatigue => 3,
            Self::Preffas => 7,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Fatigue => "fatigue",
            Self::Preffas => "preffas",
        }
    }
}

/// Damage per flight and their sum.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct FlightDamages {
    pub(super) damages: BTreeMap<u32, f64>,
    pub(super) total: f64,
}

/// Last spectrum summary of the dossier, if any.
pub(super) fn spectrum_summary(dossier: &str) -> Result<Option<SpectrumSummary>, JobError> {
    let mut summary = None;
    let mut lines = dossier.lines();
    while let Some(line) = lines.next() {
        if !line.starts_with(SPECTRUM_MARKER) {
            continue;
        }
        let Some(values) = lines.nth(1) else {
            break;
        };
        let fields: Vec<&str> = values.split(':').collect();
        summary = Some(SpectrumSummary {
            validity: parse_field(&fields, 1, "validity")?,
            min_stress: parse_field(&fields, 2, "minimum stress")?,
            max_stress: parse_field(&fields, 3, "maximum stress")?,
            r_ratio: parse_field(&fields, 6, "R ratio")?,
            total_cycles: parse_field(&fields, 7, "total cycles")?,
        });
    }
    Ok(summary)
}

/// Equivalent stress from the last rain-flow block of the dossier.
pub(super) fn rain_flow_stress(dossier: &str, column: StressColumn) -> Result<f64, JobError> {
    let mut stress = None;
    let mut lines = dossier.lines();
    while let Some(line) = lines.next() {
        if !line.starts_with(RAIN_FLOW_MARKER) {
            continue;
        }
        let Some(values) = lines.nth(1) else {
            break;
        };
        let fields: Vec<&str> = values.split(':').collect();
        stress = Some(parse_field(&fields, column.index(), column.label())?);
    }
    stress.ok_or_else(|| {
        JobError::Parse(format!(
            "SAFE analysis failed! Cannot find {} equivalent stress in output dossier file.",
            column.label()
        ))
    })
}

/// Effective linear propagation stress reported just before the `FTEQPRO`
/// trace in the log.
pub(super) fn linear_effective_stress(log: &str) -> Result<f64, JobError> {
    let mut previous: Option<&str> = None;
    for line in log.lines() {
        if line.starts_with(LINEAR_MARKER) {
            let fields: Vec<&str> = previous.unwrap_or_default().trim().split(':').collect();
            return parse_field(&fields, 1, "linear propagation stress");
        }
        previous = Some(line);
    }
    Err(JobError::Parse(
        "SAFE analysis failed! Cannot find linear propagation equivalent stress in output log file."
            .to_owned(),
    ))
}

/// Linear propagation equivalent stress for a spectrum of `validity` flights.
#[expect(
    clippy::float_arithmetic,
    reason = "the equivalent stress is defined by a floating-point formula"
)]
pub(super) fn linear_equivalent_stress(
    effective: f64,
    validity: i32,
    elber: ElberConstants,
) -> f64 {
    let closure = 0.9 * (elber.a + (1.0 - elber.a) * 0.1);
    (effective / f64::from(validity)).powf(elber.m.recip()) / closure
}

/// Per-flight damages listed in the log.
#[expect(
    clippy::float_arithmetic,
    reason = "the total damage is a floating-point sum"
)]
pub(super) fn flight_damages(log: &str) -> Result<FlightDamages, JobError> {
    let mut result = FlightDamages::default();
    let mut lines = log.lines();
    while let Some(line) = lines.next() {
        let Some(number) = line.trim().strip_prefix(FLIGHT_MARKER) else {
            continue;
        };
        let flight: u32 = parse_value(number, "flight number")?;
        let Some(values) = lines.nth(FLIGHT_DAMAGE_OFFSET) else {
            break;
        };
        let fields: Vec<&str> = values.split(':').collect();
        let damage: f64 = parse_field(&fields, 5, "flight damage")?;
        result.damages.insert(flight, damage);
        result.total += damage;
    }
    Ok(result)
}

fn parse_field<T: FromStr>(fields: &[&str], index: usize, what: &str) -> Result<T, JobError> {
    let value = fields
        .get(index)
        .ok_or_else(|| JobError::Parse(format!("missing {what} column")))?;
    parse_value(value, what)
}

fn parse_value<T: FromStr>(value: &str, what: &str) -> Result<T, JobError> {
    value
        .trim()
        .parse()
        .map_err(|_| JobError::Parse(format!("invalid {what} '{}'", value.trim())))
}
