//! Result extraction from ISAMI's CSV and HTML reports.

use std::str::FromStr;

use analysis_protocol::{AnalysisResult, StressAnalysisType};

use crate::collab::JobError;

/// Equivalent stress from the fast-run CSV report.
pub(super) fn csv_equivalent_stress(
    csv: &str,
    analysis_type: StressAnalysisType,
) -> Result<f64, JobError> {
    let (section, label) = match analysis_type {
        StressAnalysisType::Fatigue => ("FATIGUE INITIATION RESULTS", "fatigue"),
        StressAnalysisType::Preffas | StressAnalysisType::Linear => {
            ("PROPAGATION RESULTS", "propagation")
        }
    };
    csv.lines()
        .skip_while(|line| !line.starts_with(section))
        .find(|line| line.contains("Equivalent stress"))
        .and_then(|line| line.trim().split(';').nth(1))
        .map(|value| parse_value(value, "equivalent stress"))
        .transpose()?
        .ok_or_else(|| {
            JobError::Parse(format!(
                "ISAMI analysis failed! Cannot find {label} equivalent stress in output csv file."
            ))
        })
}

/// Equivalent stress and spectrum summary from the full-run HTML report.
pub(super) fn html_full_result(
    html: &str,
    analysis_type: StressAnalysisType,
) -> Result<AnalysisResult, JobError> {
    let (section, label) = match analysis_type {
        StressAnalysisType::Fatigue => ("FATIGUE RESULTS:", "fatigue"),
        StressAnalysisType::Preffas | StressAnalysisType::Linear => {
            ("MISSION PROPAGATION RESULTS", "propagation")
        }
    };
    let equivalent_stress = html
        .lines()
        .skip_while(|line| !line.contains(section))
        .find(|line| line.contains("EQUIVALENT STRESS"))
        .and_then(|line| between(line, "</TH><TD ALIGN=CENTER>", "</TD></TR>"))
        .map(|value| parse_value::<f64>(value, "equivalent stress"))
        .transpose()?
        .ok_or_else(|| {
            JobError::Parse(format!(
                "ISAMI analysis failed! Cannot find {label} equivalent stress in output HTML file."
            ))
        })?;

    let summary = spectrum_summary(html)?.ok_or_else(|| {
        JobError::Parse(
            "ISAMI analysis failed! Cannot find spectrum summary in output HTML file.".to_owned(),
        )
    })?;
    Ok(AnalysisResult::FullEquivalentStress {
        equivalent_stress,
        validity: f64::from(summary.validity),
        total_cycles: f64::from(summary.total_cycles),
        min_stress: summary.min_stress,
        max_stress: summary.max_stress,
        r_ratio: summary.r_ratio,
    })
}

struct Summary {
    validity: i32,
    total_cycles: i32,
    min_stress: f64,
    max_stress: f64,
    r_ratio: f64,
}

fn spectrum_summary(html: &str) -> Result<Option<Summary>, JobError> {
    let mut lines = html
        .lines()
        .skip_while(|line| !line.contains("Total Number of Flights:"));
    let Some(flights) = lines.next() else {
        return Ok(None);
    };
    let Some(values) = lines.find(|line| line.contains("Values")) else {
        return Ok(None);
    };

    let validity = flights
        .split_once(':')
        .map(|(_, rest)| rest.split("<BR>").next().unwrap_or(rest))
        .ok_or_else(|| JobError::Parse("missing validity".to_owned()))?;
    let columns: Vec<&str> = values.split("</TD><TD>").collect();
    let column = |index: usize| {
        columns
            .get(index)
            .copied()
            .ok_or_else(|| JobError::Parse(format!("missing spectrum column {index}")))
    };
    let min_stress = column(0)?
        .split_once("</TH><TD>")
        .map(|(_, value)| value)
        .ok_or_else(|| JobError::Parse("missing minimum stress".to_owned()))?;
    let cycles = column(5)?;
    let total_cycles = cycles.split("</TD></TR>").next().unwrap_or(cycles);

    Ok(Some(Summary {
        validity: parse_value(validity, "validity")?,
        total_cycles: parse_value(total_cycles, "total cycles")?,
        min_stress: parse_value(min_stress, "minimum stress")?,
        max_stress: parse_value(column(1)?, "maximum stress")?,
        r_ratio: parse_value(column(4)?, "stress ratio")?,
    }))
}

fn between<'a>(line: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let (_, rest) = line.split_once(start)?;
    Some(rest.split(end).next().unwrap_or(rest))
}

fn parse_value<T: FromStr>(value: &str, what: &str) -> Result<T, JobError> {
    value
        .trim()
        .parse()
        .map_err(|_| JobError::Parse(format!("invalid {what} '{}'", value.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CSV: &str = "\
HEADER;x
FATIGUE INITIATION RESULTS
Damage;0.125
Equivalent stress;123.4;MPa
PROPAGATION RESULTS
Life;4000
Equivalent stress;98.5;MPa
";

    const HTML: &str = "\
<HTML><BODY>
<P>Total Number of Flights: 500<BR>
<TR><TH>Header</TH></TR>
<TR><TH>Values</TH><TD>-10.5</TD><TD>150.25</TD><TD>3</TD><TD>4</TD><TD>0.2</TD><TD>800</TD></TR>
<H2>FATIGUE RESULTS:</H2>
<TR><TH>EQUIVALENT STRESS</TH><TD ALIGN=CENTER>121.0</TD></TR>
<H2>MISSION PROPAGATION RESULTS</H2>
<TR><TH>EQUIVALENT STRESS</TH><TD ALIGN=CENTER>97.0</TD></TR>
</BODY></HTML>
";

    #[rstest]
    #[case(StressAnalysisType::Fatigue, 123.4)]
    #[case(StressAnalysisType::Preffas, 98.5)]
    #[case(StressAnalysisType::Linear, 98.5)]
    fn csv_sections_follow_the_analysis_type(
        #[case] analysis_type: StressAnalysisType,
        #[case] expected: f64,
    ) {
        assert_eq!(
            csv_equivalent_stress(CSV, analysis_type).expect("stress"),
            expected
        );
    }

    #[test]
    fn csv_without_the_section_is_a_parse_failure() {
        let csv = "PROPAGATION RESULTS\nEquivalent stress;1\n";
        let error = csv_equivalent_stress(csv, StressAnalysisType::Fatigue)
            .expect_err("no fatigue section");
        assert_eq!(
            error.to_string(),
            "failed to parse analysis results: ISAMI analysis failed! Cannot find fatigue equivalent stress in output csv file."
        );
    }

    #[rstest]
    #[case(StressAnalysisType::Fatigue, 121.0)]
    #[case(StressAnalysisType::Preffas, 97.0)]
    fn html_reports_carry_the_spectrum_summary(
        #[case] analysis_type: StressAnalysisType,
        #[case] expected: f64,
    ) {
        assert_eq!(
            html_full_result(HTML, analysis_type).expect("result"),
            AnalysisResult::FullEquivalentStress {
                equivalent_stress: expected,
                validity: 500.0,
                total_cycles: 800.0,
                min_stress: -10.5,
                max_stress: 150.25,
                r_ratio: 0.2,
            }
        );
    }

    #[test]
    fn html_without_summary_is_a_parse_failure() {
        let html = "FATIGUE RESULTS:\n<TR><TH>EQUIVALENT STRESS</TH><TD ALIGN=CENTER>1.0</TD></TR>\n";
        let error = html_full_result(html, StressAnalysisType::Fatigue).expect_err("no summary");
        assert!(error.to_string().contains("spectrum summary"));
    }
}
