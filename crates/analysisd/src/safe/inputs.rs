//! Preparation of SAFE input files.

use std::fs;
use std::path::Path;

use crate::collab::JobError;

pub(super) const MATERIAL_FILE: &str = "material.mat";
pub(super) const SIGMA_FILE: &str = "input.sigma";
pub(super) const OUTPUT_SIGMA_FILE: &str = "output.sigma";

const ELBER_A_PREFIX: &str = "ABREMOD '%ELBA'";
const ELBER_M_PREFIX: &str = "ABREMOD '%ELBN'";
const MATERIAL_NAME_PREFIX: &str = "ABREMOD '%NOMMAT'";

/// Elber crack closure constants of a propagation material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct ElberConstants {
    pub(super) a: f64,
    pub(super) m: f64,
}

/// Copies `material` to `destination`, reading the Elber constants when
/// `read_elber` is set.
pub(super) fn stage_material(
    material: &Path,
    destination: &Path,
    read_elber: bool,
) -> Result<Option<ElberConstants>, JobError> {
    let text = fs::read(material)
        .map_err(|error| JobError::io("failed to read material file", error))?;
    fs::write(destination, &text).map_err(|error| {
        JobError::io("Cannot copy material file to materials directory", error)
    })?;
    if !read_elber {
        return Ok(None);
    }

    let content = String::from_utf8_lossy(&text);
    let mut elber_a = None;
    let mut elber_m = None;
    for line in content.lines() {
        if line.starts_with(ELBER_A_PREFIX) {
            elber_a = Some(quoted_value(line)?);
        } else if line.starts_with(ELBER_M_PREFIX) {
            elber_m = Some(quoted_value(line)?);
        }
    }
    match (elber_a, elber_m) {
        (Some(a), Some(m)) => Ok(Some(ElberConstants { a, m })),
        _ => Err(JobError::Parse(
            "cannot find Elber constants in material file".to_owned(),
        )),
    }
}

fn quoted_value(line: &str) -> Result<f64, JobError> {
    line.split('\'')
        .nth(3)
        .map(str::trim)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| JobError::Parse(format!("malformed material line '{line}'")))
}

/// Writes a copy of `sigma` to `output` naming `material_name` as the
/// material.
pub(super) fn rewrite_sigma(
    sigma: &Path,
    output: &Path,
    material_name: &str,
) -> Result<(), JobError> {
    let bytes =
        fs::read(sigma).map_err(|error| JobError::io("failed to read SIGMA file", error))?;
    let rewritten = String::from_utf8_lossy(&bytes)
        .lines()
        .map(|line| {
            if line.starts_with(MATERIAL_NAME_PREFIX) {
                format!("{MATERIAL_NAME_PREFIX} '{material_name}' ! MATERIAL NAME\n")
            } else {
                format!("{line}\n")
            }
        })
        .collect::<String>();
    fs::write(output, rewritten)
        .map_err(|error| JobError::io("failed to write modified SIGMA file", error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    const MATERIAL: &str = "ABREMOD '%NOM' 'AL2024' ! NAME\n\
                            ABREMOD '%ELBA' ' 0.45 ' ! ELBER A\n\
                            ABREMOD '%ELBN' ' 3.2 ' ! ELBER M\n";

    #[fixture]
    fn dir() -> TempDir {
        TempDir::new().expect("temp dir")
    }

    #[rstest]
    fn staging_copies_the_material_and_reads_elber_constants(dir: TempDir) {
        let material = dir.path().join(MATERIAL_FILE);
        let staged = dir.path().join("task.mat");
        fs::write(&material, MATERIAL).expect("write material");

        let constants = stage_material(&material, &staged, true).expect("stage");
        assert_eq!(constants, Some(ElberConstants { a: 0.45, m: 3.2 }));
        assert_eq!(fs::read_to_string(staged).expect("read"), MATERIAL);
    }

    #[rstest]
    fn non_linear_staging_skips_elber_constants(dir: TempDir) {
        let material = dir.path().join(MATERIAL_FILE);
        fs::write(&material, "ABREMOD '%NOM' 'X'\n").expect("write material");
        let constants =
            stage_material(&material, &dir.path().join("task.mat"), false).expect("stage");
        assert_eq!(constants, None);
    }

    #[rstest]
    fn linear_staging_requires_elber_constants(dir: TempDir) {
        let material = dir.path().join(MATERIAL_FILE);
        fs::write(&material, "ABREMOD '%ELBA' '0.4'\n").expect("write material");
        let result = stage_material(&material, &dir.path().join("task.mat"), true);
        assert!(matches!(result, Err(JobError::Parse(_))));
    }

    #[rstest]
    fn sigma_rewrite_replaces_only_the_material_name(dir: TempDir) {
        let sigma = dir.path().join(SIGMA_FILE);
        let output = dir.path().join(OUTPUT_SIGMA_FILE);
        fs::write(
            &sigma,
            "ABREMOD '%TITLE' 'run'\nABREMOD '%NOMMAT' 'old' ! MATERIAL NAME\nEND\n",
        )
        .expect("write sigma");

        rewrite_sigma(&sigma, &output, "task-7").expect("rewrite");
        assert_eq!(
            fs::read_to_string(output).expect("read"),
            "ABREMOD '%TITLE' 'run'\nABREMOD '%NOMMAT' 'task-7' ! MATERIAL NAME\nEND\n"
        );
    }
}
