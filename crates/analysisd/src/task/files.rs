//! Input download, archive handling and output upload shared by tasks.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use super::{TASK_TARGET, TaskContext, TaskError};
use crate::server::now_ms;

const INPUT_ARCHIVE: &str = "inputs.zip";
const OUTPUT_ARCHIVE: &str = "outputs.zip";

/// Fetches `url` into the working directory and returns the local path.
pub(super) fn download_input(cx: &TaskContext, url: &str) -> Result<PathBuf, TaskError> {
    let destination = cx.working_dir()?.join(INPUT_ARCHIVE);
    cx.server().blob_store().get(url, &destination)?;
    Ok(destination)
}

/// Unpacks every entry of `archive` into `dir`.
pub(super) fn extract_archive(archive: &Path, dir: &Path) -> Result<(), TaskError> {
    let file = File::open(archive)
        .map_err(|error| TaskError::io("failed to open input archive", error))?;
    ZipArchive::new(file)
        .and_then(|mut entries| entries.extract(dir))
        .map_err(|error| TaskError::archive("failed to extract input archive", error))
}

/// Writes `files` into a new archive at `target`, flattened by file name.
pub(super) fn zip_files(files: &[PathBuf], target: &Path) -> Result<(), TaskError> {
    let output = File::create(target)
        .map_err(|error| TaskError::io("failed to create output archive", error))?;
    let mut writer = ZipWriter::new(output);
    for path in files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TaskError::io(
                    format!("output '{}' has no file name", path.display()),
                    io::ErrorKind::InvalidInput.into(),
                )
            })?;
        writer
            .start_file(name, SimpleFileOptions::default())
            .map_err(|error| TaskError::archive("failed to add output to archive", error))?;
        let mut source = File::open(path)
            .map_err(|error| TaskError::io(format!("failed to read '{name}'"), error))?;
        io::copy(&mut source, &mut writer)
            .map_err(|error| TaskError::io(format!("failed to archive '{name}'"), error))?;
    }
    writer
        .finish()
        .map_err(|error| TaskError::archive("failed to finish output archive", error))?;
    Ok(())
}

/// Zips `files` and uploads them as `<alias>_<task>_<millis>.zip`.
///
/// Returns `None` without touching the blob store when there is nothing to
/// ship.
pub(super) fn upload_outputs(
    cx: &TaskContext,
    files: &[PathBuf],
    alias: &str,
    task: &str,
) -> Result<Option<String>, TaskError> {
    if files.is_empty() {
        return Ok(None);
    }
    cx.progress("Zipping output files...");
    let archive = cx.working_dir()?.join(OUTPUT_ARCHIVE);
    zip_files(files, &archive)?;

    cx.progress("Uploading output files to central database...");
    let name = upload_name(alias, task, now_ms());
    let url = cx.server().blob_store().put(&archive, &name)?;
    info!(
        target: TASK_TARGET,
        alias,
        task,
        url = %url,
        files = files.len(),
        "output files uploaded"
    );
    Ok(Some(url))
}

/// Blob name of an output archive. The alias is reduced to one plain path
/// component so any client name yields a valid exchange location.
pub(super) fn upload_name(alias: &str, task: &str, millis: u64) -> String {
    let cleaned: String = alias
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let component = if cleaned.is_empty() { "client" } else { cleaned.as_str() };
    format!("{component}_{task}_{millis}.zip")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{BlobStore, ExchangeDirectory};
    use rstest::rstest;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn zipped_outputs_extract_back_by_file_name() {
        let dir = TempDir::new().expect("temp dir");
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).expect("nested dir");
        let dossier = nested.join("output.dossier");
        let log = dir.path().join("output.log");
        fs::write(&dossier, "dossier").expect("dossier");
        fs::write(&log, "log").expect("log");

        let archive = dir.path().join("outputs.zip");
        zip_files(&[dossier, log], &archive).expect("zip");

        let mut entries = ZipArchive::new(File::open(&archive).expect("open")).expect("read zip");
        assert_eq!(entries.len(), 2);
        let mut text = String::new();
        entries
            .by_name("output.dossier")
            .expect("dossier entry")
            .read_to_string(&mut text)
            .expect("read entry");
        assert_eq!(text, "dossier");

        let out = dir.path().join("out");
        extract_archive(&archive, &out).expect("extract");
        assert_eq!(fs::read_to_string(out.join("output.log")).expect("log"), "log");
    }

    #[test]
    fn corrupt_archives_are_reported() {
        let dir = TempDir::new().expect("temp dir");
        let archive = dir.path().join("inputs.zip");
        fs::write(&archive, b"not a zip").expect("write");
        let error = extract_archive(&archive, dir.path()).expect_err("corrupt");
        assert!(matches!(error, TaskError::Archive { .. }));
    }

    #[rstest]
    #[case("bench-3", "bench-3_SafeESA_17.zip")]
    #[case("/etc/passwd", "_etc_passwd_SafeESA_17.zip")]
    #[case("../../escape", "______escape_SafeESA_17.zip")]
    #[case("", "client_SafeESA_17.zip")]
    fn upload_names_are_single_components(#[case] alias: &str, #[case] expected: &str) {
        assert_eq!(upload_name(alias, "SafeESA", 17), expected);
    }

    #[test]
    fn hostile_aliases_still_upload() {
        let dir = TempDir::new().expect("temp dir");
        let source = dir.path().join("outputs.zip");
        fs::write(&source, "zip").expect("archive");
        let exchange = ExchangeDirectory::new(dir.path().join("exchange"));

        let url = exchange
            .put(&source, &upload_name("../..//root", "SafeESA", 1))
            .expect("sanitised name is accepted");
        assert!(dir.path().join("exchange").join(url).is_file());
    }
}
