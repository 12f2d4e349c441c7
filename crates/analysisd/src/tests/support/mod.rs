//! Shared harness for the server behaviour suites.

mod client;
mod fakes;
mod steps;
mod world;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use analysis_config::{Config, SocketEndpoint};
use camino::Utf8PathBuf;
use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::collab::{AesPasswordCipher, AnalysisRunner};
use crate::server::{Server, ServerBuilder};

pub(crate) use self::client::TestClient;
pub(crate) use self::fakes::{
    EQUIVALENT_STRESS, INPUT_URL, InputCheckingRunner, LifecycleEvent, REQUIRED_INPUT,
    RecordingExit, RecordingReporter, RecordingRestart, SlowRunner, exchange_serving,
};
pub(crate) use self::world::{ServerWorld, world};

pub(crate) const STOP_PASSWORD: &str = "open sesame";
pub(crate) const CIPHER_KEY: &str = "behaviour-suite-key";

/// Configuration rooted in `root`, listening on an ephemeral loopback port.
pub(crate) fn test_config(root: &Path) -> Config {
    Config {
        listen_socket: SocketEndpoint::ephemeral_loopback(),
        collect_statistics: false,
        work_root: utf8(root.join("work")),
        exchange_root: utf8(root.join("exchange")),
        safe_materials_dir: utf8(root.join("materials")),
        stop_password: STOP_PASSWORD.to_owned(),
        admin_cipher_key: CIPHER_KEY.to_owned(),
        shutdown_grace_secs: 5,
        ..Config::default()
    }
}

fn utf8(path: PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).expect("temporary paths are UTF-8")
}

/// Polls `condition` for up to five seconds.
pub(crate) fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Writes a zip archive holding `entries` as `(name, contents)` pairs.
pub(crate) fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut writer = ZipWriter::new(File::create(path).expect("create archive"));
    for (name, contents) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start archive entry");
        writer
            .write_all(contents.as_bytes())
            .expect("write archive entry");
    }
    writer.finish().expect("finish archive");
}

/// A server wired to recording doubles, stopped when dropped.
pub(crate) struct Harness {
    pub(crate) root: TempDir,
    pub(crate) server: Arc<Server>,
    pub(crate) reporter: Arc<RecordingReporter>,
    pub(crate) exit: Arc<RecordingExit>,
    pub(crate) restart: Arc<RecordingRestart>,
    pub(crate) uploads: Arc<AtomicUsize>,
}

impl Harness {
    /// Builds the server without starting it.
    ///
    /// The exchange serves an archive at [`INPUT_URL`]; `inputs` lists the
    /// files it holds.
    pub(crate) fn with_inputs(inputs: &[(&str, &str)]) -> Self {
        Self::build(inputs, |config| config)
    }

    pub(crate) fn build(
        inputs: &[(&str, &str)],
        configure: impl FnOnce(Config) -> Config,
    ) -> Self {
        Self::build_with_runner(inputs, Arc::new(InputCheckingRunner), configure)
    }

    /// Like [`Harness::build`], with `runner` executing analyses.
    pub(crate) fn build_with_runner(
        inputs: &[(&str, &str)],
        runner: Arc<dyn AnalysisRunner>,
        configure: impl FnOnce(Config) -> Config,
    ) -> Self {
        let root = TempDir::new().expect("temporary root");
        let archive = root.path().join("request.zip");
        write_zip(&archive, inputs);

        let reporter = Arc::new(RecordingReporter::default());
        let exit = Arc::new(RecordingExit::default());
        let restart = Arc::new(RecordingRestart::default());
        let uploads = Arc::new(AtomicUsize::new(0));
        let server = ServerBuilder::new(configure(test_config(root.path())))
            .blob_store(Arc::new(exchange_serving(archive, Arc::clone(&uploads))))
            .runner(runner)
            .reporter(reporter.clone())
            .process_exit(exit.clone())
            .restart_hook(restart.clone())
            .build();
        Self {
            root,
            server,
            reporter,
            exit,
            restart,
            uploads,
        }
    }

    pub(crate) fn connect(&self) -> TestClient {
        TestClient::connect(self.server.local_addr().expect("tcp listener address"))
    }

    pub(crate) fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// `plain` encrypted the way admin clients send passwords.
    pub(crate) fn encrypted(plain: &str) -> String {
        AesPasswordCipher::from_passphrase(CIPHER_KEY).encrypt(plain)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.stop(false, false);
    }
}
