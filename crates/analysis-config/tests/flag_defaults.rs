use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tempfile::TempDir;

use analysis_config::Config;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::env::var_os(key);
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner)
}

fn load(args: &[&OsStr]) -> Config {
    let mut argv = vec![OsString::from("analysisd")];
    argv.extend(args.iter().map(|arg| arg.to_os_string()));
    Config::load_from_iter(argv).expect("configuration loads")
}

#[test]
fn true_defaults_survive_an_empty_command_line() {
    let _env = lock_env();
    let config = load(&[]);
    assert!(config.collect_statistics);
    assert!(config.delete_temporary_files);
    assert!(!config.scheduled_stop);
}

#[test]
fn environment_can_switch_a_flag_off() {
    let _env = EnvOverride::set_var("ANALYSISD_COLLECT_STATISTICS", OsStr::new("false"));
    let config = load(&[]);
    assert!(!config.collect_statistics);
    assert!(config.delete_temporary_files);
}

#[test]
fn configuration_file_flags_are_not_masked() {
    let _env = lock_env();
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("analysisd.toml");
    fs::write(
        &path,
        "scheduled_stop = true\ndelete_temporary_files = false\n",
    )
    .expect("write configuration");

    let config = load(&[OsStr::new("--config-path"), path.as_os_str()]);
    assert!(config.scheduled_stop);
    assert!(!config.delete_temporary_files);
    assert!(config.collect_statistics);
}

#[test]
fn command_line_flag_sets_true() {
    let _env = lock_env();
    let config = load(&[OsStr::new("--scheduled-stop")]);
    assert!(config.scheduled_stop);
    assert!(!config.scheduled_stop_restart);
}
