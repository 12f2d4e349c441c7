use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use analysis_config::{
    Config, DEFAULT_CONNECTION_TIMEOUT_MS, SocketEndpoint, default_listen_socket,
    default_log_filter, default_log_format,
};

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("analysisd")]),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    fn write_config(&self, socket: &SocketEndpoint) {
        let path = self.temp_dir.path().join("analysisd.toml");
        let toml = match socket {
            SocketEndpoint::Unix { path } => {
                format!("listen_socket = {{ transport = \"unix\", path = \"{path}\" }}\n")
            }
            SocketEndpoint::Tcp { host, port } => format!(
                "listen_socket = {{ transport = \"tcp\", host = \"{host}\", port = {port} }}\n"
            ),
        };
        if let Err(error) = fs::write(&path, toml) {
            panic!("failed to write configuration: {error}");
        }

        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }
        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn loaded(&self) -> Config {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

fn parse_socket(text: &str) -> SocketEndpoint {
    match text.parse::<SocketEndpoint>() {
        Ok(endpoint) => endpoint,
        Err(error) => panic!("invalid socket '{text}': {error}"),
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the listen socket to \"{socket}\"")]
fn given_configuration_file(harness: &Harness, socket: String) {
    harness.write_config(&parse_socket(&socket));
}

#[when("the command line sets the listen socket to \"{socket}\"")]
fn when_cli_override(harness: &Harness, socket: String) {
    harness.push_cli_arg("--listen-socket");
    harness.push_cli_arg(socket);
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("loading the configuration resolves the listen socket to \"{socket}\"")]
fn then_resolved_socket(harness: &Harness, socket: String) {
    let config = harness.loaded();
    assert_eq!(config.listen_socket(), &parse_socket(&socket));
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.loaded();
    assert_eq!(config.listen_socket(), &default_listen_socket());
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(config.connection_timeout_ms, DEFAULT_CONNECTION_TIMEOUT_MS);
    assert!(config.delete_temporary_files);
    assert!(config.stop_password.is_empty());
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn cli_overrides_configuration_file(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(path = "tests/features/configuration_file.feature")]
fn configuration_file_replaces_defaults(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(path = "tests/features/configuration_defaults.feature")]
fn defaults_apply_without_overrides(#[from(harness)] harness: Harness) {
    let _ = harness;
}
