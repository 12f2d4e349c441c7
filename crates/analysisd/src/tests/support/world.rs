//! Scenario world shared by the server behaviour suites.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use analysis_config::Config;
use analysis_protocol::Envelope;

use super::{Harness, REQUIRED_INPUT, SlowRunner, TestClient};

/// A started server and the client driving it.
#[derive(Default)]
pub(crate) struct ServerWorld {
    harness: Option<Harness>,
    client: Option<TestClient>,
    pub(crate) last_reply: Option<Envelope>,
    pub(crate) accepted_handshakes: usize,
    pub(crate) stop_results: Vec<bool>,
}

impl ServerWorld {
    /// Starts a server whose exchange holds the required analysis input
    /// when `with_input` is set.
    pub(crate) fn start_server(&mut self, with_input: bool) {
        let inputs: &[(&str, &str)] = if with_input {
            &[(REQUIRED_INPUT, "sigma")]
        } else {
            &[]
        };
        let harness = Harness::with_inputs(inputs);
        harness.server.start().expect("server starts");
        self.harness = Some(harness);
    }

    /// Starts a server dropping idle clients after `idle_ms` whose
    /// analyses take `analysis_ms` each.
    pub(crate) fn start_slow_server(&mut self, idle_ms: u64, analysis_ms: u64) {
        let runner = Arc::new(SlowRunner {
            delay: Duration::from_millis(analysis_ms),
        });
        let harness = Harness::build_with_runner(&[(REQUIRED_INPUT, "sigma")], runner, |config| {
            Config {
                connection_timeout_ms: idle_ms,
                ..config
            }
        });
        harness.server.start().expect("server starts");
        self.harness = Some(harness);
    }

    pub(crate) fn harness(&self) -> &Harness {
        self.harness.as_ref().expect("server started")
    }

    pub(crate) fn connect(&self) -> TestClient {
        self.harness().connect()
    }

    pub(crate) fn set_client(&mut self, client: TestClient) {
        self.client = Some(client);
    }

    pub(crate) fn take_client(&mut self) -> TestClient {
        self.client.take().expect("client connected")
    }

    pub(crate) fn client(&mut self) -> &mut TestClient {
        self.client.as_mut().expect("client connected")
    }
}

/// Fresh world for one scenario.
pub(crate) fn world() -> RefCell<ServerWorld> {
    RefCell::new(ServerWorld::default())
}
