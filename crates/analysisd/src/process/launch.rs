//! Launch sequence of the server process.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use analysis_config::Config;
use ortho_config::OrthoError;
use tracing::{info, warn};

use crate::console::{Console, ConsoleExit};
use crate::lifecycle::{LifecycleReporter, StructuredLifecycleReporter};
use crate::server::ServerBuilder;
use crate::telemetry;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::relaunch::{ProcessExit, ProcessRelauncher, RestartHook, SystemExit};
use super::shutdown::{self, ShutdownSignal, SystemShutdownSignal};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Collaborators required to launch the server process.
pub(crate) struct LaunchPlan<L, S, R, W> {
    pub(crate) loader: L,
    pub(crate) signal: S,
    pub(crate) reporter: Arc<dyn LifecycleReporter>,
    pub(crate) restart_hook: Option<Arc<dyn RestartHook>>,
    pub(crate) exit: Arc<dyn ProcessExit>,
    pub(crate) input: R,
    pub(crate) output: W,
}

/// Runs the server with the production collaborators and the terminal as
/// the operator console.
pub fn run_daemon() -> Result<(), LaunchError> {
    let restart_hook = ProcessRelauncher::current()
        .ok()
        .map(|relauncher| Arc::new(relauncher) as Arc<dyn RestartHook>);
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        signal: SystemShutdownSignal::new(),
        reporter: Arc::new(StructuredLifecycleReporter::new()),
        restart_hook,
        exit: Arc::new(SystemExit),
        input: io::stdin().lock(),
        output: io::stdout(),
    })
}

/// Runs the server with injected collaborators.
pub(crate) fn run_daemon_with<L, S, R, W>(plan: LaunchPlan<L, S, R, W>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal + 'static,
    R: BufRead,
    W: Write,
{
    let LaunchPlan {
        loader,
        signal,
        reporter,
        restart_hook,
        exit,
        input,
        output,
    } = plan;

    let config = loader.load()?;
    telemetry::initialise(&config)?;
    info!(
        target: PROCESS_TARGET,
        pid = std::process::id(),
        restartable = restart_hook.is_some(),
        "starting analysis server process"
    );

    let mut builder = ServerBuilder::new(config)
        .reporter(reporter)
        .process_exit(exit);
    if let Some(hook) = restart_hook {
        builder = builder.restart_hook(hook);
    }
    let server = builder.build();
    server.start()?;

    if let Err(signal_error) = shutdown::watch(Arc::clone(&server), signal) {
        server.stop(false, false);
        return Err(signal_error.into());
    }

    let outcome = Console::new(Arc::clone(&server), input, output).run();
    match outcome {
        Ok(ConsoleExit::StopRequested) => {
            server.stop(false, false);
        }
        Ok(ConsoleExit::InputClosed) => info!(
            target: PROCESS_TARGET,
            "console input closed; waiting for the server to stop"
        ),
        Ok(ConsoleExit::ServerStopped) => {}
        Err(console_error) => {
            warn!(
                target: PROCESS_TARGET,
                error = %console_error,
                "admin console failed; stopping"
            );
            server.stop(false, false);
            return Err(console_error.into());
        }
    }

    server.wait_until_stopped();
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
