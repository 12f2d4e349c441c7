//! Server lifecycle: startup, statistics sampling and the stop sequence.
//!
//! The [`Server`] owns the listener, the worker pool, the scheduler, the
//! session registry and the statistics series. Every mutation of the
//! registry goes through it. Stopping is guarded by [`ServerState`], so
//! only the first caller runs the stop sequence.

mod pool;
mod scheduler;
mod state;
mod statistics;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use analysis_config::{Config, SocketPreparationError};
use analysis_protocol::{CorrelationToken, StatisticSample};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::collab::{
    AesPasswordCipher, AnalysisRunner, BlobStore, ExchangeDirectory, PasswordCipher,
};
use crate::lifecycle::{LifecycleReporter, StructuredLifecycleReporter};
use crate::lobby::ClientHandler;
use crate::process::{ProcessExit, RestartHook, SystemExit};
use crate::session::{RegistryError, Session, SessionRegistry};
use crate::task::{self, Task, TaskContext};
use crate::telemetry;
use crate::tools::ToolRunner;
use crate::transport::{Connection, ListenerError, ListenerHandle, SocketListener};

pub use self::pool::PoolError;
use self::pool::WorkerPool;
use self::scheduler::Scheduler;
pub use self::state::ServerState;
use self::state::StateCell;
pub(crate) use self::statistics::now_ms;
use self::statistics::{RequestCounters, StatisticsSeries};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Failures while starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called twice.
    #[error("server already started")]
    AlreadyStarted,
    /// The socket directory could not be prepared.
    #[error("failed to prepare listener socket: {source}")]
    Socket {
        /// Underlying filesystem error.
        #[source]
        source: SocketPreparationError,
    },
    /// The listener could not be bound or started.
    #[error("listener failed: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// A scheduled job could not be registered.
    #[error("failed to schedule server job: {source}")]
    Schedule {
        /// Underlying scheduler error.
        #[source]
        source: PoolError,
    },
}

impl From<SocketPreparationError> for ServerError {
    fn from(source: SocketPreparationError) -> Self {
        Self::Socket { source }
    }
}

impl From<ListenerError> for ServerError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}

impl From<PoolError> for ServerError {
    fn from(source: PoolError) -> Self {
        Self::Schedule { source }
    }
}

/// Collaborators and configuration for a [`Server`].
///
/// Anything left unset falls back to the production implementation built
/// from the configuration.
pub struct ServerBuilder {
    config: Config,
    blob_store: Option<Arc<dyn BlobStore>>,
    runner: Option<Arc<dyn AnalysisRunner>>,
    cipher: Option<Arc<dyn PasswordCipher>>,
    restart_hook: Option<Arc<dyn RestartHook>>,
    exit: Option<Arc<dyn ProcessExit>>,
    reporter: Option<Arc<dyn LifecycleReporter>>,
}

impl ServerBuilder {
    /// Starts a builder for `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            blob_store: None,
            runner: None,
            cipher: None,
            restart_hook: None,
            exit: None,
            reporter: None,
        }
    }

    /// Blob store used for input and output archives.
    #[must_use]
    pub fn blob_store(mut self, blob_store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    /// Runner executing analysis jobs.
    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn AnalysisRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Cipher decrypting admin passwords.
    #[must_use]
    pub fn cipher(mut self, cipher: Arc<dyn PasswordCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Hook invoked when a stop asks for a restart.
    #[must_use]
    pub fn restart_hook(mut self, hook: Arc<dyn RestartHook>) -> Self {
        self.restart_hook = Some(hook);
        self
    }

    /// Process exit used when a stop ends the process.
    #[must_use]
    pub fn process_exit(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.exit = Some(exit);
        self
    }

    /// Observer of lifecycle milestones.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn LifecycleReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Builds the server. Nothing is bound until [`Server::start`].
    #[must_use]
    pub fn build(self) -> Arc<Server> {
        let Self {
            config,
            blob_store: custom_blob_store,
            runner: custom_runner,
            cipher: custom_cipher,
            restart_hook,
            exit: custom_exit,
            reporter: custom_reporter,
        } = self;
        let blob_store = custom_blob_store.unwrap_or_else(|| {
            Arc::new(ExchangeDirectory::new(config.exchange_root().as_std_path()))
        });
        let runner = custom_runner.unwrap_or_else(|| Arc::new(ToolRunner::from_config(&config)));
        let cipher = custom_cipher.unwrap_or_else(|| {
            Arc::new(AesPasswordCipher::from_passphrase(&config.admin_cipher_key))
        });
        Arc::new(Server {
            registry: SessionRegistry::new(config.fragment_group_ttl()),
            pool: WorkerPool::new(config.worker_pool_max_threads),
            delete_temporary_files: AtomicBool::new(config.delete_temporary_files),
            blob_store,
            runner,
            cipher,
            restart_hook,
            exit: custom_exit.unwrap_or_else(|| Arc::new(SystemExit)),
            reporter: custom_reporter
                .unwrap_or_else(|| Arc::new(StructuredLifecycleReporter::new())),
            counters: RequestCounters::default(),
            statistics: StatisticsSeries::default(),
            scheduler: Scheduler::default(),
            state: StateCell::new(),
            started: AtomicBool::new(false),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            connections: Mutex::default(),
            stopped: Mutex::new(()),
            stopped_signal: Condvar::new(),
            config,
        })
    }
}

/// The analysis server.
pub struct Server {
    config: Config,
    blob_store: Arc<dyn BlobStore>,
    runner: Arc<dyn AnalysisRunner>,
    cipher: Arc<dyn PasswordCipher>,
    restart_hook: Option<Arc<dyn RestartHook>>,
    exit: Arc<dyn ProcessExit>,
    reporter: Arc<dyn LifecycleReporter>,
    registry: SessionRegistry,
    counters: RequestCounters,
    statistics: StatisticsSeries,
    pool: WorkerPool,
    scheduler: Scheduler,
    state: StateCell,
    started: AtomicBool,
    delete_temporary_files: AtomicBool,
    listener: Mutex<Option<ListenerHandle>>,
    local_addr: Mutex<Option<SocketAddr>>,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    stopped: Mutex<()>,
    stopped_signal: Condvar,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Server")
            .field("state", &self.state())
            .field("listen_socket", self.config.listen_socket())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Binds the listener and schedules the background jobs.
    ///
    /// A failure after binding stops the server again before returning.
    pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        self.reporter.server_starting(&self.config);
        match self.start_inner() {
            Ok(endpoint) => {
                self.reporter.server_started(&endpoint);
                Ok(())
            }
            Err(start_error) => {
                self.reporter.start_failed(&start_error);
                self.stop(false, false);
                Err(start_error)
            }
        }
    }

    fn start_inner(self: &Arc<Self>) -> Result<String, ServerError> {
        let endpoint = self.config.listen_socket();
        endpoint.prepare_filesystem()?;
        let listener = SocketListener::bind(endpoint)?;
        let bound = listener.local_addr();
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = bound;

        let handler = Arc::new(ClientHandler::new(Arc::clone(self)));
        let handle = listener.start(handler)?;
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        if let Some(period) = self.config.statistics_period() {
            let weak = Arc::downgrade(self);
            self.scheduler
                .schedule_repeating(self.config.statistics_warmup(), period, move || {
                    if let Some(server) = weak.upgrade() {
                        server.sample();
                    }
                })?;
        }
        if let Some((delay, restart)) = self.config.scheduled_stop() {
            info!(
                target: SERVER_TARGET,
                delay_secs = delay.as_secs(),
                restart,
                "scheduled stop armed"
            );
            let weak = Arc::downgrade(self);
            self.scheduler.schedule_once(delay, move || {
                if let Some(server) = weak.upgrade() {
                    server.spawn_stop(restart, true);
                }
            })?;
        }

        Ok(bound.map_or_else(|| endpoint.to_string(), |addr| addr.to_string()))
    }

    /// Runs the stop sequence once; later calls return `false`.
    ///
    /// Work is refused from here on, the pools drain within the configured
    /// grace period, the listener and every open connection close, and the
    /// log sinks are flushed. A restart then goes through the restart hook
    /// and `exit_process` ends the process.
    pub fn stop(&self, restart: bool, exit_process: bool) -> bool {
        if !self.state.advance(ServerState::Running, ServerState::ShuttingDown) {
            debug!(
                target: SERVER_TARGET,
                state = %self.state(),
                "stop already in progress"
            );
            return false;
        }
        self.reporter.server_stopping(restart, exit_process);

        self.scheduler.shutdown();
        let drained = self.pool.shutdown(self.config.shutdown_grace());
        self.stop_listener();
        self.close_connections();

        let guard = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        self.state
            .advance(ServerState::ShuttingDown, ServerState::Stopped);
        drop(guard);
        self.stopped_signal.notify_all();
        self.reporter.server_stopped(ServerState::Stopped, drained);
        telemetry::flush();

        if restart {
            self.relaunch();
        }
        if exit_process {
            self.exit.exit(0);
        }
        true
    }

    /// Runs [`Server::stop`] on a dedicated thread.
    pub(crate) fn spawn_stop(self: &Arc<Self>, restart: bool, exit_process: bool) {
        let server = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("analysisd-control".to_owned())
            .spawn(move || {
                server.stop(restart, exit_process);
            });
        if let Err(spawn_error) = spawned {
            error!(
                target: SERVER_TARGET,
                error = %spawn_error,
                "failed to start stop thread"
            );
        }
    }

    fn stop_listener(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listener) = handle else {
            return;
        };
        listener.shutdown();
        if let Err(join_error) = listener.join() {
            warn!(
                target: SERVER_TARGET,
                error = %join_error,
                "listener thread ended abnormally"
            );
        }
    }

    fn close_connections(&self) {
        let open: Vec<_> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for connection in &open {
            connection.close();
        }
        debug!(
            target: SERVER_TARGET,
            closed = open.len(),
            "client connections closed"
        );
    }

    fn relaunch(&self) {
        let Some(hook) = &self.restart_hook else {
            warn!(
                target: SERVER_TARGET,
                "no restart hook configured; restart not performed"
            );
            return;
        };
        if let Err(relaunch_error) = hook.relaunch() {
            error!(
                target: SERVER_TARGET,
                error = %relaunch_error,
                "failed to relaunch server"
            );
        }
    }

    /// Blocks until the stop sequence has finished.
    pub fn wait_until_stopped(&self) {
        let mut guard = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        while self.state() != ServerState::Stopped {
            guard = self
                .stopped_signal
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Bound TCP address, once started on a TCP endpoint.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether task directories and side files are removed after each task.
    #[must_use]
    pub fn delete_temporary_files(&self) -> bool {
        self.delete_temporary_files.load(Ordering::SeqCst)
    }

    /// Toggles post-task cleanup.
    pub fn set_delete_temporary_files(&self, enabled: bool) {
        self.delete_temporary_files.store(enabled, Ordering::SeqCst);
        info!(
            target: SERVER_TARGET,
            enabled,
            "temporary file deletion toggled"
        );
    }

    /// Aliases of the identified clients, sorted.
    #[must_use]
    pub fn clients(&self) -> Vec<String> {
        self.registry
            .all()
            .iter()
            .map(|session| session.alias().to_owned())
            .collect()
    }

    /// Every statistics sample recorded so far.
    #[must_use]
    pub fn statistics_snapshot(&self) -> Vec<StatisticSample> {
        self.statistics.all()
    }

    /// Records one statistics sample and resets the request counters.
    pub fn sample(&self) {
        let (analysis_requests, failed_analyses) = self.counters.take();
        let sample = StatisticSample {
            recorded_ms: now_ms(),
            analysis_requests,
            failed_analyses,
            pool_size: self.pool.size(),
            active_tasks: self.pool.active(),
        };
        debug!(
            target: SERVER_TARGET,
            requests = sample.analysis_requests,
            failures = sample.failed_analyses,
            pool_size = sample.pool_size,
            active = sample.active_tasks,
            "statistics sampled"
        );
        self.statistics.push(sample);
    }

    pub(crate) fn blob_store(&self) -> &dyn BlobStore {
        self.blob_store.as_ref()
    }

    pub(crate) fn runner(&self) -> &dyn AnalysisRunner {
        self.runner.as_ref()
    }

    pub(crate) fn cipher(&self) -> &dyn PasswordCipher {
        self.cipher.as_ref()
    }

    pub(crate) const fn counters(&self) -> &RequestCounters {
        &self.counters
    }

    pub(crate) const fn statistics(&self) -> &StatisticsSeries {
        &self.statistics
    }

    pub(crate) fn add_session(
        &self,
        alias: &str,
        connection: Arc<Connection>,
    ) -> Result<Arc<Session>, RegistryError> {
        self.registry.register(alias, connection)
    }

    pub(crate) fn remove_session(&self, session: &Arc<Session>) -> bool {
        self.registry.remove(session)
    }

    pub(crate) fn find_session(&self, alias: &str) -> Option<Arc<Session>> {
        self.registry.lookup(alias)
    }

    pub(crate) fn track_connection(&self, connection: &Arc<Connection>) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection.id(), Arc::clone(connection));
    }

    pub(crate) fn untrack_connection(&self, connection: &Connection) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection.id());
    }

    /// Whether new work is still accepted.
    pub(crate) fn is_accepting(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Queues `job` on the worker pool.
    ///
    /// The connection counts the task as in flight until it finishes.
    pub(crate) fn submit_task(
        self: &Arc<Self>,
        connection: Arc<Connection>,
        token: CorrelationToken,
        job: impl Task,
    ) -> Result<(), PoolError> {
        if !self.is_accepting() {
            return Err(PoolError::ShutDown);
        }
        let server = Arc::clone(self);
        let in_flight = connection.begin_task();
        self.pool.submit(move || {
            let mut work = job;
            let cx = TaskContext::new(server, connection, token, work.name());
            task::execute(&mut work, &cx);
            drop(in_flight);
        })
    }

    /// Runs `job` on its own thread, outside the worker pool.
    pub(crate) fn spawn_control(
        self: &Arc<Self>,
        connection: Arc<Connection>,
        token: CorrelationToken,
        job: impl Task,
    ) -> io::Result<()> {
        let server = Arc::clone(self);
        let in_flight = connection.begin_task();
        thread::Builder::new()
            .name("analysisd-control".to_owned())
            .spawn(move || {
                let mut work = job;
                let cx = TaskContext::new(server, connection, token, work.name());
                task::execute(&mut work, &cx);
                drop(in_flight);
            })
            .map(drop)
    }
}
