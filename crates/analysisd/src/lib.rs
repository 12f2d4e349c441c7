//! Analysis server daemon.
//!
//! Clients connect over TCP or a Unix socket and exchange JSONL envelopes
//! defined by [`analysis_protocol`]. A connection must first claim a unique
//! alias with a handshake; afterwards each request is turned into a task and
//! run on a cached worker pool. Tasks download their input archive from the
//! blob store, hand the working directory to an [`AnalysisRunner`], upload
//! outputs and answer with a completion or failure message carrying the
//! request's correlation token.
//!
//! The [`Server`] owns the listener, the session registry, the worker pool
//! and a scheduler that samples request statistics. It stops at most once,
//! whether asked by the operator [`Console`], a signal, a scheduled stop or
//! an authenticated admin request, and may relaunch the process afterwards
//! through a [`RestartHook`].
//!
//! ## Collaborators
//!
//! Analysis execution, file transfer and admin password decryption sit
//! behind traits so the server can be driven by fakes in tests:
//!
//! - [`BlobStore`] fetches input archives and stores output archives.
//!   [`ExchangeDirectory`] serves both from a shared directory.
//! - [`AnalysisRunner`] runs one analysis in a prepared directory.
//!   [`ToolRunner`], the default, sends SAFE kinds to [`SafeRunner`],
//!   which launches the SAFE tool and parses its reports, and ISAMI
//!   requests to [`IsamiRunner`], which submits a job and watches for its
//!   completion file.
//! - [`PasswordCipher`] decrypts admin passwords. [`AesPasswordCipher`]
//!   implements AES-256-CBC.

mod collab;
mod console;
mod isami;
mod lifecycle;
mod lobby;
mod process;
mod safe;
mod server;
mod session;
mod task;
mod telemetry;
mod tools;
mod transport;

pub use collab::{
    AesPasswordCipher, AnalysisJob, AnalysisRunner, BlobError, BlobStore, CipherError,
    ExchangeDirectory, JobArtifacts, JobError, PasswordCipher, ProgressSink,
};
pub use console::{Console, ConsoleError, ConsoleExit};
pub use isami::IsamiRunner;
pub use lifecycle::{LifecycleReporter, StructuredLifecycleReporter};
pub use process::{
    ConfigLoader, LaunchError, ProcessExit, ProcessRelauncher, RelaunchError, RestartHook,
    ShutdownError, ShutdownSignal, SystemConfigLoader, SystemExit, SystemShutdownSignal,
    run_daemon,
};
pub use safe::SafeRunner;
pub use server::{PoolError, Server, ServerBuilder, ServerError, ServerState};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use tools::ToolRunner;
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
