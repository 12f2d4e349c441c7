//! External collaborators reached by analysis and admin tasks.
//!
//! Each collaborator sits behind a trait so tests can substitute fakes and
//! mocks; the production implementations live beside the traits.

mod blob;
mod password;
mod runner;

pub use blob::{BlobError, BlobStore, ExchangeDirectory};
pub use password::{AesPasswordCipher, CipherError, PasswordCipher};
pub use runner::{AnalysisJob, AnalysisRunner, JobArtifacts, JobError, ProgressSink};

const COLLAB_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::collab");
