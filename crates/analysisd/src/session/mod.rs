//! Identified clients and the alias registry.

mod registry;

pub(crate) use registry::{RegistryError, Session, SessionRegistry};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");
