//! Socket transport for analysis clients.
//!
//! A [`SocketListener`] accepts connections on a background thread and hands
//! each one to a [`ConnectionHandler`] on its own thread. The handler reads
//! JSONL envelopes from the stream and answers through a shared
//! [`Connection`], which also owns the idle timeout and close operations.

mod connection;
mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod test_utils;

pub(crate) use self::connection::{Connection, SendError};
pub use self::errors::ListenerError;
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::{CapturedLines, CountingHandler};

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
