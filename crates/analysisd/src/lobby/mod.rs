//! Per-connection read loops and message routing.
//!
//! Each accepted connection is served by [`ClientHandler`] on its own
//! thread. Until a handshake succeeds only handshakes are considered; after
//! that every envelope goes through [`route`], which maps the message kind to
//! a task. Inbound fragments are reassembled per session before routing.

mod client;
mod router;

pub(crate) use self::client::{Client, ClientHandler};
pub(crate) use self::router::route;
#[cfg(test)]
pub(crate) use self::router::RouteOutcome;

const LOBBY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lobby");
