//! Behaviour suites driving the server over real sockets.

mod idle_behaviour;
mod shutdown_behaviour;
pub(crate) mod support;
