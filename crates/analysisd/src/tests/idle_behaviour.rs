//! Behavioural tests for the idle timeout of identified connections.

use std::cell::RefCell;
use std::thread;
use std::time::{Duration, Instant};

use analysis_protocol::Message;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use super::support::{self, ServerWorld, wait_until};

#[fixture]
fn world() -> RefCell<ServerWorld> {
    support::world()
}

#[given(
    "a running analysis server dropping clients idle for {idle} ms with analyses taking {analysis} ms"
)]
fn given_slow_server(world: &RefCell<ServerWorld>, idle: u64, analysis: u64) {
    world.borrow_mut().start_slow_server(idle, analysis);
}

#[when("the client stays silent for {millis} ms")]
fn when_client_silent(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

#[when("the client sends a heartbeat every {interval} ms for {millis} ms")]
fn when_client_heartbeats(world: &RefCell<ServerWorld>, interval: u64, millis: u64) {
    let deadline = Instant::now() + Duration::from_millis(millis);
    while Instant::now() < deadline {
        world.borrow_mut().client().send(0, Message::KeepAlive);
        thread::sleep(Duration::from_millis(interval));
    }
    world.borrow_mut().client().send(0, Message::KeepAlive);
}

#[then("the server lists no clients")]
fn then_no_clients(world: &RefCell<ServerWorld>) {
    let released = wait_until(|| world.borrow().harness().server.clients().is_empty());
    assert!(released, "idle client was not released");
}

#[scenario(path = "tests/features/connection_idle.feature", index = 0)]
fn long_analysis_outlives_idle_timeout(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/connection_idle.feature", index = 1)]
fn silent_client_is_released(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/connection_idle.feature", index = 2)]
fn heartbeats_keep_client_connected(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}
