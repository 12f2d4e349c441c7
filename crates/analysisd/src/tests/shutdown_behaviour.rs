//! Behavioural tests for the stop sequence and statistics queries.

use std::cell::RefCell;
use std::io;

use analysis_protocol::{CodecError, CorrelationToken, Message, StatisticSample, StatisticsRequest};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use super::support::{self, LifecycleEvent, ServerWorld, wait_until};

#[fixture]
fn world() -> RefCell<ServerWorld> {
    support::world()
}

#[when("the server is stopped twice")]
fn when_stopped_twice(world: &RefCell<ServerWorld>) {
    let mut state = world.borrow_mut();
    let first = state.harness().server.stop(false, false);
    let second = state.harness().server.stop(false, false);
    state.stop_results = vec![first, second];
}

#[then("the stop sequence ran {count} time")]
fn then_stop_ran(world: &RefCell<ServerWorld>, count: usize) {
    let state = world.borrow();
    let won = state.stop_results.iter().filter(|won| **won).count();
    assert_eq!(won, count);
    let reported = state
        .harness()
        .reporter
        .count(|event| matches!(event, LifecycleEvent::Stopping { .. }));
    assert_eq!(reported, count);
}

#[then("the client connection is closed")]
fn then_connection_closed(world: &RefCell<ServerWorld>) {
    let next = world.borrow_mut().client().try_receive();
    let closed = match &next {
        Ok(None) => true,
        Ok(Some(_)) => false,
        Err(CodecError::Io(error)) => !matches!(
            error.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ),
        Err(_) => false,
    };
    assert!(closed, "expected the connection to be closed, got {next:?}");
}

#[then("no client is listed")]
fn then_no_clients(world: &RefCell<ServerWorld>) {
    let state = world.borrow();
    let server = &state.harness().server;
    assert!(wait_until(|| server.clients().is_empty()));
}

#[given("statistics samples recorded at {first}, {second} and {third} ms")]
fn given_samples(world: &RefCell<ServerWorld>, first: u64, second: u64, third: u64) {
    let state = world.borrow();
    for recorded_ms in [first, second, third] {
        state.harness().server.statistics().push(StatisticSample {
            recorded_ms,
            analysis_requests: 3,
            failed_analyses: 1,
            pool_size: 2,
            active_tasks: 0,
        });
    }
}

#[when("the client requests statistics from {from_ms} to {to_ms} ms with token {token}")]
fn when_statistics_requested(
    world: &RefCell<ServerWorld>,
    from_ms: u64,
    to_ms: u64,
    token: i64,
) {
    let mut state = world.borrow_mut();
    state.client().send(
        token,
        Message::StatisticsRequest(StatisticsRequest { from_ms, to_ms }),
    );
    let reply = state.client().receive();
    state.last_reply = Some(reply);
}

fn received_samples(world: &RefCell<ServerWorld>) -> (CorrelationToken, Vec<StatisticSample>) {
    let state = world.borrow();
    let reply = state.last_reply.as_ref().expect("statistics reply");
    let Message::StatisticsResponse(response) = &reply.message else {
        panic!("expected a statistics response, got {}", reply.message.kind());
    };
    (reply.token, response.statistics.clone())
}

#[then("the client receives {count} samples with token {token}")]
fn then_samples_received(world: &RefCell<ServerWorld>, count: usize, token: i64) {
    let (received_token, samples) = received_samples(world);
    assert_eq!(received_token, CorrelationToken(token));
    assert_eq!(samples.len(), count);
}

#[then("the earliest sample was recorded at {recorded_ms} ms")]
fn then_earliest_sample(world: &RefCell<ServerWorld>, recorded_ms: u64) {
    let (_, samples) = received_samples(world);
    let earliest = samples.iter().map(|sample| sample.recorded_ms).min();
    assert_eq!(earliest, Some(recorded_ms));
}

#[scenario(path = "tests/features/server_stop.feature")]
fn server_stop(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/statistics_window.feature")]
fn statistics_window(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}
