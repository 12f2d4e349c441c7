//! Steps shared by the server behaviour suites.

use std::cell::RefCell;

use rstest_bdd_macros::given;

use super::ServerWorld;

#[given("a running analysis server")]
fn given_running_server(world: &RefCell<ServerWorld>) {
    world.borrow_mut().start_server(true);
}

#[given("a running analysis server whose input archive holds the required input")]
fn given_server_with_input(world: &RefCell<ServerWorld>) {
    world.borrow_mut().start_server(true);
}

#[given("a running analysis server whose input archive is empty")]
fn given_server_without_input(world: &RefCell<ServerWorld>) {
    world.borrow_mut().start_server(false);
}

#[given("a client identified as \"{alias}\"")]
fn given_identified_client(world: &RefCell<ServerWorld>, alias: String) {
    let mut client = world.borrow().connect();
    assert!(client.handshake(&alias), "handshake for '{alias}' refused");
    world.borrow_mut().set_client(client);
}
