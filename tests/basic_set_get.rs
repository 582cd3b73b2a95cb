//! Basic set/get round trips against a single server, including the
//! miss and empty-value edge cases.

mod common;

use common::MockServer;
use mcpool::{Client, Config, ServerSpec, Value};

#[test]
fn set_then_get_round_trips() {
    let server = MockServer::start();
    let config = Config::new(vec![ServerSpec::new(server.addr.clone(), 1)])
        .with_maint_sleep(std::time::Duration::ZERO)
        .with_primitive_as_string(true);
    let client = Client::new("basic-set-get", config);
    client.initialize().unwrap();

    assert!(client.set_value("k", "hello", 0).unwrap());
    assert_eq!(client.get_value("k").unwrap(), Some(Value::Str("hello".into())));

    client.shutdown();
}

#[test]
fn get_on_missing_key_is_none_not_error() {
    let server = MockServer::start();
    let config =
        Config::new(vec![ServerSpec::new(server.addr.clone(), 1)]).with_maint_sleep(std::time::Duration::ZERO);
    let client = Client::new("basic-get-miss", config);
    client.initialize().unwrap();

    assert_eq!(client.get_value("nope").unwrap(), None);
    client.shutdown();
}

#[test]
fn empty_value_round_trips() {
    let server = MockServer::start();
    let config = Config::new(vec![ServerSpec::new(server.addr.clone(), 1)])
        .with_maint_sleep(std::time::Duration::ZERO)
        .with_primitive_as_string(true);
    let client = Client::new("basic-empty-value", config);
    client.initialize().unwrap();

    assert!(client.set_value("empty", "", 0).unwrap());
    assert_eq!(client.get_value("empty").unwrap(), Some(Value::Str(String::new())));
    client.shutdown();
}

#[test]
fn delete_on_missing_key_is_false_not_error() {
    let server = MockServer::start();
    let config =
        Config::new(vec![ServerSpec::new(server.addr.clone(), 1)]).with_maint_sleep(std::time::Duration::ZERO);
    let client = Client::new("basic-delete-miss", config);
    client.initialize().unwrap();

    assert!(!client.delete("never-set").unwrap());
    client.shutdown();
}
