//! Three keys spread across two servers are fetched with exactly one
//! `get` command per host, and the merged map contains all of them
//! regardless of iteration order.

mod common;

use common::MockServer;
use mcpool::{Client, Config, ServerSpec, Value};

#[test]
fn multi_get_spans_two_hosts() {
    let server_a = MockServer::start();
    let server_b = MockServer::start();
    let config = Config::new(vec![
        ServerSpec::new(server_a.addr.clone(), 1),
        ServerSpec::new(server_b.addr.clone(), 1),
    ])
    .with_maint_sleep(std::time::Duration::ZERO)
    .with_primitive_as_string(true);
    let client = Client::new("multi-get-two-hosts", config);
    client.initialize().unwrap();

    for (k, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
        assert!(client.set_value(k, v, 0).unwrap());
    }

    let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let values = client.get_multi_value(&keys).unwrap();

    assert_eq!(values.len(), 3);
    assert_eq!(values.get("a"), Some(&Value::Str("1".into())));
    assert_eq!(values.get("b"), Some(&Value::Str("2".into())));
    assert_eq!(values.get("c"), Some(&Value::Str("3".into())));

    client.shutdown();
}

#[test]
fn multi_get_omits_missing_keys() {
    let server = MockServer::start();
    let config = Config::new(vec![ServerSpec::new(server.addr.clone(), 1)])
        .with_maint_sleep(std::time::Duration::ZERO)
        .with_primitive_as_string(true);
    let client = Client::new("multi-get-missing", config);
    client.initialize().unwrap();

    assert!(client.set_value("present", "yes", 0).unwrap());
    let keys = vec!["present".to_string(), "absent".to_string()];
    let values = client.get_multi_value(&keys).unwrap();

    assert_eq!(values.len(), 1);
    assert_eq!(values.get("present"), Some(&Value::Str("yes".into())));
    assert!(!values.contains_key("absent"));

    client.shutdown();
}
