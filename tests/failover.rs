//! One server unreachable. With failover on, a key that hashes to the
//! dead bucket succeeds on the live server after a rehash; with
//! failover off it fails immediately.

mod common;

use common::MockServer;
use mcpool::hash::{bucket_index, hash_key, salted_key};
use mcpool::{Config, HashAlg, ServerSpec};

/// A loopback address nothing listens on, so `connect()` fails fast
/// with "connection refused" rather than timing out.
const DEAD_HOST: &str = "127.0.0.1:1";

/// Find a key that the native hash routes to bucket 0 of a two-bucket
/// vector, so the test can deterministically target whichever server
/// occupies that slot.
fn key_for_bucket(alg: HashAlg, target: usize, n: usize) -> String {
    for i in 0..100_000 {
        let key = format!("probe-{}", i);
        if bucket_index(hash_key(alg, &key), n) == target {
            return key;
        }
    }
    panic!("could not find a key for bucket {}", target);
}

/// Replay `pool::checkout_key`'s rehash sequence (bucket 0 dead, bucket
/// 1 alive, `n` buckets) to find a key that initially misses but lands
/// on the live bucket within the `n` retries failover allows.
fn key_that_fails_over(alg: HashAlg, n: usize) -> String {
    'outer: for i in 0..100_000 {
        let key = format!("probe-{}", i);
        let mut hv = hash_key(alg, &key);
        for t in 0..=n {
            let idx = bucket_index(hv, n);
            if idx == 1 {
                if t > 0 {
                    return key;
                }
                continue 'outer;
            }
            if t == n {
                continue 'outer;
            }
            hv = hv.wrapping_add(hash_key(alg, &salted_key((t + 1) as u32, &key)));
        }
    }
    panic!("could not find a key that fails over");
}

#[test]
fn failover_on_reroutes_around_dead_host() {
    let server = MockServer::start();
    let config = Config::new(vec![
        ServerSpec::new(DEAD_HOST, 1),
        ServerSpec::new(server.addr.clone(), 1),
    ])
    .with_init_conn(0)
    .with_min_conn(0)
    .with_maint_sleep(std::time::Duration::ZERO)
    .with_failover(true)
    .with_primitive_as_string(true);

    let key = key_that_fails_over(config.hash_alg, 2);
    let client = mcpool::Client::new("failover-on", config);
    client.initialize().unwrap();

    assert!(client.set_value(&key, "1", 0).unwrap());
    assert_eq!(
        client.get_value(&key).unwrap(),
        Some(mcpool::Value::Str("1".into()))
    );

    client.shutdown();
}

#[test]
fn failover_off_fails_fast_on_dead_bucket() {
    let server = MockServer::start();
    let config = Config::new(vec![
        ServerSpec::new(DEAD_HOST, 1),
        ServerSpec::new(server.addr.clone(), 1),
    ])
    .with_init_conn(0)
    .with_min_conn(0)
    .with_maint_sleep(std::time::Duration::ZERO)
    .with_failover(false)
    .with_primitive_as_string(true);

    let key = key_for_bucket(config.hash_alg, 0, 2);
    let client = mcpool::Client::new("failover-off", config);
    client.initialize().unwrap();

    assert!(client.set_value(&key, "1", 0).is_err());

    client.shutdown();
}
