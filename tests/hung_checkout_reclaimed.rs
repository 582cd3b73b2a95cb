//! A leaked checkout is reclaimed by the maintenance worker within
//! `maxBusyMs`, and the pool then refills to `minConn`.

mod common;

use common::MockServer;
use mcpool::pool::Pool;
use mcpool::{Config, ServerSpec};
use std::mem;
use std::time::Duration;

#[test]
fn leaked_checkout_is_reclaimed_and_pool_refills() {
    let server = MockServer::start();
    let config = Config::new(vec![ServerSpec::new(server.addr.clone(), 1)])
        .with_init_conn(1)
        .with_min_conn(1)
        .with_max_conn(5)
        .with_max_busy(Duration::from_millis(200))
        .with_maint_sleep(Duration::from_millis(100));
    let pool = Pool::new(config);
    pool.initialize().unwrap();

    // Leak a checkout: take a connection and never release it back to
    // the pool (forget it rather than letting Drop check it in).
    let leaked = pool.checkout_host(&server.addr).unwrap();
    mem::forget(leaked);

    // Maintenance should reclaim the hung checkout within a handful of
    // its 100ms ticks (spec: "within <= 500ms" for a 200ms max_busy /
    // 100ms maintenance interval).
    std::thread::sleep(Duration::from_millis(700));

    // The pool should have refilled its available set back to min_conn
    // for the one configured host, and the hung connection should no
    // longer be tracked as busy.
    let conn = pool.checkout_host(&server.addr);
    assert!(conn.is_ok(), "pool should have refilled and be checkoutable again");

    pool.shutdown();
}
