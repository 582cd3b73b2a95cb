//! The per-server connection pool: available/busy bookkeeping, dead-host
//! backoff, the shift-based creation batch, and the background
//! maintenance worker.
//!
//! Invariants maintained throughout:
//! - every connection returned by checkout is connected at the
//!   moment of return.
//! - after `self_maint` stabilizes with no in-flight checkouts,
//!   `avail.len()` sits in `[min_conn, max_conn]` for hosts not in
//!   backoff.
//! - I3: `dead_duration` doubles on each consecutive connect failure,
//!   starting at 1000ms.
//! - I4: `buckets.len() == sum(weights)`.
//! - I5: after `shutdown`, no socket owned by the pool remains open.

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::hash;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

type ConnCell = Arc<Mutex<Option<Connection>>>;

struct AvailEntry {
    cell: ConnCell,
    last_activity: Instant,
}

struct BusyEntry {
    cell: ConnCell,
    checkout_ts: Instant,
}

struct PoolState {
    config: Config,
    buckets: Vec<String>,
    avail: HashMap<String, Vec<AvailEntry>>,
    busy: HashMap<String, Vec<BusyEntry>>,
    dead_since: HashMap<String, Instant>,
    dead_duration: HashMap<String, std::time::Duration>,
    create_shift: HashMap<String, u32>,
    initialized: bool,
}

struct MaintSignal {
    stop: Mutex<bool>,
    cv: Condvar,
}

/// A named pool of connections to a set of memcached servers. Always
/// shared as `Arc<Pool>` since the maintenance worker and every checked
/// out connection hold a reference back to it.
pub struct Pool {
    state: Mutex<PoolState>,
    maint_stop: Arc<MaintSignal>,
    maint_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    pub fn new(config: Config) -> Arc<Pool> {
        Arc::new(Pool {
            state: Mutex::new(PoolState {
                config,
                buckets: Vec::new(),
                avail: HashMap::new(),
                busy: HashMap::new(),
                dead_since: HashMap::new(),
                dead_duration: HashMap::new(),
                create_shift: HashMap::new(),
                initialized: false,
            }),
            maint_stop: Arc::new(MaintSignal {
                stop: Mutex::new(false),
                cv: Condvar::new(),
            }),
            maint_handle: Mutex::new(None),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().initialized
    }

    pub fn config(&self) -> Config {
        self.state.lock().unwrap().config.clone()
    }

    /// Expand the bucket vector, eagerly open `init_conn` connections per
    /// host (tolerating per-connection failures), and start the
    /// maintenance worker. Idempotent: a second call on an already
    /// initialized pool logs and returns `Ok(())`.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.initialized {
                log::info!("pool already initialized, ignoring duplicate initialize()");
                return Ok(());
            }
            state.config.validate()?;
            state.buckets = hash::expand_buckets(&state.config.servers);

            let mut seen = HashSet::new();
            let hosts: Vec<String> = state
                .config
                .servers
                .iter()
                .map(|s| s.host.clone())
                .filter(|h| seen.insert(h.clone()))
                .collect();
            let init_conn = state.config.init_conn;

            for host in hosts {
                for _ in 0..init_conn {
                    match create_connection_locked(&mut state, &host) {
                        Ok(conn) => {
                            state.avail.entry(host.clone()).or_default().push(AvailEntry {
                                cell: Arc::new(Mutex::new(Some(conn))),
                                last_activity: Instant::now(),
                            });
                        }
                        Err(err) => {
                            log::warn!(
                                "initialize: failed to eagerly connect to {}: {}",
                                host,
                                err
                            );
                        }
                    }
                }
            }
            state.initialized = true;
        }
        self.start_maintenance();
        Ok(())
    }

    fn start_maintenance(self: &Arc<Self>) {
        let maint_sleep = self.state.lock().unwrap().config.maint_sleep;
        if maint_sleep.is_zero() {
            return;
        }
        let mut handle_slot = self.maint_handle.lock().unwrap();
        if handle_slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let signal = Arc::clone(&self.maint_stop);
        let handle = thread::spawn(move || loop {
            {
                let stop = signal.stop.lock().unwrap();
                if *stop {
                    break;
                }
                let (stop, _timeout) = signal.cv.wait_timeout(stop, maint_sleep).unwrap();
                if *stop {
                    break;
                }
            }
            match weak.upgrade() {
                Some(pool) => pool.self_maint(),
                None => break,
            }
        });
        *handle_slot = Some(handle);
    }

    /// Stop the maintenance worker, close every connection owned by the
    /// pool, and reset all state except configuration.
    pub fn shutdown(self: &Arc<Self>) {
        {
            let mut stop = self.maint_stop.stop.lock().unwrap();
            *stop = true;
        }
        self.maint_stop.cv.notify_all();
        if let Some(handle) = self.maint_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        let mut state = self.state.lock().unwrap();
        for (_, list) in state.avail.drain() {
            for entry in list {
                close_cell(&entry.cell);
            }
        }
        for (_, list) in state.busy.drain() {
            for entry in list {
                close_cell(&entry.cell);
            }
        }
        state.dead_since.clear();
        state.dead_duration.clear();
        state.create_shift.clear();
        state.buckets.clear();
        state.initialized = false;
    }

    /// Checkout a connection for `host` directly (§4.D `getConnection`).
    pub fn checkout_host(self: &Arc<Self>, host: &str) -> Result<PooledConnection> {
        let mut state = self.state.lock().unwrap();
        if !state.initialized {
            return Err(Error::NotInitialized);
        }

        if let Some(list) = state.avail.get_mut(host) {
            let mut found = None;
            let mut i = 0;
            while i < list.len() {
                let connected = {
                    let guard = list[i].cell.lock().unwrap();
                    guard.as_ref().map(|c| c.is_connected()).unwrap_or(false)
                };
                if connected {
                    found = Some(i);
                    break;
                } else {
                    list.remove(i);
                }
            }
            if let Some(i) = found {
                let entry = list.remove(i);
                state.busy.entry(host.to_string()).or_default().push(BusyEntry {
                    cell: entry.cell.clone(),
                    checkout_ts: Instant::now(),
                });
                return Ok(PooledConnection {
                    pool: Arc::clone(self),
                    host: host.to_string(),
                    cell: entry.cell,
                    handled: false,
                });
            }
        }

        let max_create = state.config.max_create();
        let shift = *state.create_shift.get(host).unwrap_or(&0);
        let create_n = std::cmp::min(1usize.checked_shl(shift.min(31)).unwrap_or(usize::MAX), max_create)
            .max(1);
        if create_n < max_create {
            *state.create_shift.entry(host.to_string()).or_insert(0) += 1;
        }

        let mut created = Vec::new();
        let mut last_err = None;
        for _ in 0..create_n {
            match create_connection_locked(&mut state, host) {
                Ok(conn) => created.push(conn),
                Err(err) => {
                    last_err = Some(err);
                    break;
                }
            }
        }
        if created.is_empty() {
            return Err(last_err.unwrap_or(Error::NoServerAvailable));
        }
        let busy_conn = created.pop().unwrap();
        for conn in created {
            state.avail.entry(host.to_string()).or_default().push(AvailEntry {
                cell: Arc::new(Mutex::new(Some(conn))),
                last_activity: Instant::now(),
            });
        }
        let cell = Arc::new(Mutex::new(Some(busy_conn)));
        state.busy.entry(host.to_string()).or_default().push(BusyEntry {
            cell: cell.clone(),
            checkout_ts: Instant::now(),
        });
        Ok(PooledConnection {
            pool: Arc::clone(self),
            host: host.to_string(),
            cell,
            handled: false,
        })
    }

    /// Route `key` to a bucket and checkout a connection for it,
    /// failing over across up to `N` rehashes when a bucket's host is
    /// unavailable and failover is enabled (§4.B/§4.D `getSockForKey`).
    pub fn checkout_key(self: &Arc<Self>, key: &str, optional_hash: Option<i32>) -> Result<PooledConnection> {
        let (buckets, alg, failover) = {
            let state = self.state.lock().unwrap();
            if !state.initialized {
                return Err(Error::NotInitialized);
            }
            (state.buckets.clone(), state.config.hash_alg, state.config.failover)
        };
        if buckets.is_empty() {
            return Err(Error::NoServerAvailable);
        }
        if buckets.len() == 1 {
            return self.checkout_host(&buckets[0]);
        }

        let n = buckets.len();
        let mut hv = optional_hash.unwrap_or_else(|| hash::hash_key(alg, key));
        let mut last_err = Error::NoServerAvailable;
        for t in 0..=n {
            let idx = hash::bucket_index(hv, n);
            let host = buckets[idx].clone();
            match self.checkout_host(&host) {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    if !failover {
                        return Err(err);
                    }
                    last_err = err;
                    if t == n {
                        break;
                    }
                    let salted = hash::salted_key((t + 1) as u32, key);
                    hv = hv.wrapping_add(hash::hash_key(alg, &salted));
                }
            }
        }
        Err(last_err)
    }

    /// The current bucket vector, cloned out from under the lock.
    pub fn bucket_snapshot(&self) -> Vec<String> {
        self.state.lock().unwrap().buckets.clone()
    }

    /// All distinct hosts currently configured, for fan-out operations
    /// like `flush_all`/`stats` with no explicit target list.
    pub fn all_hosts(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut seen = HashSet::new();
        state
            .buckets
            .iter()
            .cloned()
            .filter(|h| seen.insert(h.clone()))
            .collect()
    }

    pub(crate) fn check_in(&self, host: &str, cell: ConnCell, add_to_avail: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.busy.get_mut(host) {
            if let Some(pos) = list.iter().position(|e| Arc::ptr_eq(&e.cell, &cell)) {
                list.remove(pos);
            }
        }

        if add_to_avail {
            let keep = {
                let guard = cell.lock().unwrap();
                guard.as_ref().map(|c| c.is_connected()).unwrap_or(false)
            };
            if keep {
                state.avail.entry(host.to_string()).or_default().push(AvailEntry {
                    cell,
                    last_activity: Instant::now(),
                });
                return;
            }
        }
        close_cell(&cell);
    }

    /// Background maintenance pass: refill undersized pools, trim
    /// oversized idle pools, and reclaim hung (leaked) checkouts. Victim
    /// connections are snapshotted under the lock and closed after it is
    /// released, per §5's locking discipline.
    fn self_maint(&self) {
        let now = Instant::now();
        let mut victims: Vec<ConnCell> = Vec::new();

        {
            let mut state = self.state.lock().unwrap();
            if !state.initialized {
                return;
            }

            let mut seen = HashSet::new();
            let hosts: Vec<String> = state
                .config
                .servers
                .iter()
                .map(|s| s.host.clone())
                .filter(|h| seen.insert(h.clone()))
                .collect();
            let min_conn = state.config.min_conn;
            let max_conn = state.config.max_conn;
            let max_idle = state.config.max_idle;
            let max_busy = state.config.max_busy;

            for host in &hosts {
                let avail_len = state.avail.get(host).map(|v| v.len()).unwrap_or(0);
                if avail_len < min_conn {
                    let need = min_conn - avail_len;
                    for _ in 0..need {
                        match create_connection_locked(&mut state, host) {
                            Ok(conn) => {
                                state.avail.entry(host.clone()).or_default().push(AvailEntry {
                                    cell: Arc::new(Mutex::new(Some(conn))),
                                    last_activity: now,
                                });
                            }
                            Err(_) => break,
                        }
                    }
                } else if avail_len > max_conn {
                    let diff = avail_len - max_conn;
                    let need_to_close = if diff <= crate::config::POOL_MULTIPLIER {
                        diff
                    } else {
                        diff / crate::config::POOL_MULTIPLIER
                    };
                    let mut closed = 0;
                    if let Some(list) = state.avail.get_mut(host) {
                        let mut i = 0;
                        while i < list.len() && closed < need_to_close {
                            if list[i].last_activity + max_idle < now {
                                let entry = list.remove(i);
                                victims.push(entry.cell);
                                closed += 1;
                            } else {
                                i += 1;
                            }
                        }
                    }
                }
                state.create_shift.insert(host.clone(), 0);
            }

            for (host, list) in state.busy.iter_mut() {
                let mut i = 0;
                while i < list.len() {
                    if list[i].checkout_ts + max_busy < now {
                        log::warn!("reclaiming hung checkout on {} after {:?}", host, max_busy);
                        let entry = list.remove(i);
                        victims.push(entry.cell);
                    } else {
                        i += 1;
                    }
                }
            }
        }

        for cell in victims {
            close_cell(&cell);
        }
    }
}

fn close_cell(cell: &ConnCell) {
    if let Ok(mut guard) = cell.lock() {
        if let Some(mut conn) = guard.take() {
            let _ = conn.true_close();
        }
    }
}

/// §4.D `createConnection`: honors dead-host backoff, clears it on
/// success, doubles it on failure, and drops this host's idle sockets on
/// failure.
fn create_connection_locked(state: &mut PoolState, host: &str) -> Result<Connection> {
    if state.config.failover {
        if let Some(&since) = state.dead_since.get(host) {
            let window = state
                .dead_duration
                .get(host)
                .copied()
                .unwrap_or(std::time::Duration::from_millis(1000));
            if Instant::now() < since + window {
                return Err(Error::DeadHost(host.to_string()));
            }
        }
    }

    match Connection::connect(
        host,
        state.config.connect_timeout,
        state.config.read_timeout,
        state.config.nagle,
    ) {
        Ok(conn) => {
            state.dead_since.remove(host);
            state.dead_duration.remove(host);
            if !state.buckets.iter().any(|b| b == host) {
                state.buckets.push(host.to_string());
            }
            Ok(conn)
        }
        Err(err) => {
            let prev = state
                .dead_duration
                .get(host)
                .copied()
                .unwrap_or(std::time::Duration::from_millis(500));
            state.dead_since.insert(host.to_string(), Instant::now());
            state.dead_duration.insert(host.to_string(), prev * 2);
            if let Some(list) = state.avail.get_mut(host) {
                for entry in list.drain(..) {
                    close_cell(&entry.cell);
                }
            }
            Err(err)
        }
    }
}

/// A leased connection. Returned to the pool automatically on drop
/// (check-in with `addToAvail = true`); `Connection::is_connected()`
/// gates whether it actually rejoins the available set, so a connection
/// an I/O error has already marked broken is discarded rather than
/// reused — matching §4.D `checkIn`'s `addToAvail=false` branch without
/// requiring callers to track which branch applies.
pub struct PooledConnection {
    pool: Arc<Pool>,
    host: String,
    cell: ConnCell,
    handled: bool,
}

impl PooledConnection {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.write_bytes(bytes);
            Ok(())
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.with_conn(|conn| conn.flush())
    }

    pub fn read_line(&self) -> Result<String> {
        self.with_conn(|conn| conn.read_line())
    }

    pub fn read_n(&self, buf: &mut [u8]) -> Result<()> {
        self.with_conn(|conn| conn.read_n(buf))
    }

    pub fn clear_eol(&self) -> Result<()> {
        self.with_conn(|conn| conn.clear_eol())
    }

    pub fn is_connected(&self) -> bool {
        match self.cell.lock() {
            Ok(guard) => guard.as_ref().map(|c| c.is_connected()).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Explicitly release the connection back to the pool now, instead
    /// of waiting for it to drop out of scope.
    pub fn release(mut self) {
        self.finish();
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.cell.lock().unwrap();
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection already closed",
            ))),
        }
    }

    fn finish(&mut self) {
        if self.handled {
            return;
        }
        self.handled = true;
        self.pool.check_in(&self.host, self.cell.clone(), true);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.finish();
    }
}
